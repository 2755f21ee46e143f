// Run statistics shared between the loop and status readers
use super::types::{SceneInfo, SceneLabel};
use crate::progress::ProgressRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Oldest entries are dropped past this many.
const OPERATION_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub total_cycles: u64,
    pub failed_cycles: u64,
    pub total_battles: u64,
    pub win_count: u64,
    pub current_score: Option<u64>,
    pub current_currency: Option<u64>,
}

impl RunStats {
    /// Wins per battle, 0 before the first battle.
    pub fn win_rate(&self) -> f64 {
        if self.total_battles == 0 {
            0.0
        } else {
            self.win_count as f64 / self.total_battles as f64
        }
    }
}

/// One finished operation in the run log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRecord {
    pub name: String,
    pub success: bool,
    pub at: DateTime<Utc>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OperationCount {
    pub total: u64,
    pub succeeded: u64,
}

impl OperationCount {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64
        }
    }
}

/// Totals over the retained operation log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationSummary {
    pub total: u64,
    pub succeeded: u64,
    pub by_operation: BTreeMap<String, OperationCount>,
}

impl OperationSummary {
    pub fn success_rate(&self) -> f64 {
        OperationCount {
            total: self.total,
            succeeded: self.succeeded,
        }
        .success_rate()
    }
}

#[derive(Debug, Clone, Default)]
struct Status {
    stats: RunStats,
    current_scene: SceneLabel,
    last_operation: Option<String>,
    operations: VecDeque<OperationRecord>,
}

/// Cloneable handle; every clone sees the same status.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<Mutex<Status>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Status> {
        // A panic caught at the cycle boundary must not take the status down with it
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> RunStats {
        self.lock().stats.clone()
    }

    pub fn current_scene(&self) -> SceneLabel {
        self.lock().current_scene
    }

    pub fn last_operation(&self) -> Option<String> {
        self.lock().last_operation.clone()
    }

    pub fn set_scene(&self, label: SceneLabel) {
        let mut status = self.lock();
        if status.current_scene != label {
            log::debug!("🎮 Scene: {} -> {}", status.current_scene, label);
            status.current_scene = label;
        }
    }

    /// Record a fresh classification: scene plus any score/currency it carried.
    pub fn observe(&self, label: SceneLabel, info: &SceneInfo) {
        self.set_scene(label);
        let mut status = self.lock();
        if let Some(score) = info.score {
            if status.stats.current_score != Some(score) {
                log::info!("📈 Score: {:?} -> {}", status.stats.current_score, score);
            }
            status.stats.current_score = Some(score);
        }
        if let Some(currency) = info.currency {
            if status.stats.current_currency != Some(currency) {
                log::info!("💰 Currency: {:?} -> {}", status.stats.current_currency, currency);
            }
            status.stats.current_currency = Some(currency);
        }
    }

    pub fn note_operation(&self, description: impl Into<String>) {
        self.lock().last_operation = Some(description.into());
    }

    /// Append to the operation log; also becomes the last operation.
    pub fn log_operation(&self, name: &str, success: bool, details: Option<String>) {
        let mut status = self.lock();
        if status.operations.len() == OPERATION_LOG_CAPACITY {
            status.operations.pop_front();
        }
        match &details {
            Some(details) => log::debug!("📝 {name}: {} ({details})", if success { "ok" } else { "failed" }),
            None => log::debug!("📝 {name}: {}", if success { "ok" } else { "failed" }),
        }
        status.last_operation = Some(name.to_string());
        status.operations.push_back(OperationRecord {
            name: name.to_string(),
            success,
            at: Utc::now(),
            details,
        });
    }

    /// Most recent `limit` operations, oldest first.
    pub fn operation_log(&self, limit: usize) -> Vec<OperationRecord> {
        let status = self.lock();
        let skip = status.operations.len().saturating_sub(limit);
        status.operations.iter().skip(skip).cloned().collect()
    }

    pub fn operation_summary(&self) -> OperationSummary {
        let status = self.lock();
        let mut summary = OperationSummary::default();
        for record in &status.operations {
            let count = summary.by_operation.entry(record.name.clone()).or_default();
            count.total += 1;
            summary.total += 1;
            if record.success {
                count.succeeded += 1;
                summary.succeeded += 1;
            }
        }
        summary
    }

    /// Balance known from somewhere other than a classification, e.g. after a trade.
    pub fn set_currency(&self, currency: u64) {
        self.lock().stats.current_currency = Some(currency);
    }

    pub fn record_battle(&self) {
        let mut status = self.lock();
        status.stats.total_battles += 1;
        log::info!("⚔️ Battle #{}", status.stats.total_battles);
    }

    pub fn record_win(&self) {
        let mut status = self.lock();
        status.stats.win_count += 1;
        log::info!(
            "🏆 Win #{} (win rate {:.1}%)",
            status.stats.win_count,
            status.stats.win_rate() * 100.0
        );
    }

    pub fn finish_cycle(&self, success: bool) {
        let mut status = self.lock();
        status.stats.total_cycles += 1;
        if !success {
            status.stats.failed_cycles += 1;
        }
    }

    /// Resume counters from a persisted record.
    pub fn seed(&self, progress: &ProgressRecord) {
        let mut status = self.lock();
        status.stats.total_battles = progress.total_battles;
        status.stats.total_cycles = progress.cycle_count;
    }

    pub fn reset(&self) {
        let mut status = self.lock();
        status.stats = RunStats::default();
        status.operations.clear();
        log::info!("🔄 Statistics reset");
    }
}
