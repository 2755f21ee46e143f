//! Per-scene action handlers
//!
//! [`ActionDispatcher::dispatch`] is an exhaustive match over [`SceneLabel`].
//! Each handler performs one round of device actions and reports whether the
//! attempt went through; it says nothing about the in-game outcome.

use super::actions::DeviceActions;
use super::classifier::SceneClassifier;
use super::resolver::{self, InteractionResolver};
use super::stats::StatusHandle;
use super::trading::TradeDesk;
use super::types::{BattleOutcome, Frame, SceneInfo, SceneLabel};
use crate::adb::AdbClient;
use crate::config::FlowConfig;
use crate::vision::TextRecognizer;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BattleTiming {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub skill_interval: Duration,
}

impl From<&FlowConfig> for BattleTiming {
    fn from(flow: &FlowConfig) -> Self {
        Self {
            timeout: flow.battle_timeout(),
            poll_interval: flow.battle_poll_interval(),
            skill_interval: flow.skill_tap_interval(),
        }
    }
}

pub struct ActionDispatcher<D: AdbClient, R: TextRecognizer> {
    actions: Arc<DeviceActions<D>>,
    classifier: Arc<SceneClassifier<R>>,
    resolver: InteractionResolver,
    status: StatusHandle,
    battle: BattleTiming,
    trading: Option<TradeDesk<D, R>>,
}

impl<D: AdbClient, R: TextRecognizer> ActionDispatcher<D, R> {
    pub fn new(
        actions: Arc<DeviceActions<D>>,
        classifier: Arc<SceneClassifier<R>>,
        resolver: InteractionResolver,
        status: StatusHandle,
        battle: BattleTiming,
    ) -> Self {
        Self {
            actions,
            classifier,
            resolver,
            status,
            battle,
            trading: None,
        }
    }

    pub fn with_resolver(mut self, resolver: InteractionResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Unknown screens that look like the shop go to `desk` instead of recovery.
    pub fn with_trading(mut self, desk: TradeDesk<D, R>) -> Self {
        self.trading = Some(desk);
        self
    }

    pub fn trading(&self) -> Option<&TradeDesk<D, R>> {
        self.trading.as_ref()
    }

    pub async fn dispatch(&self, label: SceneLabel, frame: &Frame, info: &SceneInfo) -> bool {
        self.status.note_operation(format!("handle {label}"));
        let handled = match label {
            SceneLabel::MainMenu => self.tap_primary(label, frame, resolver::ENTER_ACTIVITY).await,
            SceneLabel::ActivityMenu => {
                self.tap_primary(label, frame, resolver::START_CHALLENGE).await
            }
            SceneLabel::BattlePrepare => {
                let started = self.tap_primary(label, frame, resolver::START_BATTLE).await;
                if started {
                    self.status.record_battle();
                }
                started
            }
            SceneLabel::BattleInProgress => self.fight(frame).await,
            SceneLabel::BattleResult => {
                match info.result {
                    Some(BattleOutcome::Win) => self.status.record_win(),
                    Some(BattleOutcome::Loss) => log::info!("💀 Battle lost"),
                    _ => log::info!("❔ Battle result unreadable"),
                }
                self.tap_primary(label, frame, resolver::CONFIRM).await
            }
            SceneLabel::RewardCollection => {
                match &info.reward {
                    Some(rewards) => {
                        for (item, quantity) in rewards {
                            log::info!("🎁 Reward: {item} x{quantity}");
                        }
                    }
                    None => log::info!("🎁 Collecting rewards"),
                }
                self.tap_primary(label, frame, resolver::COLLECT_REWARD).await
            }
            SceneLabel::ScoreDisplay => self.leave_score_display(frame).await,
            SceneLabel::Unknown => match &self.trading {
                Some(desk) if desk.is_trade_screen(&frame.signals.full_text()) => {
                    desk.handle(frame).await
                }
                _ => self.recover(frame).await,
            },
        };
        self.status.log_operation(label.as_str(), handled, None);
        handled
    }

    /// Resolve `target`, tap it and wait the long pause.
    async fn tap_primary(&self, label: SceneLabel, frame: &Frame, target: &str) -> bool {
        let Some(point) = self.resolver.resolve_one(label, frame, target) else {
            log::warn!("🎯 Target {target} not found on {label}");
            return false;
        };
        log::info!("👆 {label}: tap {target} at {point:?}");
        let tapped = self.actions.tap(point).await;
        self.actions.pause_long().await;
        tapped
    }

    async fn fight(&self, frame: &Frame) -> bool {
        let points = self.resolver.resolve(SceneLabel::BattleInProgress, frame);
        let mut first = true;
        for skill in resolver::SKILLS {
            let Some(point) = points.get(skill) else {
                continue;
            };
            if !first {
                self.actions.sleep_fixed(self.battle.skill_interval).await;
            }
            first = false;
            log::debug!("⚔️ Using {skill} at {point:?}");
            self.actions.tap(*point).await;
        }
        self.wait_for_battle_end().await
    }

    /// Poll until the battle ends or the timeout expires. Slow polls are cut
    /// off at the deadline.
    async fn wait_for_battle_end(&self) -> bool {
        let deadline = Instant::now() + self.battle.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::warn!("⏰ Battle did not finish within {:?}", self.battle.timeout);
                return false;
            }
            sleep(self.battle.poll_interval.min(remaining)).await;

            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.poll_battle()).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(_) => log::debug!("⏰ Battle poll cut off at the deadline"),
            }
        }
    }

    /// One capture and classification; true when the battle is over.
    async fn poll_battle(&self) -> bool {
        let (image, index) = match self.actions.capture_once().await {
            Ok(capture) => capture,
            Err(e) => {
                log::debug!("📸 Battle poll capture failed: {e}");
                return false;
            }
        };
        let observation = self.classifier.observe(image, index).await;
        self.status.observe(observation.label, &observation.info);
        if observation.label.ends_battle() {
            log::info!("🏁 Battle finished ({})", observation.label);
            return true;
        }
        false
    }

    async fn leave_score_display(&self, frame: &Frame) -> bool {
        let (w, h) = frame.dimensions();
        let point = self
            .resolver
            .resolve_one(SceneLabel::ScoreDisplay, frame, resolver::BACK)
            .unwrap_or_else(|| resolver::center(w, h));
        log::info!("📊 Leaving score display via {point:?}");
        self.actions.tap(point).await;
        self.actions.pause_long().await;
        true
    }

    /// Tap somewhere neutral, then look again.
    async fn recover(&self, frame: &Frame) -> bool {
        let (w, h) = frame.dimensions();
        let point = resolver::lower_center(w, h);
        log::info!("❓ Unknown scene, tapping {point:?} to recover");
        self.actions.tap(point).await;
        self.actions.pause_long().await;

        let (image, index) = match self.actions.capture().await {
            Ok(capture) => capture,
            Err(e) => {
                log::warn!("📸 Recovery capture failed: {e}");
                return false;
            }
        };
        let observation = self.classifier.observe(image, index).await;
        self.status.observe(observation.label, &observation.info);
        observation.label != SceneLabel::Unknown
    }
}
