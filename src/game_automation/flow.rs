//! Flow controller
//!
//! Drives capture → classify → dispatch → delay, one cycle at a time, and
//! owns the run statistics. Stop requests and stat resets arrive on the
//! command channel and are honoured between cycles.

use super::actions::DeviceActions;
use super::channels::create_automation_channels;
use super::classifier::SceneClassifier;
use super::delay::DelayStrategy;
use super::dispatcher::{ActionDispatcher, BattleTiming};
use super::resolver::{InteractionResolver, Layout, RelativePoint};
use super::stats::{RunStats, StatusHandle};
use super::trading::{TradeDesk, TradeRecord};
use super::types::{AutomationCommand, AutomationEvent, Frame, SceneLabel};
use crate::adb::AdbClient;
use crate::config::{BotConfig, DebugConfig, FlowConfig, GameConfig};
use crate::progress::{ProgressRecord, ProgressStore};
use crate::vision::{TemplateLibrary, TextRecognizer};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

pub struct FlowController<D: AdbClient, R: TextRecognizer> {
    actions: Arc<DeviceActions<D>>,
    classifier: Arc<SceneClassifier<R>>,
    dispatcher: ActionDispatcher<D, R>,
    status: StatusHandle,
    flow: FlowConfig,
    game: GameConfig,
    debug: DebugConfig,
    running: Arc<AtomicBool>,
    command_tx: mpsc::Sender<AutomationCommand>,
    command_rx: Mutex<mpsc::Receiver<AutomationCommand>>,
    event_tx: mpsc::Sender<AutomationEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<AutomationEvent>>>,
    persistence: Option<(ProgressStore, String)>,
    last_frame_size: Mutex<Option<(u32, u32)>>,
}

impl<D: AdbClient, R: TextRecognizer> FlowController<D, R> {
    pub fn new(
        device: D,
        recognizer: R,
        templates: TemplateLibrary,
        config: &BotConfig,
        delays: Arc<dyn DelayStrategy>,
    ) -> Self {
        let status = StatusHandle::new();
        let actions = Arc::new(DeviceActions::new(Arc::new(device), &config.flow, delays));
        let classifier = Arc::new(SceneClassifier::new(
            recognizer,
            templates,
            config.recognition.clone(),
        ));
        let mut dispatcher = ActionDispatcher::new(
            actions.clone(),
            classifier.clone(),
            InteractionResolver::default(),
            status.clone(),
            BattleTiming::from(&config.flow),
        );
        if config.trading.enabled {
            log::info!(
                "💱 Trading enabled: buy at or below {}, sell at or above {}",
                config.trading.max_buy_price,
                config.trading.min_sell_price
            );
            dispatcher = dispatcher.with_trading(TradeDesk::new(
                actions.clone(),
                classifier.clone(),
                status.clone(),
                config.trading.clone(),
            ));
        }
        let (command_tx, command_rx, event_tx, event_rx) = create_automation_channels();

        Self {
            actions,
            classifier,
            dispatcher,
            status,
            flow: config.flow.clone(),
            game: config.game.clone(),
            debug: config.debug.clone(),
            running: Arc::new(AtomicBool::new(false)),
            command_tx,
            command_rx: Mutex::new(command_rx),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            persistence: None,
            last_frame_size: Mutex::new(None),
        }
    }

    /// Write a progress record for `device_id` after every cycle.
    pub fn with_persistence(mut self, store: ProgressStore, device_id: impl Into<String>) -> Self {
        self.persistence = Some((store, device_id.into()));
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.dispatcher = self.dispatcher.with_resolver(InteractionResolver::new(layout));
        self
    }

    pub fn commands(&self) -> mpsc::Sender<AutomationCommand> {
        self.command_tx.clone()
    }

    /// The event stream; only the first caller gets it.
    pub fn take_events(&self) -> Option<mpsc::Receiver<AutomationEvent>> {
        self.event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn get_stats(&self) -> RunStats {
        self.status.snapshot()
    }

    /// Trades attempted this run, empty when trading is disabled.
    pub fn trade_history(&self) -> Vec<TradeRecord> {
        self.dispatcher
            .trading()
            .map(|desk| desk.history())
            .unwrap_or_default()
    }

    pub fn get_current_scene(&self) -> SceneLabel {
        self.status.current_scene()
    }

    pub fn reset_stats(&self) {
        self.status.reset();
        self.emit(AutomationEvent::StatsUpdated(self.status.snapshot()));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request the loop to end after the current cycle.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            log::info!("⏹️ Stop requested, finishing current cycle");
        }
    }

    /// One capture → classify → dispatch round. Panics count as failure.
    pub async fn run_cycle(&self) -> bool {
        let (success, details) = match AssertUnwindSafe(self.cycle()).catch_unwind().await {
            Ok(success) => (success, None),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                let during = self.status.last_operation().unwrap_or_default();
                log::error!("💥 Cycle panicked ({during}): {message}");
                self.emit(AutomationEvent::Error(message.clone()));
                (false, Some(message))
            }
        };
        self.status.finish_cycle(success);
        self.status.log_operation("cycle", success, details);
        success
    }

    async fn cycle(&self) -> bool {
        self.status.note_operation("capture");
        let (image, index) = match self.actions.capture().await {
            Ok(capture) => capture,
            Err(e) => {
                log::error!("📸 Screen capture failed: {e}");
                self.emit(AutomationEvent::Error(e.to_string()));
                return false;
            }
        };
        *self
            .last_frame_size
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((image.width(), image.height()));

        self.status.note_operation("classify");
        let previous = self.status.current_scene();
        let observation = self.classifier.observe(image, index).await;
        self.status.observe(observation.label, &observation.info);
        if observation.label != previous {
            self.emit(AutomationEvent::SceneChanged(observation.label));
        }
        if self.debug.save_screenshots {
            self.save_screenshot(&observation.frame, observation.label);
        }

        let success = self
            .dispatcher
            .dispatch(observation.label, &observation.frame, &observation.info)
            .await;
        if !success {
            log::warn!("⚠️ Handling {} failed", observation.label);
        }
        success
    }

    /// Run cycles until `cycle_limit` (0 = unbounded) or a stop request.
    pub async fn start(&self, cycle_limit: u32, resume: Option<ProgressRecord>) -> RunStats {
        if let Some(progress) = resume {
            log::info!(
                "📂 Resuming: {} battles over {} cycles",
                progress.total_battles,
                progress.cycle_count
            );
            self.status.seed(&progress);
        }
        self.running.store(true, Ordering::SeqCst);
        log::info!(
            "🚀 Automation started on {} (cycle limit: {})",
            self.actions.device().device_name(),
            if cycle_limit == 0 { "none".to_string() } else { cycle_limit.to_string() }
        );
        self.ensure_foreground().await;

        let mut cycles = 0u32;
        loop {
            self.drain_commands();
            if !self.is_running() {
                break;
            }

            let success = self.run_cycle().await;
            cycles += 1;
            let stats = self.status.snapshot();
            self.emit(AutomationEvent::CycleFinished {
                cycle: stats.total_cycles,
                success,
            });
            self.emit(AutomationEvent::StatsUpdated(stats));
            self.persist();

            if cycle_limit > 0 && cycles >= cycle_limit {
                log::info!("✅ Cycle limit {cycle_limit} reached");
                break;
            }
            self.drain_commands();
            if !self.is_running() {
                break;
            }
            self.after_cycle(success).await;
        }

        self.running.store(false, Ordering::SeqCst);
        self.emit(AutomationEvent::Stopped);
        let stats = self.status.snapshot();
        log::info!(
            "🛑 Automation stopped: {} cycles ({} failed), {} battles, win rate {:.1}%",
            stats.total_cycles,
            stats.failed_cycles,
            stats.total_battles,
            stats.win_rate() * 100.0
        );
        stats
    }

    fn drain_commands(&self) {
        let mut rx = self
            .command_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while let Ok(command) = rx.try_recv() {
            log::debug!("🤖 Command: {command:?}");
            match command {
                AutomationCommand::Stop => self.stop(),
                AutomationCommand::ResetStats => self.reset_stats(),
            }
        }
    }

    async fn after_cycle(&self, success: bool) {
        if success {
            self.actions
                .sleep_jittered(
                    Duration::from_millis(self.flow.success_delay_ms),
                    self.flow.success_variation,
                )
                .await;
            return;
        }
        self.actions
            .sleep_jittered(
                Duration::from_millis(self.flow.failure_delay_ms),
                self.flow.failure_variation,
            )
            .await;
        let (w, h) = self.screen_size();
        let (fx, fy) = self.flow.popup_dismiss;
        let point = RelativePoint::new(fx, fy).at(w, h);
        log::debug!("🧹 Dismissing possible popup at {point:?}");
        self.actions.tap(point).await;
        self.actions.pause_short().await;
    }

    fn screen_size(&self) -> (u32, u32) {
        self.last_frame_size
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or_else(|| self.actions.device().screen_dimensions())
    }

    async fn ensure_foreground(&self) {
        if self.game.package.is_empty() {
            return;
        }
        let component = if self.game.activity.is_empty() {
            self.game.package.clone()
        } else {
            format!("{}/{}", self.game.package, self.game.activity)
        };
        log::info!("📱 Bringing {component} to the foreground");
        match self.actions.shell(&["am", "start", "-n", &component]).await {
            Ok(_) => self.actions.pause_long().await,
            Err(e) => log::warn!("⚠️ Could not start {component}: {e}"),
        }
    }

    fn persist(&self) {
        let Some((store, device)) = &self.persistence else {
            return;
        };
        let stats = self.status.snapshot();
        let record = ProgressRecord::new(stats.total_battles, stats.total_cycles);
        if let Err(e) = store.save(device, &record) {
            log::warn!("💾 Progress not saved: {e}");
        }
    }

    fn save_screenshot(&self, frame: &Frame, label: SceneLabel) {
        let dir = &self.debug.screenshot_dir;
        if let Err(e) = std::fs::create_dir_all(dir) {
            log::warn!("📁 Cannot create {}: {e}", dir.display());
            return;
        }
        let path = dir.join(format!("frame_{:05}_{label}.png", frame.index));
        match frame.image.save(&path) {
            Ok(()) => log::debug!("💾 Saved {}", path.display()),
            Err(e) => log::warn!("💾 Failed to save {}: {e}", path.display()),
        }
    }

    fn emit(&self, event: AutomationEvent) {
        // Nobody listening is fine
        let _ = self.event_tx.try_send(event);
    }
}
