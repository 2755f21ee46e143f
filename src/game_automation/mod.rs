// Game automation module
// Scene classification, interaction point resolution, per-scene action
// dispatch and the flow loop that ties them to a device.

pub mod actions;
pub mod channels;
pub mod classifier;
pub mod delay;
pub mod dispatcher;
pub mod equipment;
pub mod flow;
pub mod resolver;
pub mod stats;
pub mod trading;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export the main types and functions for easy access
pub use actions::DeviceActions;
pub use channels::create_automation_channels;
pub use classifier::SceneClassifier;
pub use delay::{DelayStrategy, FixedDelay, NoDelay, Pacer, RandomizedDelay, RetryPolicy, wait_and_retry};
pub use dispatcher::{ActionDispatcher, BattleTiming};
pub use equipment::{Equipment, EquipmentScorer, parse_equipment};
pub use flow::FlowController;
pub use resolver::{InteractionResolver, Layout, RelativePoint, TargetSpec};
pub use stats::{OperationCount, OperationRecord, OperationSummary, RunStats, StatusHandle};
pub use trading::{TradeDesk, TradeOffer, TradePolicy, TradeRecord, TradeSide, parse_offer};
pub use types::{
    AutomationCommand, AutomationEvent, BattleOutcome, Frame, InteractionPoints, Observation,
    SceneInfo, SceneLabel, SignalBundle,
};
