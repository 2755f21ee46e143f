pub mod adb;
pub mod args;
pub mod config;
pub mod game_automation;
pub mod progress;
pub mod vision;

pub use adb::AdbBackend;
pub use config::BotConfig;
pub use game_automation::{FlowController, SceneClassifier, SceneLabel};
