// Communication channels for game automation
use super::types::{AutomationCommand, AutomationEvent};
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 32;

/// Command channel into the flow loop and event channel out of it.
pub fn create_automation_channels() -> (
    mpsc::Sender<AutomationCommand>,
    mpsc::Receiver<AutomationCommand>,
    mpsc::Sender<AutomationEvent>,
    mpsc::Receiver<AutomationEvent>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
    (cmd_tx, cmd_rx, event_tx, event_rx)
}
