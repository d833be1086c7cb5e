//! Channel type definitions for inter-task communication

use tokio::sync::mpsc;

use crate::exchange::messages::OrderUpdate;

/// Default channel buffer size
pub const DEFAULT_CHANNEL_SIZE: usize = 1000;

/// Create a new execution-report channel with the default buffer size
pub fn create_execution_channel() -> (mpsc::Sender<OrderUpdate>, mpsc::Receiver<OrderUpdate>) {
    mpsc::channel(DEFAULT_CHANNEL_SIZE)
}
