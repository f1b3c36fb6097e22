//! Training session logic on top of the robot link.
//!
//! - [`run`] - start/stop, run state and timer expiry
//! - [`live_aim`] - paced pan/tilt streaming

pub mod live_aim;
pub mod run;

pub use live_aim::LiveAimController;
pub use run::RunSessionManager;

use crate::infrastructure::link::transport::TransportError;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Robot not connected, {what} was not sent")]
    NotConnected { what: &'static str },

    #[error("Failed to send {what}: {source}")]
    Send {
        what: &'static str,
        #[source]
        source: TransportError,
    },
}

/// Fire-and-forget "training complete" surface (haptics, local notification)
pub trait CompletionNotifier: Send + Sync {
    fn training_complete(&self, sound_alert: bool);
}

/// Notifier for headless use; only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

impl CompletionNotifier for LoggingNotifier {
    fn training_complete(&self, sound_alert: bool) {
        info!(sound_alert, "Training complete");
    }
}
