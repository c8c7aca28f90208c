pub mod apns;
pub mod dummy;
pub mod fcm;
pub mod session;
pub mod unconfigured;

use async_trait::async_trait;
use thiserror::Error;

use super::entities::{DispatchOutcome, PushMessage};

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Failed to send notification: {0}")]
    SendFailure(String),

    #[error("Failed to initialize notification service: {0}")]
    InitializationFailed(String),
}

/// Push transport for a single platform.
///
/// A call to `send_batch` is one bounded unit of work: the transport is opened,
/// every message is delivered and the transport is released before returning.
/// Implementations report one outcome per message they were able to classify.
/// An `Err` means the batch as a whole could not be attempted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send_batch(
        &self,
        messages: Vec<PushMessage>,
    ) -> Result<Vec<DispatchOutcome>, NotificationError>;
}
