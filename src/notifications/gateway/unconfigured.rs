use async_trait::async_trait;
use tracing::warn;

use super::{NotificationError, NotificationGateway};
use crate::devices::entities::Platform;
use crate::notifications::entities::{DispatchOutcome, PushMessage};

pub const PLATFORM_NOT_CONFIGURED: &str = "platform not configured";

/// Stands in for a platform without credentials outside development.
/// Nothing is sent, every message is reported as failed.
pub struct UnconfiguredNotificationGateway {
    platform: Platform,
}

impl UnconfiguredNotificationGateway {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl NotificationGateway for UnconfiguredNotificationGateway {
    async fn send_batch(
        &self,
        messages: Vec<PushMessage>,
    ) -> Result<Vec<DispatchOutcome>, NotificationError> {
        warn!(
            platform = %self.platform,
            batch_size = messages.len(),
            "No credentials configured, batch not sent"
        );

        Ok(messages
            .iter()
            .map(|message| DispatchOutcome::failed(message, self.platform, PLATFORM_NOT_CONFIGURED))
            .collect())
    }
}
