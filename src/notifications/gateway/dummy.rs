use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::{NotificationError, NotificationGateway};
use crate::devices::entities::Platform;
use crate::notifications::entities::{DispatchOutcome, PushMessage};

/// Stands in for a platform without configured credentials.
/// Logs every notification and reports it as delivered.
pub struct DummyNotificationGateway {
    platform: Platform,
}

impl DummyNotificationGateway {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl NotificationGateway for DummyNotificationGateway {
    async fn send_batch(
        &self,
        messages: Vec<PushMessage>,
    ) -> Result<Vec<DispatchOutcome>, NotificationError> {
        let outcomes = messages
            .iter()
            .map(|message| {
                info!(
                    platform = %self.platform,
                    device_id = message.device_id,
                    "Notification to {}: {}",
                    message.token,
                    message.payload.title
                );
                DispatchOutcome::succeeded(
                    message,
                    self.platform,
                    Some(Uuid::new_v4().to_string()),
                )
            })
            .collect();

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::entities::NotificationPayload;

    #[tokio::test]
    async fn test_every_message_is_reported_delivered() {
        let payload = NotificationPayload {
            title: "t".to_string(),
            body: "b".to_string(),
            badge_count: 0,
        };
        let messages = (1..=3)
            .map(|id| PushMessage {
                device_id: id,
                token: format!("token-{}", id),
                payload: payload.clone(),
            })
            .collect();

        let gateway = DummyNotificationGateway::new(Platform::Ios);
        let outcomes = gateway.send_batch(messages).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.is_success()));
        assert!(outcomes.iter().all(|o| o.platform == Platform::Ios));
        assert!(outcomes.iter().all(|o| o.message_id.is_some()));
    }
}
