use chrono::{DateTime, Utc};

use crate::devices::entities::{Device, Platform};

/// The content delivered to a single device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub badge_count: u32,
}

/// Cycle-wide payload template. `{name}` and `{device_id}` are replaced per device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadTemplate {
    pub title: String,
    pub body: String,
    pub badge_count: u32,
}

impl PayloadTemplate {
    pub fn new(title: impl Into<String>, body: impl Into<String>, badge_count: u32) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            badge_count,
        }
    }

    pub fn render(&self, device: &Device) -> NotificationPayload {
        let substitute = |text: &str| {
            text.replace("{name}", &device.name)
                .replace("{device_id}", &device.id.to_string())
        };

        NotificationPayload {
            title: substitute(&self.title),
            body: substitute(&self.body),
            badge_count: self.badge_count,
        }
    }
}

/// One entry of a gateway batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub device_id: i64,
    pub token: String,
    pub payload: NotificationPayload,
}

impl PushMessage {
    pub fn for_device(device: &Device, template: &PayloadTemplate) -> Self {
        Self {
            device_id: device.id,
            token: device.token.clone(),
            payload: template.render(device),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    Succeeded,
    Failed,
    /// The token is no longer valid. A replacement is present when the
    /// gateway handed out a rotated token.
    Expired { replacement_token: Option<String> },
    RateLimited { retry_after: Option<DateTime<Utc>> },
}

impl DispatchStatus {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchStatus::Succeeded => "succeeded",
            DispatchStatus::Failed => "failed",
            DispatchStatus::Expired { .. } => "expired",
            DispatchStatus::RateLimited { .. } => "rate_limited",
        }
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub device_id: i64,
    pub platform: Platform,
    pub message_id: Option<String>,
    pub status: DispatchStatus,
    pub detail: String,
}

impl DispatchOutcome {
    pub fn succeeded(message: &PushMessage, platform: Platform, message_id: Option<String>) -> Self {
        Self {
            device_id: message.device_id,
            platform,
            message_id,
            status: DispatchStatus::Succeeded,
            detail: String::new(),
        }
    }

    pub fn failed(message: &PushMessage, platform: Platform, detail: impl Into<String>) -> Self {
        Self {
            device_id: message.device_id,
            platform,
            message_id: None,
            status: DispatchStatus::Failed,
            detail: detail.into(),
        }
    }

    pub fn expired(
        message: &PushMessage,
        platform: Platform,
        replacement_token: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            device_id: message.device_id,
            platform,
            message_id: None,
            status: DispatchStatus::Expired { replacement_token },
            detail: detail.into(),
        }
    }

    pub fn rate_limited(
        message: &PushMessage,
        platform: Platform,
        retry_after: Option<DateTime<Utc>>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            device_id: message.device_id,
            platform,
            message_id: None,
            status: DispatchStatus::RateLimited { retry_after },
            detail: detail.into(),
        }
    }

    pub fn with_message_id(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, DispatchStatus::Succeeded)
    }
}
