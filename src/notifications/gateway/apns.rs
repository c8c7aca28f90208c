use a2::{
    Client, ClientConfig, DefaultNotificationBuilder, Endpoint, Error as A2Error,
    NotificationBuilder, NotificationOptions, Priority, Response,
};
use async_trait::async_trait;
use futures::{StreamExt, stream};
use std::{fs::File, io::Cursor, io::Read, path::Path};
use tracing::{debug, instrument};

use super::{NotificationError, NotificationGateway, session::GatewaySession};
use crate::devices::entities::Platform;
use crate::notifications::entities::{DispatchOutcome, PushMessage};

/// APNS (Apple Push Notification Service) Gateway implementation
/// authenticating with a client certificate bundle
pub struct ApnsNotificationGateway {
    certificate: Vec<u8>,
    passphrase: String,
    topic: String,
    is_production: bool,
    concurrency: usize,
}

impl ApnsNotificationGateway {
    /// Create a new APNS gateway instance from a raw PKCS#12 certificate bundle
    pub fn new(
        certificate: Vec<u8>,
        passphrase: &str,
        topic: &str,
        is_production: bool,
        concurrency: usize,
    ) -> Result<Self, NotificationError> {
        let gateway = ApnsNotificationGateway {
            certificate,
            passphrase: passphrase.to_string(),
            topic: topic.to_string(),
            is_production,
            concurrency: concurrency.max(1),
        };

        // Fail at startup rather than on the first cycle
        gateway.connect()?;
        Ok(gateway)
    }

    /// Create a new APNS gateway instance from a certificate bundle file
    pub fn from_file<P: AsRef<Path>>(
        certificate_path: P,
        passphrase: &str,
        topic: &str,
        is_production: bool,
        concurrency: usize,
    ) -> Result<Self, NotificationError> {
        let mut certificate = Vec::new();
        File::open(certificate_path)
            .map_err(|err| NotificationError::InitializationFailed(err.to_string()))?
            .read_to_end(&mut certificate)
            .map_err(|err| NotificationError::InitializationFailed(err.to_string()))?;

        Self::new(certificate, passphrase, topic, is_production, concurrency)
    }

    fn connect(&self) -> Result<Client, NotificationError> {
        let endpoint = if self.is_production {
            Endpoint::Production
        } else {
            Endpoint::Sandbox
        };

        let config = ClientConfig::new(endpoint);
        Client::certificate(&mut Cursor::new(&self.certificate), &self.passphrase, config)
            .map_err(|err| NotificationError::InitializationFailed(err.to_string()))
    }

    async fn send_one(&self, client: &Client, message: &PushMessage) -> DispatchOutcome {
        let options = NotificationOptions {
            apns_topic: Some(self.topic.as_str()),
            apns_priority: Some(Priority::High),
            ..Default::default()
        };

        let payload = DefaultNotificationBuilder::new()
            .set_title(&message.payload.title)
            .set_body(&message.payload.body)
            .set_badge(message.payload.badge_count)
            .set_sound("default")
            .build(&message.token, options);

        classify_response(message, client.send(payload).await)
    }
}

#[async_trait]
impl NotificationGateway for ApnsNotificationGateway {
    #[instrument(skip_all, fields(batch_size = messages.len()))]
    async fn send_batch(
        &self,
        messages: Vec<PushMessage>,
    ) -> Result<Vec<DispatchOutcome>, NotificationError> {
        let session = GatewaySession::open(Platform::Ios, self.connect()?);
        let client: &Client = &session;

        let sends = messages
            .iter()
            .map(|message| self.send_one(client, message))
            .collect::<Vec<_>>();
        let outcomes = stream::iter(sends)
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok(outcomes)
    }
}

fn classify_response(message: &PushMessage, result: Result<Response, A2Error>) -> DispatchOutcome {
    match result {
        Ok(response) => {
            debug!("APNS response: {:?}", response);
            DispatchOutcome::succeeded(message, Platform::Ios, response.apns_id)
        }
        Err(A2Error::ResponseError(response)) => {
            let reason = response.error.map(|body| format!("{:?}", body.reason));
            classify_status(message, response.code, reason).with_message_id(response.apns_id)
        }
        Err(err) => DispatchOutcome::failed(
            message,
            Platform::Ios,
            format!("Unclassified APNS failure: {}", err),
        ),
    }
}

fn classify_status(message: &PushMessage, code: u16, reason: Option<String>) -> DispatchOutcome {
    let detail = match &reason {
        Some(reason) => format!("status {}: {}", code, reason),
        None => format!("status {}", code),
    };

    match code {
        410 => DispatchOutcome::expired(message, Platform::Ios, None, detail),
        429 => DispatchOutcome::rate_limited(message, Platform::Ios, None, detail),
        _ => DispatchOutcome::failed(message, Platform::Ios, detail),
    }
}
