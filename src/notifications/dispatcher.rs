use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use super::entities::{DispatchOutcome, DispatchStatus, PayloadTemplate, PushMessage};
use super::gateway::NotificationGateway;
use crate::devices::{
    database::DeviceDatabase,
    entities::{Device, DevicePlatform, Platform},
};
use crate::scheduler::CycleJob;
use crate::telemetry::metrics_registry::get_metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Routing,
    AwaitingGatewayCompletion,
    Summarizing,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlatformTally {
    pub succeeded: usize,
    pub failed: usize,
    pub expired: usize,
    pub rate_limited: usize,
}

impl PlatformTally {
    fn record(&mut self, status: &DispatchStatus) {
        match status {
            DispatchStatus::Succeeded => self.succeeded += 1,
            DispatchStatus::Failed => self.failed += 1,
            DispatchStatus::Expired { .. } => self.expired += 1,
            DispatchStatus::RateLimited { .. } => self.rate_limited += 1,
        }
    }

    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed + self.expired + self.rate_limited
    }
}

#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub fetched: usize,
    pub unrecognized: usize,
    pub android: PlatformTally,
    pub ios: PlatformTally,
    pub outcomes: Vec<DispatchOutcome>,
}

impl CycleSummary {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }
}

#[derive(Debug, Default)]
struct PlatformPartition {
    android: Vec<Device>,
    ios: Vec<Device>,
    unrecognized: Vec<Device>,
}

fn partition_devices(devices: Vec<Device>) -> PlatformPartition {
    let mut partition = PlatformPartition::default();

    for device in devices {
        match &device.platform {
            DevicePlatform::Known(Platform::Android) => partition.android.push(device),
            DevicePlatform::Known(Platform::Ios) => partition.ios.push(device),
            DevicePlatform::Unrecognized(_) => partition.unrecognized.push(device),
        }
    }

    partition
}

/// Resets the phase to idle when the cycle ends, including by panic.
struct PhaseReset<'a>(&'a Mutex<CyclePhase>);

impl Drop for PhaseReset<'_> {
    fn drop(&mut self) {
        *self.0.lock() = CyclePhase::Idle;
    }
}

pub struct NotificationDispatcher<D: DeviceDatabase + ?Sized> {
    device_db: Arc<D>,
    android_gateway: Arc<dyn NotificationGateway>,
    ios_gateway: Arc<dyn NotificationGateway>,
    template: PayloadTemplate,
    gateway_timeout: Duration,
    persist_rotated_tokens: bool,
    phase: Mutex<CyclePhase>,
}

impl<D: DeviceDatabase + ?Sized> NotificationDispatcher<D> {
    pub fn new(
        device_db: Arc<D>,
        android_gateway: Arc<dyn NotificationGateway>,
        ios_gateway: Arc<dyn NotificationGateway>,
        template: PayloadTemplate,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            device_db,
            android_gateway,
            ios_gateway,
            template,
            gateway_timeout,
            persist_rotated_tokens: false,
            phase: Mutex::new(CyclePhase::Idle),
        }
    }

    /// Write replacement tokens reported by a gateway back to the device store.
    pub fn with_token_persistence(mut self, enabled: bool) -> Self {
        self.persist_rotated_tokens = enabled;
        self
    }

    pub fn current_phase(&self) -> CyclePhase {
        *self.phase.lock()
    }

    fn enter(&self, phase: CyclePhase) {
        debug!(?phase, "Dispatch cycle phase changed");
        *self.phase.lock() = phase;
    }

    /// Runs one fetch, fan-out and summary pass. Never fails: store and gateway
    /// errors are logged and folded into the summary.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> CycleSummary {
        let _reset = PhaseReset(&self.phase);
        let started_at = Utc::now();
        info!("Remote notification cycle started");

        self.enter(CyclePhase::Fetching);
        let devices = match self.device_db.fetch_all_devices().await {
            Ok(devices) => devices,
            Err(err) => {
                error!(error = %err, "Device store unavailable, continuing with no devices");
                Vec::new()
            }
        };
        let fetched = devices.len();
        debug!(fetched, "Fetched registered devices");

        self.enter(CyclePhase::Routing);
        let partition = partition_devices(devices);
        for device in &partition.unrecognized {
            warn!(
                device_id = device.id,
                platform = %device.platform,
                "Skipping device with unrecognized platform"
            );
        }

        let android_messages = self.build_messages(&partition.android);
        let ios_messages = self.build_messages(&partition.ios);
        let previous_tokens: HashMap<i64, String> = android_messages
            .iter()
            .chain(ios_messages.iter())
            .map(|message| (message.device_id, message.token.clone()))
            .collect();

        self.enter(CyclePhase::AwaitingGatewayCompletion);
        let (android_outcomes, ios_outcomes) = tokio::join!(
            self.dispatch_platform(
                Platform::Android,
                self.android_gateway.as_ref(),
                android_messages
            ),
            self.dispatch_platform(Platform::Ios, self.ios_gateway.as_ref(), ios_messages),
        );

        self.enter(CyclePhase::Summarizing);
        let metrics = get_metrics();
        let mut summary = CycleSummary {
            started_at,
            completed_at: started_at,
            fetched,
            unrecognized: partition.unrecognized.len(),
            android: PlatformTally::default(),
            ios: PlatformTally::default(),
            outcomes: Vec::with_capacity(android_outcomes.len() + ios_outcomes.len()),
        };

        for outcome in android_outcomes.into_iter().chain(ios_outcomes) {
            let previous_token = previous_tokens
                .get(&outcome.device_id)
                .map(String::as_str)
                .unwrap_or_default();
            self.handle_outcome(&outcome, previous_token).await;

            match outcome.platform {
                Platform::Android => summary.android.record(&outcome.status),
                Platform::Ios => summary.ios.record(&outcome.status),
            }
            if let Some(metrics) = &metrics {
                metrics.record_outcome(outcome.platform, &outcome.status);
            }
            summary.outcomes.push(outcome);
        }

        summary.completed_at = Utc::now();
        log_summary(&summary);
        if let Some(metrics) = &metrics {
            metrics.record_unrecognized(summary.unrecognized as u64);
            metrics.record_cycle();
        }

        summary
    }

    fn build_messages(&self, devices: &[Device]) -> Vec<PushMessage> {
        devices
            .iter()
            .map(|device| PushMessage::for_device(device, &self.template))
            .collect()
    }

    /// Sends one platform batch and reconciles the result to exactly one
    /// outcome per message.
    async fn dispatch_platform(
        &self,
        platform: Platform,
        gateway: &dyn NotificationGateway,
        messages: Vec<PushMessage>,
    ) -> Vec<DispatchOutcome> {
        if messages.is_empty() {
            debug!(%platform, "No devices for platform, gateway not invoked");
            return Vec::new();
        }

        info!(%platform, batch_size = messages.len(), "Dispatching notification batch");
        match timeout(self.gateway_timeout, gateway.send_batch(messages.clone())).await {
            Ok(Ok(outcomes)) => reconcile(platform, &messages, outcomes),
            Ok(Err(err)) => {
                error!(%platform, error = %err, "Gateway failed to process batch");
                fail_batch(platform, &messages, &format!("Gateway failure: {}", err))
            }
            Err(_) => {
                error!(
                    %platform,
                    timeout_secs = self.gateway_timeout.as_secs(),
                    "Gateway did not complete in time"
                );
                fail_batch(
                    platform,
                    &messages,
                    &format!("Gateway timed out after {:?}", self.gateway_timeout),
                )
            }
        }
    }

    async fn handle_outcome(&self, outcome: &DispatchOutcome, previous_token: &str) {
        let device_id = outcome.device_id;
        let platform = outcome.platform;
        let message_id = outcome.message_id.as_deref().unwrap_or_default();

        match &outcome.status {
            DispatchStatus::Succeeded => {
                info!(device_id, %platform, message_id, "Notification delivered");
            }
            DispatchStatus::Failed => {
                error!(
                    device_id,
                    %platform,
                    message_id,
                    detail = %outcome.detail,
                    "Notification delivery failed"
                );
            }
            DispatchStatus::RateLimited { retry_after } => {
                warn!(
                    device_id,
                    %platform,
                    retry_after = ?retry_after,
                    detail = %outcome.detail,
                    "Notification rate limited"
                );
            }
            DispatchStatus::Expired {
                replacement_token: None,
            } => {
                warn!(
                    device_id,
                    %platform,
                    token = %previous_token,
                    detail = %outcome.detail,
                    "Device subscription expired"
                );
            }
            DispatchStatus::Expired {
                replacement_token: Some(new_token),
            } => {
                warn!(
                    device_id,
                    %platform,
                    old_token = %previous_token,
                    new_token = %new_token,
                    "Device subscription expired, gateway supplied a replacement token"
                );

                if self.persist_rotated_tokens {
                    match self.device_db.update_device_token(device_id, new_token).await {
                        Ok(()) => info!(device_id, "Stored rotated device token"),
                        Err(err) => {
                            error!(device_id, error = %err, "Failed to store rotated device token")
                        }
                    }
                }
            }
        }
    }
}

fn fail_batch(platform: Platform, messages: &[PushMessage], detail: &str) -> Vec<DispatchOutcome> {
    messages
        .iter()
        .map(|message| DispatchOutcome::failed(message, platform, detail))
        .collect()
}

fn reconcile(
    platform: Platform,
    messages: &[PushMessage],
    outcomes: Vec<DispatchOutcome>,
) -> Vec<DispatchOutcome> {
    let batch: HashSet<i64> = messages.iter().map(|m| m.device_id).collect();
    let mut by_device: HashMap<i64, DispatchOutcome> = HashMap::with_capacity(outcomes.len());

    for mut outcome in outcomes {
        if !batch.contains(&outcome.device_id) {
            warn!(device_id = outcome.device_id, %platform, "Discarding outcome for a device not in the batch");
            continue;
        }
        if by_device.contains_key(&outcome.device_id) {
            warn!(device_id = outcome.device_id, %platform, "Discarding duplicate outcome");
            continue;
        }
        outcome.platform = platform;
        by_device.insert(outcome.device_id, outcome);
    }

    messages
        .iter()
        .map(|message| {
            by_device.remove(&message.device_id).unwrap_or_else(|| {
                DispatchOutcome::failed(message, platform, "Gateway reported no outcome")
            })
        })
        .collect()
}

fn log_summary(summary: &CycleSummary) {
    for (platform, tally) in [
        (Platform::Android, &summary.android),
        (Platform::Ios, &summary.ios),
    ] {
        info!(
            %platform,
            succeeded = tally.succeeded,
            failed = tally.failed,
            expired = tally.expired,
            rate_limited = tally.rate_limited,
            "Platform dispatch summary"
        );
    }

    info!(
        fetched = summary.fetched,
        attempted = summary.attempted(),
        unrecognized = summary.unrecognized,
        duration_ms = (summary.completed_at - summary.started_at).num_milliseconds(),
        "Remote notification cycle completed at {}",
        summary.completed_at.format("%Y%m%d-%H%M%S")
    );
}

#[async_trait]
impl<D: DeviceDatabase + ?Sized + 'static> CycleJob for NotificationDispatcher<D> {
    async fn execute(&self) {
        self.run_cycle().await;
    }
}
