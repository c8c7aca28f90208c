use lazy_static::lazy_static;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Meter},
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

use crate::devices::entities::Platform;
use crate::notifications::entities::DispatchStatus;

// Struct to hold all metrics
#[derive(Clone)]
pub struct DispatchMetrics {
    #[allow(dead_code)]
    meter: Meter,
    pub cycles: Counter<u64>,
    pub outcomes: Counter<u64>,
    pub unrecognized_devices: Counter<u64>,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchMetrics {
    pub fn new() -> Self {
        info!("Initializing dispatch metrics registry");
        let meter = global::meter("remote_notifier");

        let prefix = "remote_notifier_";

        let cycles = meter
            .u64_counter(format!("{}cycles_total", prefix))
            .with_description("Completed dispatch cycles")
            .build();

        let outcomes = meter
            .u64_counter(format!("{}outcomes_total", prefix))
            .with_description("Push delivery outcomes by platform and status")
            .build();

        let unrecognized_devices = meter
            .u64_counter(format!("{}unrecognized_devices_total", prefix))
            .with_description("Devices skipped because of an unknown platform")
            .build();

        DispatchMetrics {
            meter,
            cycles,
            outcomes,
            unrecognized_devices,
        }
    }

    pub fn record_cycle(&self) {
        self.cycles.add(1, &[]);
    }

    pub fn record_outcome(&self, platform: Platform, status: &DispatchStatus) {
        self.outcomes.add(
            1,
            &[
                KeyValue::new("platform", platform.as_str()),
                KeyValue::new("status", status.label()),
            ],
        );
    }

    pub fn record_unrecognized(&self, count: u64) {
        if count > 0 {
            self.unrecognized_devices.add(count, &[]);
        }
    }
}

// Global instance of DispatchMetrics
lazy_static! {
    static ref METRICS: Mutex<Option<Arc<DispatchMetrics>>> = Mutex::new(None);
}

// Initialize the global metrics instance
pub fn init_metrics_registry() {
    let mut metrics = METRICS.lock();
    if metrics.is_none() {
        *metrics = Some(Arc::new(DispatchMetrics::new()));
        info!("Dispatch metrics registry initialized");
    }
}

// Get a reference to the metrics registry
pub fn get_metrics() -> Option<Arc<DispatchMetrics>> {
    match METRICS.try_lock() {
        Some(guard) => guard.clone(),
        None => {
            tracing::warn!("Failed to acquire lock for metrics registry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_available_after_init() {
        init_metrics_registry();
        let metrics = get_metrics().expect("metrics should be initialized");

        // Without an exporter the global meter is a no-op, recording must not panic
        metrics.record_cycle();
        metrics.record_outcome(Platform::Android, &DispatchStatus::Succeeded);
        metrics.record_unrecognized(2);
    }
}
