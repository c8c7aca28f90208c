pub mod metrics_registry;
