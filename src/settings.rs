use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::notifications::gateway::fcm::FCM_DEFAULT_ENDPOINT;

const ENV_PREFIX: &str = "REMOTE_NOTIFIER";

/// Tick interval (the components are summed) and first-run anchor.
/// Leaving every start_at component out or at zero starts immediately.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default)]
    pub interval_days: u64,
    #[serde(default)]
    pub interval_hours: u64,
    #[serde(default)]
    pub interval_minutes: u64,
    #[serde(default)]
    pub interval_seconds: u64,
    pub start_at_hours: Option<u32>,
    pub start_at_minutes: Option<u32>,
    pub start_at_seconds: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "lowercase")]
pub enum DatabaseSettings {
    InMemory,
    Sqlite { url: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSettings {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub badge_count: u32,
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,
    #[serde(default)]
    pub persist_rotated_tokens: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcmSettings {
    pub api_key: String,
    #[serde(default = "default_fcm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_fcm_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApnsSettings {
    #[serde(rename = "certificate")]
    pub certificate_path: String,
    pub passphrase: String,
    pub topic: String,
    #[serde(default = "default_apns_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub development: bool,
    pub schedule: ScheduleSettings,
    pub database: DatabaseSettings,
    pub dispatch: DispatchSettings,
    pub fcm: Option<FcmSettings>,
    pub apns: Option<ApnsSettings>,
}

fn default_gateway_timeout_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_fcm_concurrency() -> usize {
    8
}

fn default_apns_concurrency() -> usize {
    16
}

fn default_fcm_endpoint() -> String {
    FCM_DEFAULT_ENDPOINT.to_string()
}

impl Settings {
    pub fn load() -> Result<Settings, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("settings"))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
