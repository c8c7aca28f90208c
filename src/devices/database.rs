use async_trait::async_trait;

use super::entities::Device;

#[derive(Debug, thiserror::Error)]
pub enum DeviceDatabaseError {
    #[error("Device store connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Device store query failed: {0}")]
    QueryFailed(String),
    #[error("Device not found: {0}")]
    NotFound(i64),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceDatabase: Send + Sync {
    /// Returns every registered device, in store order.
    async fn fetch_all_devices(&self) -> Result<Vec<Device>, DeviceDatabaseError>;

    async fn update_device_token(
        &self,
        device_id: i64,
        token: &str,
    ) -> Result<(), DeviceDatabaseError>;
}
