use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::devices::{
    database::{DeviceDatabase, DeviceDatabaseError},
    entities::Device,
};

pub struct InMemoryDatabase {
    pub devices: Mutex<BTreeMap<i64, Device>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        InMemoryDatabase {
            devices: Mutex::new(BTreeMap::new()),
        }
    }

    #[cfg(test)]
    pub fn with_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let db = Self::new();
        for device in devices {
            // Fresh mutex, cannot be poisoned yet
            if let Ok(mut lock) = db.devices.lock() {
                lock.insert(device.id, device);
            }
        }
        db
    }
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceDatabase for InMemoryDatabase {
    async fn fetch_all_devices(&self) -> Result<Vec<Device>, DeviceDatabaseError> {
        let devices_lock = self
            .devices
            .lock()
            .map_err(|e| DeviceDatabaseError::ConnectionFailed(format!("Lock poisoned: {}", e)))?;

        Ok(devices_lock.values().cloned().collect())
    }

    async fn update_device_token(
        &self,
        device_id: i64,
        token: &str,
    ) -> Result<(), DeviceDatabaseError> {
        let mut devices_lock = self
            .devices
            .lock()
            .map_err(|e| DeviceDatabaseError::ConnectionFailed(format!("Lock poisoned: {}", e)))?;

        let Some(device) = devices_lock.get_mut(&device_id) else {
            return Err(DeviceDatabaseError::NotFound(device_id));
        };

        device.token = token.to_string();
        Ok(())
    }
}
