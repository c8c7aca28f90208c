use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;

use crate::devices::database::{DeviceDatabase, DeviceDatabaseError};
use crate::devices::entities::{Device, DevicePlatform};

pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the device table if it doesn't exist
    pub async fn init(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_devices (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                role_id INTEGER NOT NULL,
                tenant_id INTEGER NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                platform TEXT NOT NULL,
                token TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts or replaces a device row. Registration itself happens elsewhere.
    #[cfg(test)]
    pub async fn upsert_device(&self, device: &Device) -> Result<(), DeviceDatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO user_devices (id, user_id, role_id, tenant_id, name, platform, token)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                role_id = excluded.role_id,
                tenant_id = excluded.tenant_id,
                name = excluded.name,
                platform = excluded.platform,
                token = excluded.token
            "#,
        )
        .bind(device.id)
        .bind(device.user_id)
        .bind(device.role_id)
        .bind(device.tenant_id)
        .bind(&device.name)
        .bind(device.platform.to_string())
        .bind(&device.token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl From<sqlx::Error> for DeviceDatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => DeviceDatabaseError::ConnectionFailed(err.to_string()),
            _ => DeviceDatabaseError::QueryFailed(err.to_string()),
        }
    }
}

fn device_from_row(row: &SqliteRow) -> Result<Device, sqlx::Error> {
    let platform: String = row.try_get("platform")?;

    Ok(Device {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        role_id: row.try_get("role_id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        platform: DevicePlatform::from(platform),
        token: row.try_get("token")?,
    })
}

#[async_trait]
impl DeviceDatabase for SqliteDatabase {
    #[instrument(skip(self))]
    async fn fetch_all_devices(&self) -> Result<Vec<Device>, DeviceDatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, role_id, tenant_id, name, platform, token
            FROM user_devices
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let devices = rows
            .iter()
            .map(device_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(devices)
    }

    async fn update_device_token(
        &self,
        device_id: i64,
        token: &str,
    ) -> Result<(), DeviceDatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE user_devices
            SET token = ?
            WHERE id = ?
            "#,
        )
        .bind(token)
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DeviceDatabaseError::NotFound(device_id));
        }

        Ok(())
    }
}
