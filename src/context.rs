use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tracing::warn;

use crate::{
    database::{inmemory::InMemoryDatabase, pool::create_sqlite_pool, sqlite::SqliteDatabase},
    devices::{database::DeviceDatabase, entities::Platform},
    notifications::{
        dispatcher::NotificationDispatcher,
        entities::PayloadTemplate,
        gateway::{
            NotificationGateway, apns::ApnsNotificationGateway, dummy::DummyNotificationGateway,
            fcm::FcmNotificationGateway, unconfigured::UnconfiguredNotificationGateway,
        },
    },
    settings::{DatabaseSettings, Settings},
};

pub struct AppContext {
    pub dispatcher: Arc<NotificationDispatcher<dyn DeviceDatabase>>,
}

impl AppContext {
    /// Creates the device store, the platform gateways and the dispatcher from settings
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let device_db: Arc<dyn DeviceDatabase> = match &settings.database {
            DatabaseSettings::Sqlite { url } => {
                let pool = create_sqlite_pool(url).await?;
                let db = SqliteDatabase::new(pool);
                db.init().await?;
                Arc::new(db)
            }
            DatabaseSettings::InMemory => {
                warn!("Using in-memory device store, no devices will be found");
                Arc::new(InMemoryDatabase::new())
            }
        };

        let android_gateway: Arc<dyn NotificationGateway> = match &settings.fcm {
            Some(fcm) => Arc::new(FcmNotificationGateway::new(
                &fcm.api_key,
                &fcm.endpoint,
                Duration::from_secs(fcm.request_timeout_secs),
                fcm.concurrency,
            )?),
            None => fallback_gateway(Platform::Android, settings.development),
        };

        let ios_gateway: Arc<dyn NotificationGateway> = match &settings.apns {
            Some(apns) => Arc::new(ApnsNotificationGateway::from_file(
                &apns.certificate_path,
                &apns.passphrase,
                &apns.topic,
                !settings.development,
                apns.concurrency,
            )?),
            None => fallback_gateway(Platform::Ios, settings.development),
        };

        let template = PayloadTemplate::new(
            settings.dispatch.title.clone(),
            settings.dispatch.body.clone(),
            settings.dispatch.badge_count,
        );

        let dispatcher = NotificationDispatcher::new(
            device_db,
            android_gateway,
            ios_gateway,
            template,
            Duration::from_secs(settings.dispatch.gateway_timeout_secs),
        )
        .with_token_persistence(settings.dispatch.persist_rotated_tokens);

        Ok(Self {
            dispatcher: Arc::new(dispatcher),
        })
    }
}

/// Gateway for a platform without credentials. Only development fakes deliveries.
fn fallback_gateway(platform: Platform, development: bool) -> Arc<dyn NotificationGateway> {
    if development {
        warn!(%platform, "No credentials configured, notifications will only be logged");
        Arc::new(DummyNotificationGateway::new(platform))
    } else {
        warn!(%platform, "No credentials configured, notifications will be reported as failed");
        Arc::new(UnconfiguredNotificationGateway::new(platform))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::entities::Device;
    use crate::notifications::entities::{DispatchStatus, NotificationPayload, PushMessage};
    use crate::notifications::gateway::unconfigured::PLATFORM_NOT_CONFIGURED;
    use crate::settings::{DispatchSettings, ScheduleSettings};

    fn push_message(device_id: i64) -> PushMessage {
        PushMessage {
            device_id,
            token: format!("token-{}", device_id),
            payload: NotificationPayload {
                title: "t".to_string(),
                body: "b".to_string(),
                badge_count: 0,
            },
        }
    }

    fn settings(database: DatabaseSettings) -> Settings {
        Settings {
            development: true,
            schedule: ScheduleSettings {
                interval_seconds: 60,
                ..Default::default()
            },
            database,
            dispatch: DispatchSettings {
                title: "t".to_string(),
                body: "b".to_string(),
                badge_count: 0,
                gateway_timeout_secs: 5,
                persist_rotated_tokens: false,
            },
            fcm: None,
            apns: None,
        }
    }

    #[tokio::test]
    async fn test_context_with_dummy_gateways_runs_a_cycle() {
        let context = AppContext::from_settings(&settings(DatabaseSettings::Sqlite {
            url: "sqlite::memory:".to_string(),
        }))
        .await
        .expect("context should build");

        let summary = context.dispatcher.run_cycle().await;
        assert_eq!(summary.fetched, 0);
        assert!(summary.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_missing_apns_certificate_fails_startup() {
        let mut settings = settings(DatabaseSettings::InMemory);
        settings.apns = Some(crate::settings::ApnsSettings {
            certificate_path: "/nonexistent/apns.p12".to_string(),
            passphrase: "secret".to_string(),
            topic: "com.example.app".to_string(),
            concurrency: 4,
        });

        assert!(AppContext::from_settings(&settings).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_credentials_outside_development_report_failures() {
        let gateway = fallback_gateway(Platform::Android, false);
        let outcomes = gateway
            .send_batch(vec![push_message(1), push_message(2)])
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.status == DispatchStatus::Failed));
        assert!(outcomes.iter().all(|o| o.detail == PLATFORM_NOT_CONFIGURED));
    }

    #[tokio::test]
    async fn test_missing_credentials_in_development_are_logged_as_delivered() {
        let gateway = fallback_gateway(Platform::Ios, true);
        let outcomes = gateway.send_batch(vec![push_message(1)]).await.unwrap();

        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[0].platform, Platform::Ios);
    }

    #[tokio::test]
    async fn test_production_context_without_credentials_fails_each_device() {
        let dir = std::env::temp_dir().join(format!("remote-notifier-{}", uuid::Uuid::new_v4()));
        let url = format!("sqlite:{}", dir.join("devices.db").display());

        let seed_pool = create_sqlite_pool(&url).await.expect("Failed to create pool");
        let seed = SqliteDatabase::new(seed_pool.clone());
        seed.init().await.expect("Failed to initialize database");
        seed.upsert_device(&Device::new(1, Platform::Android, "a"))
            .await
            .expect("Failed to insert device");
        seed.upsert_device(&Device::new(2, Platform::Ios, "b"))
            .await
            .expect("Failed to insert device");
        seed_pool.close().await;

        let mut settings = settings(DatabaseSettings::Sqlite { url });
        settings.development = false;

        let context = AppContext::from_settings(&settings)
            .await
            .expect("context should build");
        let summary = context.dispatcher.run_cycle().await;

        assert_eq!(summary.attempted(), 2);
        assert_eq!(summary.android.failed, 1);
        assert_eq!(summary.ios.failed, 1);
        assert!(
            summary
                .outcomes
                .iter()
                .all(|o| o.detail == PLATFORM_NOT_CONFIGURED)
        );

        let _ = std::fs::remove_dir_all(dir);
    }
}
