use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    scheduler::{CycleJob, Schedule, Scheduler, SchedulerError},
    settings::ScheduleSettings,
};

/// Owns the notification schedule for the lifetime of the process.
///
/// `start` validates the schedule and spawns the tick loop, `stop` cancels it
/// and waits for an in-flight cycle to finish.
pub struct ServiceHost<J: CycleJob> {
    job: Arc<J>,
    schedule_settings: ScheduleSettings,
    shutdown: CancellationToken,
    scheduler_handle: Option<JoinHandle<()>>,
}

impl<J: CycleJob> ServiceHost<J> {
    pub fn new(job: Arc<J>, schedule_settings: ScheduleSettings) -> Self {
        Self {
            job,
            schedule_settings,
            shutdown: CancellationToken::new(),
            scheduler_handle: None,
        }
    }

    pub fn start(&mut self) -> Result<(), SchedulerError> {
        let schedule = Schedule::from_settings(&self.schedule_settings).inspect_err(|err| {
            error!(error = %err, "Failed to set up remote notification schedule");
        })?;

        let handle = Scheduler::new(schedule, self.shutdown.clone())
            .start(self.job.clone())
            .inspect_err(|err| {
                error!(error = %err, "Failed to start remote notification schedule");
            })?;

        self.scheduler_handle = Some(handle);
        info!("Remote notification service started");
        Ok(())
    }

    pub async fn stop(&mut self) {
        self.shutdown.cancel();

        if let Some(handle) = self.scheduler_handle.take() {
            if let Err(err) = handle.await {
                error!(error = %err, "Remote notification schedule ended abnormally");
            }
        }

        info!("Remote notification service stopped");
    }

    /// Runs until SIGINT or SIGTERM is received.
    pub async fn run(mut self) -> Result<(), SchedulerError> {
        self.start()?;
        self.listen_for_signals();

        self.shutdown.cancelled().await;
        self.stop().await;
        Ok(())
    }

    fn listen_for_signals(&self) {
        let signal_token = self.shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received shutdown signal");
                    signal_token.cancel();
                }
                Err(err) => error!("Error setting up signal handler: {}", err),
            }
        });

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let sigterm_token = self.shutdown.clone();
            tokio::spawn(async move {
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        info!("Received SIGTERM signal");
                        sigterm_token.cancel();
                    }
                    Err(err) => error!("Error setting up SIGTERM handler: {}", err),
                }
            });
        }
    }
}
