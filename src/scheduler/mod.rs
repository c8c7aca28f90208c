pub mod schedule;

use async_trait::async_trait;
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

pub use schedule::{FirstRun, Schedule};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Invalid schedule interval: {0}")]
    InvalidInterval(String),

    #[error("Invalid schedule start time: {0}")]
    InvalidStartTime(String),

    #[error("Scheduler requires a running tokio runtime")]
    NoRuntime,
}

/// Work fired on every tick.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CycleJob: Send + Sync + 'static {
    async fn execute(&self);
}

pub struct Scheduler {
    schedule: Schedule,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(schedule: Schedule, shutdown: CancellationToken) -> Self {
        Self { schedule, shutdown }
    }

    /// Starts the tick loop. The first tick follows the schedule's first-run
    /// anchor, the following ones are spaced by the interval.
    #[instrument(skip_all)]
    pub fn start<J: CycleJob>(self, job: Arc<J>) -> Result<JoinHandle<()>, SchedulerError> {
        Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let first_delay = self.schedule.first_delay(Local::now().naive_local());
        info!(
            interval_secs = self.schedule.interval.as_secs(),
            first_run_in_secs = first_delay.as_secs(),
            "Remote notification schedule has been started"
        );

        Ok(self.spawn_loop(job, first_delay))
    }

    fn spawn_loop<J: CycleJob>(self, job: Arc<J>, first_delay: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + first_delay, self.schedule.interval);
            // The loop waits for each cycle, so a long cycle swallows ticks instead of queueing them
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => {
                        info!("Remote notification schedule has been stopped");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                info!("Remote notification job has been started");
                let cycle_job = job.clone();
                match tokio::spawn(async move { cycle_job.execute().await }).await {
                    Ok(()) => info!("Remote notification job has been completed"),
                    Err(err) if err.is_panic() => {
                        error!(error = %err, "Remote notification job panicked")
                    }
                    Err(err) => error!(error = %err, "Remote notification job was cancelled"),
                }
            }
        })
    }
}
