use chrono::{NaiveDateTime, NaiveTime};
use std::time::Duration;

use super::SchedulerError;
use crate::settings::ScheduleSettings;

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 60 * SECONDS_PER_MINUTE;
const SECONDS_PER_DAY: u64 = 24 * SECONDS_PER_HOUR;

/// When the first cycle fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstRun {
    Immediate,
    /// Today's occurrence of this local time of day. Fires immediately if already past.
    At(NaiveTime),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub interval: Duration,
    pub first_run: FirstRun,
}

impl Schedule {
    pub fn new(interval: Duration, first_run: FirstRun) -> Result<Self, SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval(
                "interval must be longer than zero".to_string(),
            ));
        }

        Ok(Self {
            interval,
            first_run,
        })
    }

    pub fn from_settings(settings: &ScheduleSettings) -> Result<Self, SchedulerError> {
        let components = [
            (settings.interval_days, SECONDS_PER_DAY),
            (settings.interval_hours, SECONDS_PER_HOUR),
            (settings.interval_minutes, SECONDS_PER_MINUTE),
            (settings.interval_seconds, 1),
        ];

        let mut total_seconds: u64 = 0;
        for (value, unit) in components {
            total_seconds = value
                .checked_mul(unit)
                .and_then(|seconds| total_seconds.checked_add(seconds))
                .ok_or_else(|| SchedulerError::InvalidInterval("interval overflows".to_string()))?;
        }

        let hours = settings.start_at_hours.unwrap_or(0);
        let minutes = settings.start_at_minutes.unwrap_or(0);
        let seconds = settings.start_at_seconds.unwrap_or(0);

        let first_run = if hours == 0 && minutes == 0 && seconds == 0 {
            FirstRun::Immediate
        } else {
            let time = NaiveTime::from_hms_opt(hours, minutes, seconds).ok_or_else(|| {
                SchedulerError::InvalidStartTime(format!(
                    "{:02}:{:02}:{:02}",
                    hours, minutes, seconds
                ))
            })?;
            FirstRun::At(time)
        };

        Self::new(Duration::from_secs(total_seconds), first_run)
    }

    /// Delay from `now` (local wall clock) until the first cycle.
    pub fn first_delay(&self, now: NaiveDateTime) -> Duration {
        match self.first_run {
            FirstRun::Immediate => Duration::ZERO,
            FirstRun::At(time) => {
                let anchor = now.date().and_time(time);
                // Negative when the anchor already passed today
                (anchor - now).to_std().unwrap_or(Duration::ZERO)
            }
        }
    }
}
