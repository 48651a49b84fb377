//! Cron job that empties the page cache on the configured interval.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use apalis::prelude::*;
use apalis_cron::Schedule;
use thiserror::Error;
use tokio::time::MissedTickBehavior;

use crate::cache::{ConfigStore, Invalidator, LoadState, PurgeInterval};

use super::context::job_failed;

/// Marker struct for the cron-triggered purge.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron compatibility.
#[derive(Default, Debug, Clone)]
pub struct ScheduledPurgeJob;

impl From<chrono::DateTime<chrono::Utc>> for ScheduledPurgeJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

/// Context for the scheduled purge worker.
#[derive(Clone)]
pub struct ScheduledPurgeContext {
    pub invalidator: Invalidator,
}

#[derive(Debug, Error)]
#[error("invalid cron expression `{expression}` for {interval} purge: {message}")]
pub struct ScheduleError {
    pub interval: PurgeInterval,
    pub expression: &'static str,
    pub message: String,
}

/// Process the scheduled purge: delete every stored page.
///
/// A partial purge is logged and left for the next run.
pub async fn process_scheduled_purge_job(
    _job: ScheduledPurgeJob,
    ctx: Data<ScheduledPurgeContext>,
) -> Result<(), apalis::prelude::Error> {
    let invalidator = ctx.invalidator.clone();
    let report = tokio::task::spawn_blocking(move || invalidator.purge_all())
        .await
        .map_err(job_failed)?;

    if report.is_success() {
        tracing::info!(deleted = report.deleted, "Scheduled page cache purge finished");
    } else {
        tracing::warn!(
            deleted = report.deleted,
            failed = report.failed.len(),
            "Scheduled page cache purge left pages behind"
        );
    }
    Ok(())
}

/// Create the cron schedule for a purge interval.
pub fn purge_schedule(interval: PurgeInterval) -> Result<Schedule, ScheduleError> {
    let expression = interval.cron_expression();
    Schedule::from_str(expression).map_err(|err| ScheduleError {
        interval,
        expression,
        message: err.to_string(),
    })
}

/// How often a running scheduler re-reads the options file.
pub const INTERVAL_POLL: Duration = Duration::from_secs(30);

/// Resolve once the persisted purge interval differs from `active`.
///
/// The worker built for `active` keeps running until this returns; the
/// caller then rebuilds it for the returned interval.
pub async fn purge_interval_changed(
    options: Arc<ConfigStore>,
    active: PurgeInterval,
    poll: Duration,
) -> PurgeInterval {
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let store = Arc::clone(&options);
        let reloaded = tokio::task::spawn_blocking(move || {
            let state = store.reload();
            (state, store.purge_interval())
        })
        .await;

        match reloaded {
            Ok((_, interval)) if interval != active => {
                tracing::info!(
                    from = %active,
                    to = %interval,
                    "Purge interval changed, rescheduling"
                );
                return interval;
            }
            Ok((LoadState::Invalid(reason), _)) => {
                tracing::debug!(reason = %reason, "Options file unreadable, keeping schedule");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "Options reload task failed");
            }
        }
    }
}
