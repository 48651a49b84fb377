mod context;
mod scheduled_purge;

pub use context::job_failed;
pub use scheduled_purge::{
    INTERVAL_POLL, ScheduleError, ScheduledPurgeContext, ScheduledPurgeJob,
    process_scheduled_purge_job, purge_interval_changed, purge_schedule,
};
