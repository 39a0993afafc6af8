//! Process-wide counters for scheduler internals.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($($(#[$doc:meta])* $name:ident => $getter:ident, $bumper:ident;)*) => {
        $(
            $(#[$doc])*
            static $name: AtomicU64 = AtomicU64::new(0);

            pub fn $getter() -> u64 {
                $name.load(Ordering::Relaxed)
            }

            pub fn $bumper() {
                $name.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

counters! {
    /// Cron fires delivered to the cron job manager.
    CRON_JOBS_TRIGGERED => cron_jobs_triggered, bump_cron_jobs_triggered;
    /// Cron jobs that could not be registered or launched.
    CRON_JOB_LAUNCH_FAILURES => cron_job_launch_failures, bump_cron_job_launch_failures;
    /// Duplicate active shards detected during storage backfill.
    SHARD_SANITY_CHECK_FAILURES => shard_sanity_check_failures, bump_shard_sanity_check_failures;
    /// Task queries served from the id index.
    TASK_QUERIES_BY_ID => task_queries_by_id, bump_task_queries_by_id;
    /// Task queries served from the job-key index.
    TASK_QUERIES_BY_JOB => task_queries_by_job, bump_task_queries_by_job;
    /// Task queries that fell back to a full scan.
    TASK_QUERIES_ALL => task_queries_all, bump_task_queries_all;
    /// Preemptions performed.
    TASKS_PREEMPTED => tasks_preempted, bump_tasks_preempted;
}
