use std::time::Duration;

/// Tunable knobs for the scheduler core.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on the shard count of a single job.
    pub max_tasks_per_job: usize,
    /// When true, admission rejects tasks without a valid contact email.
    pub require_contact_email: bool,
    /// Task queries slower than this are logged.
    pub slow_query_log_threshold: Duration,
    /// Minimum time a task must sit in PENDING before it may preempt others.
    pub preemption_candidacy_delay: Duration,
    /// Interval between preemption passes.
    pub preemption_interval: Duration,
    /// First delayed-run poll interval while waiting for a cron predecessor.
    pub cron_start_initial_backoff: Duration,
    /// Cap on the delayed-run poll interval.
    pub cron_start_max_backoff: Duration,
    /// CPU subtracted from every offer to account for the executor.
    pub executor_cpu_reservation: f64,
    /// RAM subtracted from every offer to account for the executor.
    pub executor_ram_reservation_mb: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_job: 1000,
            require_contact_email: true,
            slow_query_log_threshold: Duration::from_millis(25),
            preemption_candidacy_delay: Duration::from_secs(10 * 60),
            preemption_interval: Duration::from_secs(5),
            cron_start_initial_backoff: Duration::from_secs(1),
            cron_start_max_backoff: Duration::from_secs(60),
            executor_cpu_reservation: 0.25,
            executor_ram_reservation_mb: 128,
        }
    }
}

impl SchedulerConfig {
    pub fn with_preemption_candidacy_delay(mut self, delay: Duration) -> Self {
        self.preemption_candidacy_delay = delay;
        self
    }

    pub fn with_max_tasks_per_job(mut self, max: usize) -> Self {
        self.max_tasks_per_job = max;
        self
    }

    pub fn with_require_contact_email(mut self, require: bool) -> Self {
        self.require_contact_email = require;
        self
    }
}
