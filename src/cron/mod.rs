//! Materializes cron-scheduled jobs into pending tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio_util::sync::CancellationToken;

use crate::base::job_key::JobKey;
use crate::base::query::TaskQuery;
use crate::config::SchedulerConfig;
use crate::configuration;
use crate::error::{Result, SchedulerError};
use crate::model::job::{CronCollisionPolicy, JobConfiguration};
use crate::model::task::TaskStatus;
use crate::ports::cron::CronScheduler;
use crate::scheduler::core::SchedulerCore;
use crate::state::StateManager;
use crate::stats;
use crate::storage::Storage;

/// Key under which cron jobs are stored in the job store.
pub const MANAGER_KEY: &str = "CRON";

const CRON_USER: &str = "cron";

/// Receives jobs carrying a cron schedule, registers them with the cron
/// engine, and on each fire inserts fresh PENDING tasks subject to the job's
/// collision policy.
pub struct CronJobManager {
    storage: Arc<Storage>,
    state_manager: Arc<StateManager>,
    scheduler: Arc<SchedulerCore>,
    cron: Arc<dyn CronScheduler>,
    config: SchedulerConfig,
    /// Job key to the cron engine's registration key.
    scheduled_jobs: Mutex<HashMap<JobKey, String>>,
    /// Jobs waiting for a prior run to terminate. At most one delayed run
    /// per job; duplicate enqueue attempts are no-ops.
    pending_runs: Mutex<HashMap<JobKey, JobConfiguration>>,
    shutdown: CancellationToken,
    /// Handle to self for cron callbacks and spawned delayed runs.
    self_ref: Weak<CronJobManager>,
}

impl CronJobManager {
    pub fn new(
        storage: Arc<Storage>,
        state_manager: Arc<StateManager>,
        scheduler: Arc<SchedulerCore>,
        cron: Arc<dyn CronScheduler>,
        config: SchedulerConfig,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            storage,
            state_manager,
            scheduler,
            cron,
            config,
            scheduled_jobs: Mutex::new(HashMap::new()),
            pending_runs: Mutex::new(HashMap::new()),
            shutdown,
            self_ref: self_ref.clone(),
        })
    }

    /// Loads persisted cron jobs and registers their schedules. Call once
    /// storage has started; jobs whose schedule fails to register are logged
    /// and counted, not fatal.
    pub fn storage_started(&self) {
        self.cron.start();
        let jobs = self
            .storage
            .consistent_read(|stores| stores.job_store.fetch_jobs(MANAGER_KEY));
        for job in jobs {
            match self.schedule_job(&job) {
                Ok(key) => self.map_scheduled_job(&job.key, key),
                Err(e) => {
                    stats::bump_cron_job_launch_failures();
                    tracing::error!(job = %job.key, error = %e, "Scheduling failed for recovered job");
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.cron.stop();
        self.shutdown.cancel();
    }

    /// Accepts a job if it carries a cron schedule: validates, registers the
    /// schedule, and persists the configuration. Returns false for non-cron
    /// jobs so the caller can route them elsewhere.
    pub fn receive_job(&self, job: &JobConfiguration) -> Result<bool> {
        if !job.is_cron() {
            return Ok(false);
        }
        let populated = configuration::validate_and_populate(job, &self.config)?;

        let key = self.schedule_job(&populated)?;
        self.storage.write(|stores| {
            stores
                .job_store
                .save_accepted_job(MANAGER_KEY, populated.clone());
        });
        self.map_scheduled_job(&populated.key, key);
        Ok(true)
    }

    /// Replaces a registered cron job's configuration and schedule.
    pub fn update_job(&self, job: &JobConfiguration) -> Result<()> {
        if !job.is_cron() {
            return Err(SchedulerError::Schedule(
                "A cron job may not be updated to a non-cron job".to_string(),
            ));
        }
        let registration = self
            .scheduled_jobs
            .lock()
            .expect("scheduled jobs poisoned")
            .remove(&job.key)
            .ok_or_else(|| {
                SchedulerError::Schedule(format!("Attempted to update unknown job {}", job.key))
            })?;
        self.cron.deschedule(&registration);
        self.receive_job(job)?;
        Ok(())
    }

    pub fn has_job(&self, key: &JobKey) -> bool {
        self.fetch_job(key).is_some()
    }

    /// Deschedules and removes a cron job. Returns false when unknown.
    pub fn delete_job(&self, key: &JobKey) -> bool {
        if !self.has_job(key) {
            return false;
        }
        if let Some(registration) = self
            .scheduled_jobs
            .lock()
            .expect("scheduled jobs poisoned")
            .remove(key)
        {
            self.cron.deschedule(&registration);
        }
        self.storage.write(|stores| stores.job_store.remove_job(key));
        tracing::info!(job = %key, "Deleted cron job");
        true
    }

    /// Runs a registered cron job immediately, as if its schedule fired.
    pub fn start_job_now(&self, key: &JobKey) -> Result<()> {
        let job = self
            .fetch_job(key)
            .ok_or_else(|| SchedulerError::Schedule(format!("No such cron job {key}")))?;
        self.cron_triggered(&job);
        Ok(())
    }

    /// Registered jobs and their schedule expressions.
    pub fn scheduled_jobs(&self) -> HashMap<JobKey, String> {
        let registrations = self
            .scheduled_jobs
            .lock()
            .expect("scheduled jobs poisoned");
        registrations
            .iter()
            .map(|(job, key)| {
                let expr = self
                    .cron
                    .get_schedule(key)
                    .unwrap_or_else(|| "Not found.".to_string());
                (job.clone(), expr)
            })
            .collect()
    }

    /// Jobs with a delayed run waiting on a predecessor to terminate.
    pub fn pending_runs(&self) -> Vec<JobKey> {
        self.pending_runs
            .lock()
            .expect("pending runs poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Handles one cron fire for `job` under its collision policy.
    pub fn cron_triggered(&self, job: &JobConfiguration) {
        stats::bump_cron_jobs_triggered();
        tracing::info!(
            job = %job.key,
            policy = ?job.collision_policy(),
            "Cron triggered"
        );

        let active_query = TaskQuery::job_scoped(&job.key).active();
        let active = self
            .storage
            .consistent_read(|stores| stores.task_store.fetch_tasks(&active_query));

        let mut new_tasks = Vec::new();
        if active.is_empty() {
            new_tasks = job.task_configs();
        } else {
            match job.collision_policy() {
                CronCollisionPolicy::KillExisting => {
                    if let Err(e) = self.scheduler.kill_tasks(&active_query, CRON_USER) {
                        tracing::error!(job = %job.key, error = %e, "Failed to kill job");
                    } else if !self.has_tasks(&active_query) {
                        // The prior run was all PENDING and is already gone.
                        new_tasks = job.task_configs();
                    } else {
                        self.delayed_run(active_query.clone(), job.clone());
                    }
                }
                CronCollisionPolicy::CancelNew => {}
                CronCollisionPolicy::RunOverlap => {
                    if active.iter().any(|t| t.status == TaskStatus::Pending) {
                        tracing::info!(job = %job.key, "Job has pending tasks, suppressing run");
                    } else {
                        let shard_offset = active
                            .iter()
                            .map(|t| t.shard_id())
                            .max()
                            .expect("active set is non-empty")
                            + 1;
                        tracing::info!(
                            job = %job.key,
                            shard_offset,
                            "Adjusting shard ids for overlapping cron run"
                        );
                        new_tasks = job
                            .task_configs()
                            .into_iter()
                            .map(|mut config| {
                                config.shard_id += shard_offset;
                                config
                            })
                            .collect();
                    }
                }
            }
        }

        if !new_tasks.is_empty() {
            self.state_manager.insert_pending_tasks(new_tasks);
        }
    }

    fn fetch_job(&self, key: &JobKey) -> Option<JobConfiguration> {
        self.storage
            .consistent_read(|stores| stores.job_store.fetch_job(MANAGER_KEY, key))
    }

    fn map_scheduled_job(&self, key: &JobKey, registration: String) {
        let mut scheduled = self
            .scheduled_jobs
            .lock()
            .expect("scheduled jobs poisoned");
        assert!(
            !scheduled.contains_key(key),
            "cron schedule already exists for {key}"
        );
        scheduled.insert(key.clone(), registration);
    }

    fn schedule_job(&self, job: &JobConfiguration) -> Result<String> {
        let expr = job.cron_schedule.as_deref().ok_or_else(|| {
            SchedulerError::Schedule(format!("Not a valid cron job, {} has no schedule", job.key))
        })?;
        if !self.cron.is_valid_schedule(expr) {
            return Err(SchedulerError::Schedule(format!(
                "Invalid cron schedule: {expr}"
            )));
        }

        tracing::info!(job = %job.key, schedule = expr, "Scheduling cron job");
        let manager = self.self_ref.clone();
        let fired_job = job.clone();
        self.cron.schedule(
            expr,
            Arc::new(move || {
                if let Some(manager) = manager.upgrade() {
                    manager.cron_triggered(&fired_job);
                }
            }),
        )
    }

    fn has_tasks(&self, query: &TaskQuery) -> bool {
        !self
            .storage
            .consistent_read(|stores| stores.task_store.fetch_tasks(query))
            .is_empty()
    }

    /// Queues a run to launch once the prior run terminates, polling with a
    /// capped exponential backoff. Only one delayed run may wait per job.
    fn delayed_run(&self, query: TaskQuery, job: JobConfiguration) {
        let key = job.key.clone();
        tracing::info!(job = %key, "Waiting for prior run to terminate before launching");
        let first_for_job = self
            .pending_runs
            .lock()
            .expect("pending runs poisoned")
            .insert(key.clone(), job)
            .is_none();
        if first_for_job {
            let Some(manager) = self.self_ref.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                manager.run_when_terminated(query, key).await;
            });
        }
    }

    async fn run_when_terminated(self: Arc<Self>, query: TaskQuery, key: JobKey) {
        let mut backoff = self.config.cron_start_initial_backoff;
        loop {
            if !self.has_tasks(&query) {
                let job = self
                    .pending_runs
                    .lock()
                    .expect("pending runs poisoned")
                    .remove(&key);
                match job {
                    Some(job) => {
                        tracing::info!(job = %key, "Initiating delayed launch of cron job");
                        self.state_manager.insert_pending_tasks(job.task_configs());
                    }
                    None => {
                        tracing::warn!(job = %key, "Delayed run vanished before launch");
                    }
                }
                return;
            }
            tracing::debug!(
                job = %key,
                backoff_ms = backoff.as_millis() as u64,
                "Not yet safe to run cron job"
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!(job = %key, "Delayed cron run cancelled");
                    return;
                }
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.config.cron_start_max_backoff);
        }
    }
}
