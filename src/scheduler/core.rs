//! Matches pending tasks against resource offers and routes driver status
//! updates into the state machine.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::base::job_key::JobKey;
use crate::base::query::TaskQuery;
use crate::base::tasks;
use crate::config::SchedulerConfig;
use crate::configuration;
use crate::error::{Result, SchedulerError};
use crate::filter::SchedulingFilter;
use crate::model::job::JobConfiguration;
use crate::model::task::{ScheduledTask, TaskStatus};
use crate::ports::codec::Codec;
use crate::ports::driver::{Driver, HostOffer, StatusUpdate, TaskDescription};
use crate::scheduler::reservations::Reservations;
use crate::state::StateManager;
use crate::storage::Storage;

pub struct SchedulerCore {
    storage: Arc<Storage>,
    state_manager: Arc<StateManager>,
    filter: Arc<dyn SchedulingFilter>,
    driver: Arc<dyn Driver>,
    codec: Arc<dyn Codec>,
    config: SchedulerConfig,
    reservations: Reservations,
}

impl SchedulerCore {
    pub fn new(
        storage: Arc<Storage>,
        state_manager: Arc<StateManager>,
        filter: Arc<dyn SchedulingFilter>,
        driver: Arc<dyn Driver>,
        codec: Arc<dyn Codec>,
        config: SchedulerConfig,
        reservations: Reservations,
    ) -> Self {
        Self {
            storage,
            state_manager,
            filter,
            driver,
            codec,
            config,
            reservations,
        }
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    /// Admits a non-cron job: validates, populates defaults, and creates its
    /// PENDING tasks. Cron jobs go through the cron job manager instead.
    pub fn create_job(&self, job: &JobConfiguration) -> Result<Vec<String>> {
        let populated = configuration::validate_and_populate(job, &self.config)?;
        if populated.is_cron() {
            return Err(SchedulerError::Schedule(format!(
                "Cron job {} must be received by the cron job manager",
                populated.key
            )));
        }

        let existing = self.storage.consistent_read(|stores| {
            stores
                .task_store
                .fetch_tasks(&TaskQuery::job_scoped(&populated.key).active())
        });
        if !existing.is_empty() {
            return Err(SchedulerError::Schedule(format!(
                "Job already exists: {}",
                populated.key
            )));
        }

        Ok(self
            .state_manager
            .insert_pending_tasks(populated.task_configs()))
    }

    /// Considers an offer against pending tasks in scheduling order. At most
    /// one task is launched per offer; an offer that places nothing is
    /// returned to the driver rather than retained.
    pub fn offer(&self, offer: &HostOffer) {
        let usable = offer.resources().minus_executor_overhead(
            self.config.executor_cpu_reservation,
            self.config.executor_ram_reservation_mb,
        );

        let mut pending = self.storage.weakly_consistent_read(|stores| {
            stores
                .task_store
                .fetch_tasks(&TaskQuery::status_scoped([TaskStatus::Pending]))
        });
        tasks::sort_for_scheduling(&mut pending);

        // A reserved host is held for the task that justified a preemption.
        if let Some(reserved) = self.reservations.reserved_task(&offer.host) {
            if pending.iter().any(|t| t.task_id() == reserved) {
                pending.retain(|t| t.task_id() == reserved);
            } else {
                self.reservations.release(&offer.host);
            }
        }

        for candidate in &pending {
            let vetoes = self.filter.filter(
                &usable,
                &offer.host,
                candidate.config(),
                candidate.task_id(),
            );
            if !vetoes.is_empty() {
                tracing::debug!(
                    task_id = %candidate.task_id(),
                    host = %offer.host,
                    ?vetoes,
                    "Placement vetoed"
                );
                continue;
            }
            if self.launch(offer, candidate) {
                return;
            }
        }

        self.driver.cancel_offer(&offer.offer_id);
    }

    fn launch(&self, offer: &HostOffer, candidate: &ScheduledTask) -> bool {
        let payload = match self.codec.encode(candidate.config()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(
                    task_id = %candidate.task_id(),
                    error = %e,
                    "Failed to encode executor payload; skipping offer"
                );
                self.driver.cancel_offer(&offer.offer_id);
                return true;
            }
        };

        let ports: BTreeSet<u16> = offer
            .free_ports()
            .into_iter()
            .take(candidate.config().requested_ports.len())
            .collect();

        let assigned = match self.state_manager.assign_task(
            candidate.task_id(),
            &offer.host,
            &offer.slave_id,
            ports,
        ) {
            Ok(assigned) => assigned,
            Err(e) => {
                tracing::warn!(
                    task_id = %candidate.task_id(),
                    error = %e,
                    "Assignment lost a race; trying next candidate"
                );
                return false;
            }
        };

        self.reservations.release(&offer.host);
        tracing::info!(
            task_id = %assigned.task_id,
            host = %offer.host,
            ports = ?assigned.assigned_ports,
            "Task assigned"
        );
        self.driver.launch_task(TaskDescription {
            offer_id: offer.offer_id.clone(),
            task_id: assigned.task_id.clone(),
            slave_id: offer.slave_id.clone(),
            assigned_ports: assigned.assigned_ports.clone(),
            payload,
        });
        true
    }

    /// Applies a driver status report. Reports for unknown ids instruct the
    /// driver to kill the stray process; nothing is written.
    pub fn status_update(&self, update: &StatusUpdate) {
        let known = self.storage.weakly_consistent_read(|stores| {
            stores.task_store.fetch_task(&update.task_id).is_some()
        });
        if !known {
            tracing::warn!(task_id = %update.task_id, "Status update for unknown task");
            self.driver.kill_task(&update.task_id);
            return;
        }
        self.state_manager.change_state(
            &TaskQuery::by_id(update.task_id.clone()),
            update.status,
            update.message.clone(),
        );
    }

    /// Kills every active task matching `query`.
    pub fn kill_tasks(&self, query: &TaskQuery, user: &str) -> Result<()> {
        let changed = self.state_manager.change_state(
            &query.clone().active(),
            TaskStatus::Killing,
            Some(format!("Killed by {user}")),
        );
        if changed == 0 {
            return Err(SchedulerError::Schedule(
                "No tasks matched query".to_string(),
            ));
        }
        Ok(())
    }

    /// Restarts the given shards of a job; each task is killed and a
    /// successor takes its place.
    pub fn restart_shards(
        &self,
        job_key: &JobKey,
        shards: impl IntoIterator<Item = u32>,
        user: &str,
    ) -> Result<()> {
        let query = TaskQuery::shard_scoped(job_key, shards).active();
        let changed = self.state_manager.change_state(
            &query,
            TaskStatus::Restarting,
            Some(format!("Restarted by {user}")),
        );
        if changed == 0 {
            return Err(SchedulerError::Schedule(format!(
                "No active shards matched for {job_key}"
            )));
        }
        Ok(())
    }

    /// Kills `victim` to make room for `candidate`, reserving the victim's
    /// host so the freed offer is steered back to the candidate.
    pub fn preempt_task(&self, victim: &ScheduledTask, candidate: &ScheduledTask) -> Result<()> {
        let changed = self.state_manager.change_state(
            &TaskQuery::by_id(victim.task_id().to_string()),
            TaskStatus::Preempting,
            Some(format!("Preempting in favor of {}", candidate.task_id())),
        );
        if changed == 0 {
            return Err(SchedulerError::Schedule(format!(
                "Failed to preempt {}",
                victim.task_id()
            )));
        }
        if let Some(host) = victim.assigned_task.slave_host.as_deref() {
            self.reservations.reserve(host, candidate.task_id());
        }
        Ok(())
    }
}
