//! Periodically reclaims slots from low-priority tasks for pending work.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::base::query::TaskQuery;
use crate::base::tasks;
use crate::filter::SchedulingFilter;
use crate::model::resources::Resources;
use crate::model::task::{ScheduledTask, TaskStatus};
use crate::ports::clock::Clock;
use crate::scheduler::core::SchedulerCore;
use crate::stats;
use crate::storage::Storage;

/// Finds PENDING tasks that cannot schedule and preempts cheaper running
/// tasks that would make room for them.
///
/// The candidate slot is sized from the victim's reserved resources alone;
/// free capacity already on the victim's host is not considered. A 2-CPU
/// candidate therefore cannot displace a 1-CPU victim even when the host has
/// another CPU idle. Callers rely on this conservatism; do not widen it.
pub struct Preempter {
    storage: Arc<Storage>,
    scheduler: Arc<SchedulerCore>,
    filter: Arc<dyn SchedulingFilter>,
    clock: Arc<dyn Clock>,
    candidacy_delay: Duration,
}

impl Preempter {
    pub fn new(
        storage: Arc<Storage>,
        scheduler: Arc<SchedulerCore>,
        filter: Arc<dyn SchedulingFilter>,
        clock: Arc<dyn Clock>,
        candidacy_delay: Duration,
    ) -> Self {
        Self {
            storage,
            scheduler,
            filter,
            clock,
            candidacy_delay,
        }
    }

    /// One preemption pass. Each victim gives up at most one slot per pass.
    pub fn run_once(&self) {
        let now = self.clock.now_millis();
        let delay_ms = self.candidacy_delay.as_millis() as i64;

        // Tasks must have idled in PENDING past the candidacy delay before
        // they may displace running work, bounding churn.
        let mut pending: Vec<ScheduledTask> = self
            .storage
            .consistent_read(|stores| {
                stores
                    .task_store
                    .fetch_tasks(&TaskQuery::status_scoped([TaskStatus::Pending]))
            })
            .into_iter()
            .filter(|task| now - tasks::latest_event_timestamp(task) >= delay_ms)
            .collect();
        if pending.is_empty() {
            return;
        }
        tasks::sort_for_scheduling(&mut pending);

        let active_not_pending: Vec<TaskStatus> = tasks::ACTIVE_STATES
            .iter()
            .copied()
            .filter(|s| *s != TaskStatus::Pending)
            .collect();
        let mut victims = self.storage.consistent_read(|stores| {
            stores
                .task_store
                .fetch_tasks(&TaskQuery::status_scoped(active_not_pending))
        });
        if victims.is_empty() {
            return;
        }
        tasks::sort_for_preemption(&mut victims);

        for victim in &victims {
            let Some(host) = victim.assigned_task.slave_host.as_deref() else {
                continue;
            };
            let slot = Resources::from_task(victim.config());

            let preempting = pending
                .iter()
                .position(|candidate| {
                    may_preempt(candidate, victim)
                        && self
                            .filter
                            .filter(&slot, host, candidate.config(), candidate.task_id())
                            .is_empty()
                })
                .map(|index| pending.remove(index));

            if let Some(candidate) = preempting {
                match self.scheduler.preempt_task(victim, &candidate) {
                    Ok(()) => {
                        stats::bump_tasks_preempted();
                        tracing::info!(
                            victim = %victim.task_id(),
                            candidate = %candidate.task_id(),
                            host,
                            "Task preempted"
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            victim = %victim.task_id(),
                            error = %e,
                            "Preemption failed"
                        );
                    }
                }
            }
        }
    }

    /// Runs preemption passes on an interval until cancelled.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Preempter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let preempter = self.clone();
                    // The pass is synchronous storage work; keep it off the
                    // timer task so a slow pass cannot delay shutdown.
                    tokio::task::spawn_blocking(move || preempter.run_once())
                        .await
                        .ok();
                }
            }
        }
    }
}

/// A candidate may displace `victim` when the candidate is production work
/// crowding out non-production, or when both belong to the same role and the
/// candidate outranks the victim.
fn may_preempt(candidate: &ScheduledTask, victim: &ScheduledTask) -> bool {
    let candidate = candidate.config();
    let victim = victim.config();
    (candidate.production && !victim.production)
        || (candidate.owner.role == victim.owner.role && candidate.priority > victim.priority)
}
