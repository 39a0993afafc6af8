//! Drives every task status mutation and the bookkeeping that hangs off it:
//! successor creation, update tokens and shard modifications, and the kill
//! commands owed to the driver.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::base::job_key::JobKey;
use crate::base::query::TaskQuery;
use crate::error::{Result, SchedulerError};
use crate::events::SchedulerEvent;
use crate::model::task::{
    AssignedTask, ScheduledTask, TaskConfig, TaskEvent, TaskStatus,
};
use crate::model::update::{
    JobUpdateConfiguration, ShardUpdateResult, TaskUpdateConfiguration, UpdateResult,
};
use crate::ports::clock::Clock;
use crate::ports::driver::Driver;
use crate::state::machine;
use crate::storage::{Storage, Stores};

const UPDATE_TOKEN_LENGTH: usize = 24;

pub type TaskIdGenerator = dyn Fn(&TaskConfig) -> String + Send + Sync;

/// Side effects accumulated during a storage write and flushed after the
/// write lock is released: the driver is never called and no event is
/// delivered while the lock is held.
#[derive(Default)]
struct SideEffects {
    events: Vec<SchedulerEvent>,
    kills: Vec<String>,
}

/// Which configuration a terminal task's successor should run.
enum Successor {
    None,
    /// Same config; optionally charges a failure.
    Same { charge_failure: bool },
    /// Config drawn from the registered update for the task's shard.
    FromUpdate { rolling_forward: bool },
}

pub struct StateManager {
    storage: Arc<Storage>,
    clock: Arc<dyn Clock>,
    driver: Arc<dyn Driver>,
    id_generator: Box<TaskIdGenerator>,
}

impl StateManager {
    pub fn new(storage: Arc<Storage>, clock: Arc<dyn Clock>, driver: Arc<dyn Driver>) -> Self {
        let generator_clock = clock.clone();
        let id_generator = Box::new(move |config: &TaskConfig| {
            format!(
                "{}-{}-{}-{}-{}",
                generator_clock.now_millis(),
                config.owner.role,
                config.environment,
                config.job_name,
                config.shard_id
            ) + &format!("-{}", uuid::Uuid::new_v4().simple())
        });
        Self {
            storage,
            clock,
            driver,
            id_generator,
        }
    }

    /// Replaces the task id generator; used by tests that need stable ids.
    pub fn with_id_generator(
        mut self,
        generator: impl Fn(&TaskConfig) -> String + Send + Sync + 'static,
    ) -> Self {
        self.id_generator = Box::new(generator);
        self
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Creates one PENDING task per config, returning the new ids.
    pub fn insert_pending_tasks(&self, configs: impl IntoIterator<Item = TaskConfig>) -> Vec<String> {
        let configs: Vec<TaskConfig> = configs.into_iter().collect();
        let mut effects = SideEffects::default();
        let ids = self.storage.write(|stores| {
            configs
                .into_iter()
                .map(|config| {
                    let id = (self.id_generator)(&config);
                    self.insert_pending(stores, &mut effects, id.clone(), config, None, 0);
                    id
                })
                .collect()
        });
        self.flush(effects);
        ids
    }

    /// Requests `status` for every task matching `query`. Illegal moves are
    /// logged and skipped; the return value is the number of tasks actually
    /// changed.
    pub fn change_state(
        &self,
        query: &TaskQuery,
        status: TaskStatus,
        message: Option<String>,
    ) -> usize {
        let mut effects = SideEffects::default();
        let changed = self.storage.write(|stores| {
            let ids: Vec<String> = stores
                .task_store
                .fetch_tasks(query)
                .into_iter()
                .map(|t| t.task_id().to_string())
                .collect();
            ids.into_iter()
                .filter(|id| {
                    self.apply_transition(stores, &mut effects, id, status, message.as_deref())
                })
                .count()
        });
        self.flush(effects);
        changed
    }

    /// Fixes a PENDING task to a slot: host, slave id and the port mapping
    /// become immutable from here on. Ports are paired with requested port
    /// names in name order.
    pub fn assign_task(
        &self,
        task_id: &str,
        host: &str,
        slave_id: &str,
        ports: BTreeSet<u16>,
    ) -> Result<AssignedTask> {
        let mut effects = SideEffects::default();
        let assigned = self.storage.write(|stores| {
            let task = stores.task_store.fetch_task(task_id).ok_or_else(|| {
                SchedulerError::Schedule(format!("Task {task_id} does not exist"))
            })?;
            if task.status != TaskStatus::Pending {
                return Err(SchedulerError::Schedule(format!(
                    "Task {task_id} is {}, not PENDING",
                    task.status
                )));
            }

            let port_mapping: BTreeMap<String, u16> = task
                .config()
                .requested_ports
                .iter()
                .cloned()
                .zip(ports.iter().copied())
                .collect();

            let now = self.clock.now_millis();
            let mutated = stores.task_store.mutate_tasks(&TaskQuery::by_id(task_id), |t| {
                t.status = TaskStatus::Assigned;
                t.task_events
                    .push(TaskEvent::new(now, TaskStatus::Assigned));
                t.assigned_task.slave_host = Some(host.to_string());
                t.assigned_task.slave_id = Some(slave_id.to_string());
                t.assigned_task.assigned_ports = port_mapping.clone();
            });
            let updated = mutated
                .into_iter()
                .next()
                .expect("assignment always changes the task");
            effects.events.push(SchedulerEvent::TaskStateChange {
                task: updated.clone(),
                old_status: TaskStatus::Pending,
            });
            Ok(updated.assigned_task)
        });
        self.flush(effects);
        assigned
    }

    /// Removes tasks outright, publishing `TasksDeleted` for those found.
    pub fn delete_tasks(&self, task_ids: impl IntoIterator<Item = String>) {
        let ids: Vec<String> = task_ids.into_iter().collect();
        let mut effects = SideEffects::default();
        self.storage
            .write(|stores| self.delete_inner(stores, &mut effects, ids));
        self.flush(effects);
    }

    /// Registers a rolling update pairing each shard's current config with
    /// its replacement, returning the opaque token that authorizes
    /// subsequent shard modifications.
    pub fn register_update(
        &self,
        job_key: &JobKey,
        new_configs: Vec<TaskConfig>,
    ) -> Result<String> {
        if new_configs.is_empty() {
            return Err(SchedulerError::Update(
                "Update requires at least one task config".to_string(),
            ));
        }
        self.storage.write(|stores| {
            if stores.update_store.fetch_update_config(job_key).is_some() {
                return Err(SchedulerError::Update(format!(
                    "Update already in progress for {job_key}"
                )));
            }
            let existing = stores
                .task_store
                .fetch_tasks(&TaskQuery::job_scoped(job_key).active());
            if existing.is_empty() {
                return Err(SchedulerError::Schedule(format!(
                    "Update requested for job with no active tasks: {job_key}"
                )));
            }

            let mut configs: BTreeMap<u32, TaskUpdateConfiguration> = BTreeMap::new();
            for task in &existing {
                configs
                    .entry(task.shard_id())
                    .or_insert_with(|| TaskUpdateConfiguration {
                        old_config: None,
                        new_config: None,
                    })
                    .old_config = Some(task.config().clone());
            }
            for config in new_configs {
                let shard_id = config.shard_id;
                configs
                    .entry(shard_id)
                    .or_insert_with(|| TaskUpdateConfiguration {
                        old_config: None,
                        new_config: None,
                    })
                    .new_config = Some(config);
            }

            let token: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(UPDATE_TOKEN_LENGTH)
                .map(char::from)
                .collect();
            stores.update_store.save_update_config(JobUpdateConfiguration {
                job_key: job_key.clone(),
                update_token: token.clone(),
                configs,
            });
            tracing::info!(job = %job_key, "Update registered");
            Ok(token)
        })
    }

    /// Rolls the given shards forward to their new configs, or backward to
    /// their originals. Active tasks whose config differs from the target
    /// enter UPDATING (forward) or ROLLBACK (backward); their successor is
    /// created from the stored update when the kill lands.
    pub fn modify_shards(
        &self,
        job_key: &JobKey,
        user: &str,
        shards: impl IntoIterator<Item = u32>,
        token: &str,
        rolling_forward: bool,
    ) -> Result<BTreeMap<u32, ShardUpdateResult>> {
        let shards: BTreeSet<u32> = shards.into_iter().collect();
        let mut effects = SideEffects::default();
        let results = self.storage.write(|stores| {
            let update = stores
                .update_store
                .fetch_update_config(job_key)
                .ok_or_else(|| {
                    SchedulerError::Update(format!("No update in progress for {job_key}"))
                })?;
            if update.update_token != token {
                return Err(SchedulerError::Update("Invalid update token".to_string()));
            }

            let target_status = if rolling_forward {
                TaskStatus::Updating
            } else {
                TaskStatus::Rollback
            };

            // Resolve every requested shard before touching any task, so an
            // unknown shard id aborts with no visible effect.
            let mut targets = Vec::new();
            for shard in shards {
                if !update.configs.contains_key(&shard) {
                    return Err(SchedulerError::Update(format!(
                        "No update configuration for shard {shard} of {job_key}"
                    )));
                }
                targets.push((shard, update.target_config(shard, rolling_forward).cloned()));
            }

            let mut results = BTreeMap::new();
            for (shard, target) in targets {
                let active = stores
                    .task_store
                    .fetch_tasks(&TaskQuery::shard_scoped(job_key, [shard]).active())
                    .into_iter()
                    .next();

                let result = match (active, target) {
                    (Some(task), Some(config)) if *task.config() == config => {
                        ShardUpdateResult::Unchanged
                    }
                    (Some(task), Some(_)) => {
                        let note = format!("Update initiated by {user}");
                        self.apply_transition(
                            stores,
                            &mut effects,
                            task.task_id(),
                            target_status,
                            Some(note.as_str()),
                        );
                        ShardUpdateResult::Restarting
                    }
                    (Some(task), None) => {
                        let note = format!("Shard removed by update from {user}");
                        self.apply_transition(
                            stores,
                            &mut effects,
                            task.task_id(),
                            TaskStatus::Killing,
                            Some(note.as_str()),
                        );
                        ShardUpdateResult::Completed
                    }
                    (None, Some(config)) => {
                        let id = (self.id_generator)(&config);
                        self.insert_pending(stores, &mut effects, id, config, None, 0);
                        ShardUpdateResult::Added
                    }
                    (None, None) => ShardUpdateResult::Unchanged,
                };
                results.insert(shard, result);
            }
            Ok(results)
        });
        self.flush(effects);
        results
    }

    /// Closes out a registered update. Fails while any task of the job is
    /// still UPDATING or ROLLBACK, since losing the stored configs would
    /// strand those shards. With no update present this is an error when the
    /// caller expected one, and an idempotent no-op (`false`) otherwise.
    pub fn finish_update(
        &self,
        job_key: &JobKey,
        user: &str,
        token: Option<&str>,
        result: UpdateResult,
        expect_update_config: bool,
    ) -> Result<bool> {
        self.storage.write(|stores| {
            let Some(update) = stores.update_store.fetch_update_config(job_key) else {
                if expect_update_config {
                    return Err(SchedulerError::Update(format!(
                        "Update does not exist for {job_key}"
                    )));
                }
                return Ok(false);
            };

            if let Some(token) = token {
                if update.update_token != token {
                    return Err(SchedulerError::Update("Invalid update token".to_string()));
                }
            }

            let in_flight = stores.task_store.fetch_tasks(&TaskQuery {
                statuses: Some(
                    [TaskStatus::Updating, TaskStatus::Rollback]
                        .into_iter()
                        .collect(),
                ),
                ..TaskQuery::job_scoped(job_key)
            });
            if !in_flight.is_empty() {
                return Err(SchedulerError::Update(format!(
                    "Update in progress for {job_key}: {} tasks still updating",
                    in_flight.len()
                )));
            }

            stores.update_store.remove_update_config(job_key);
            tracing::info!(job = %job_key, user, result = ?result, "Update finished");
            Ok(true)
        })
    }

    fn insert_pending(
        &self,
        stores: &mut Stores,
        effects: &mut SideEffects,
        task_id: String,
        config: TaskConfig,
        ancestor_task_id: Option<String>,
        failure_count: u32,
    ) {
        let now = self.clock.now_millis();
        let mut task = ScheduledTask {
            assigned_task: AssignedTask::unassigned(task_id, config),
            status: TaskStatus::Init,
            task_events: vec![TaskEvent::new(now, TaskStatus::Init)],
            ancestor_task_id,
            failure_count,
        };
        task.status = TaskStatus::Pending;
        task.task_events.push(TaskEvent::new(now, TaskStatus::Pending));
        stores.task_store.save_tasks(vec![task.clone()]);
        effects.events.push(SchedulerEvent::TaskStateChange {
            task,
            old_status: TaskStatus::Init,
        });
    }

    fn delete_inner(
        &self,
        stores: &mut Stores,
        effects: &mut SideEffects,
        task_ids: Vec<String>,
    ) {
        let removed = stores.task_store.delete_tasks(task_ids);
        if !removed.is_empty() {
            effects
                .events
                .push(SchedulerEvent::TasksDeleted { tasks: removed });
        }
    }

    /// Applies one transition to one task inside the current write,
    /// returning whether the task changed.
    fn apply_transition(
        &self,
        stores: &mut Stores,
        effects: &mut SideEffects,
        task_id: &str,
        to: TaskStatus,
        message: Option<&str>,
    ) -> bool {
        let Some(task) = stores.task_store.fetch_task(task_id) else {
            return false;
        };
        let from = task.status;

        // An UNKNOWN report while waiting out a kill means the task is gone
        // but the terminal update was lost; drop it.
        if to == TaskStatus::Unknown {
            if machine::is_awaiting_kill(from) {
                self.delete_inner(stores, effects, vec![task_id.to_string()]);
                return true;
            }
            tracing::warn!(task_id, %from, "Ignoring UNKNOWN for live task");
            return false;
        }

        // Killing a PENDING task: no process ever existed, so the task is
        // simply removed.
        if from == TaskStatus::Pending && to == TaskStatus::Killing {
            self.delete_inner(stores, effects, vec![task_id.to_string()]);
            return true;
        }

        if !machine::is_legal(from, to) {
            tracing::warn!(task_id, %from, %to, "Illegal state transition requested");
            return false;
        }

        let now = self.clock.now_millis();
        let mutated = stores.task_store.mutate_tasks(&TaskQuery::by_id(task_id), |t| {
            t.status = to;
            let mut event = TaskEvent::new(now, to);
            if let Some(message) = message {
                event = event.with_message(message);
            }
            t.task_events.push(event);
        });
        let Some(updated) = mutated.into_iter().next() else {
            return false;
        };

        if machine::requires_kill(to) {
            effects.kills.push(task_id.to_string());
        }
        effects.events.push(SchedulerEvent::TaskStateChange {
            task: updated.clone(),
            old_status: from,
        });

        if to.is_terminal() {
            self.maybe_reschedule(stores, effects, &updated, from);
        }
        true
    }

    /// Creates a successor for a task that just went terminal, when the
    /// lifecycle calls for one.
    fn maybe_reschedule(
        &self,
        stores: &mut Stores,
        effects: &mut SideEffects,
        task: &ScheduledTask,
        from: TaskStatus,
    ) {
        let config = task.config();
        let successor = match task.status {
            TaskStatus::Failed => {
                if config.is_service || task.failure_count < config.max_task_failures {
                    Successor::Same { charge_failure: true }
                } else {
                    Successor::None
                }
            }
            TaskStatus::Finished => match from {
                TaskStatus::Updating => Successor::FromUpdate { rolling_forward: true },
                TaskStatus::Rollback => Successor::FromUpdate { rolling_forward: false },
                _ if config.is_service => Successor::Same { charge_failure: false },
                _ => Successor::None,
            },
            TaskStatus::Killed => match from {
                TaskStatus::Killing => Successor::None,
                TaskStatus::Preempting | TaskStatus::Restarting => {
                    Successor::Same { charge_failure: false }
                }
                TaskStatus::Updating => Successor::FromUpdate { rolling_forward: true },
                TaskStatus::Rollback => Successor::FromUpdate { rolling_forward: false },
                _ if config.is_service => Successor::Same { charge_failure: false },
                _ => Successor::None,
            },
            TaskStatus::Lost => match from {
                TaskStatus::Killing => Successor::None,
                TaskStatus::Updating => Successor::FromUpdate { rolling_forward: true },
                TaskStatus::Rollback => Successor::FromUpdate { rolling_forward: false },
                _ => Successor::Same { charge_failure: false },
            },
            _ => Successor::None,
        };

        match successor {
            Successor::None => {}
            Successor::Same { charge_failure } => {
                let failure_count = task.failure_count + u32::from(charge_failure);
                let config = config.clone();
                let id = (self.id_generator)(&config);
                tracing::info!(
                    ancestor = %task.task_id(),
                    successor = %id,
                    "Rescheduling task"
                );
                self.insert_pending(
                    stores,
                    effects,
                    id,
                    config,
                    Some(task.task_id().to_string()),
                    failure_count,
                );
            }
            Successor::FromUpdate { rolling_forward } => {
                let target = stores
                    .update_store
                    .fetch_update_config(&task.job_key())
                    .and_then(|u| u.target_config(task.shard_id(), rolling_forward).cloned());
                match target {
                    Some(config) => {
                        let id = (self.id_generator)(&config);
                        tracing::info!(
                            ancestor = %task.task_id(),
                            successor = %id,
                            rolling_forward,
                            "Rescheduling task on update config"
                        );
                        self.insert_pending(
                            stores,
                            effects,
                            id,
                            config,
                            Some(task.task_id().to_string()),
                            0,
                        );
                    }
                    None => {
                        tracing::warn!(
                            task_id = %task.task_id(),
                            "No update config for terminal updating task; not rescheduling"
                        );
                    }
                }
            }
        }
    }

    /// Dispatches buffered side effects. Only ever called after the storage
    /// write guard is dropped.
    fn flush(&self, effects: SideEffects) {
        for task_id in effects.kills {
            self.driver.kill_task(&task_id);
        }
        let bus = self.storage.event_bus();
        for event in effects.events {
            bus.publish(event);
        }
    }
}
