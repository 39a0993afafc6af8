use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use crate::base::job_key::JobKey;
use crate::base::query::TaskQuery;
use crate::model::task::{ScheduledTask, TaskConfig};
use crate::stats;

/// In-memory task store.
///
/// The primary map is keyed by task id; a secondary index maps job keys to
/// the ids of their tasks. Both are maintained together under the storage
/// write lock. Reads hand out clones, so callers may freely mutate returned
/// tasks without touching stored state.
pub struct TaskStore {
    tasks: HashMap<String, ScheduledTask>,
    by_job_key: HashMap<JobKey, BTreeSet<String>>,
    slow_query_threshold: Duration,
}

impl TaskStore {
    pub fn new(slow_query_threshold: Duration) -> Self {
        Self {
            tasks: HashMap::new(),
            by_job_key: HashMap::new(),
            slow_query_threshold,
        }
    }

    /// Fetches clones of every task matching `query`.
    ///
    /// Dispatch rule: a query pinning task ids walks the id set, one
    /// resolving to a single job key walks the job-key index, anything else
    /// scans. The result is identical either way.
    pub fn fetch_tasks(&self, query: &TaskQuery) -> Vec<ScheduledTask> {
        let start = Instant::now();
        let result: Vec<ScheduledTask> = self
            .matching(query)
            .map(|task| task.clone())
            .collect();
        let elapsed = start.elapsed();
        if elapsed >= self.slow_query_threshold {
            tracing::info!(
                elapsed_ms = elapsed.as_millis() as u64,
                ?query,
                "Slow task query"
            );
        }
        result
    }

    pub fn fetch_task(&self, task_id: &str) -> Option<ScheduledTask> {
        self.tasks.get(task_id).cloned()
    }

    /// Saves new tasks. Ids must be unique within `new_tasks`; existing
    /// entries with the same id are replaced.
    pub fn save_tasks(&mut self, new_tasks: Vec<ScheduledTask>) {
        let distinct: BTreeSet<&str> = new_tasks.iter().map(|t| t.task_id()).collect();
        assert!(
            distinct.len() == new_tasks.len(),
            "proposed new tasks would create a task id collision"
        );
        for task in new_tasks {
            self.index(&task);
            self.tasks.insert(task.task_id().to_string(), task);
        }
    }

    /// Removes the given ids, returning the removed tasks.
    pub fn delete_tasks(&mut self, task_ids: impl IntoIterator<Item = String>) -> Vec<ScheduledTask> {
        let mut removed = Vec::new();
        for id in task_ids {
            if let Some(task) = self.tasks.remove(&id) {
                self.unindex(&task);
                removed.push(task);
            }
        }
        removed
    }

    pub fn delete_all_tasks(&mut self) {
        self.tasks.clear();
        self.by_job_key.clear();
    }

    /// Loads each task matching `query`, hands a mutable copy to `mutator`,
    /// and commits the copy only when its content changed. The task id is
    /// immutable; the indexes are kept consistent when a mutation moves a
    /// task between job keys.
    pub fn mutate_tasks(
        &mut self,
        query: &TaskQuery,
        mut mutator: impl FnMut(&mut ScheduledTask),
    ) -> Vec<ScheduledTask> {
        let ids: Vec<String> = self
            .matching(query)
            .map(|task| task.task_id().to_string())
            .collect();

        let mut mutated = Vec::new();
        for id in ids {
            let original = self
                .tasks
                .get(&id)
                .expect("id collected above")
                .clone();
            let mut mutable = original.clone();
            mutator(&mut mutable);
            if original != mutable {
                assert!(
                    mutable.task_id() == id,
                    "a task id may not be mutated"
                );
                self.unindex(&original);
                self.index(&mutable);
                mutated.push(mutable.clone());
                self.tasks.insert(id, mutable);
            }
        }
        mutated
    }

    /// Admin path: swaps a stored task's configuration in place, bypassing
    /// the immutability rule. Returns false when the task does not exist.
    pub fn unsafe_modify_in_place(&mut self, task_id: &str, config: TaskConfig) -> bool {
        match self.tasks.get_mut(task_id) {
            Some(stored) => {
                let old_key = stored.job_key();
                stored.assigned_task.task = config;
                let new_key = stored.job_key();
                if old_key != new_key {
                    let id = task_id.to_string();
                    Self::remove_index_entry(&mut self.by_job_key, &old_key, &id);
                    self.by_job_key.entry(new_key).or_default().insert(id);
                }
                true
            }
            None => false,
        }
    }

    fn index(&mut self, task: &ScheduledTask) {
        self.by_job_key
            .entry(task.job_key())
            .or_default()
            .insert(task.task_id().to_string());
    }

    fn unindex(&mut self, task: &ScheduledTask) {
        Self::remove_index_entry(
            &mut self.by_job_key,
            &task.job_key(),
            task.task_id(),
        );
    }

    fn remove_index_entry(
        index: &mut HashMap<JobKey, BTreeSet<String>>,
        key: &JobKey,
        task_id: &str,
    ) {
        if let Some(ids) = index.get_mut(key) {
            ids.remove(task_id);
            if ids.is_empty() {
                index.remove(key);
            }
        }
    }

    fn matching<'a>(&'a self, query: &'a TaskQuery) -> impl Iterator<Item = &'a ScheduledTask> {
        let from: Vec<&ScheduledTask> = if let Some(ids) = &query.task_ids {
            stats::bump_task_queries_by_id();
            ids.iter().filter_map(|id| self.tasks.get(id)).collect()
        } else if let Some(job_key) = query.job_key_hint() {
            stats::bump_task_queries_by_job();
            self.by_job_key
                .get(&job_key)
                .into_iter()
                .flatten()
                .filter_map(|id| self.tasks.get(id))
                .collect()
        } else {
            stats::bump_task_queries_all();
            self.tasks.values().collect()
        };
        from.into_iter().filter(move |task| query.matches(task))
    }
}
