use std::collections::HashMap;

use crate::base::job_key::JobKey;
use crate::model::job::JobConfiguration;

/// Accepted job configurations, grouped by the manager that owns them
/// (e.g. "CRON").
#[derive(Default)]
pub struct JobStore {
    jobs: HashMap<String, HashMap<JobKey, JobConfiguration>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_accepted_job(&mut self, manager_id: &str, job: JobConfiguration) {
        self.jobs
            .entry(manager_id.to_string())
            .or_default()
            .insert(job.key.clone(), job);
    }

    pub fn fetch_job(&self, manager_id: &str, key: &JobKey) -> Option<JobConfiguration> {
        self.jobs.get(manager_id).and_then(|m| m.get(key)).cloned()
    }

    pub fn fetch_jobs(&self, manager_id: &str) -> Vec<JobConfiguration> {
        self.jobs
            .get(manager_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn fetch_manager_ids(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    /// Removes the job from whichever manager holds it.
    pub fn remove_job(&mut self, key: &JobKey) {
        for jobs in self.jobs.values_mut() {
            jobs.remove(key);
        }
    }

    pub fn delete_all_jobs(&mut self) {
        self.jobs.clear();
    }
}
