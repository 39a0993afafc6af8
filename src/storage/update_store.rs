use std::collections::HashMap;

use crate::base::job_key::JobKey;
use crate::model::update::JobUpdateConfiguration;

/// In-flight rolling updates, one per job key.
#[derive(Default)]
pub struct UpdateStore {
    configs: HashMap<JobKey, JobUpdateConfiguration>,
}

impl UpdateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_update_config(&mut self, config: JobUpdateConfiguration) {
        self.configs.insert(config.job_key.clone(), config);
    }

    pub fn fetch_update_config(&self, key: &JobKey) -> Option<JobUpdateConfiguration> {
        self.configs.get(key).cloned()
    }

    pub fn fetch_update_configs(&self, role: &str) -> Vec<JobUpdateConfiguration> {
        self.configs
            .values()
            .filter(|c| c.job_key.role == role)
            .cloned()
            .collect()
    }

    pub fn remove_update_config(&mut self, key: &JobKey) {
        self.configs.remove(key);
    }

    pub fn delete_all_update_configs(&mut self) {
        self.configs.clear();
    }
}
