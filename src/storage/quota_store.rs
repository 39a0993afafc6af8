use std::collections::HashMap;

use crate::model::resources::Quota;

/// Per-role resource allotments. Only production tasks draw against quota;
/// the accounting arithmetic lives outside the core.
#[derive(Default)]
pub struct QuotaStore {
    quotas: HashMap<String, Quota>,
}

impl QuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_quota(&mut self, role: &str, quota: Quota) {
        self.quotas.insert(role.to_string(), quota);
    }

    pub fn fetch_quota(&self, role: &str) -> Option<Quota> {
        self.quotas.get(role).copied()
    }

    pub fn fetch_quota_roles(&self) -> Vec<String> {
        self.quotas.keys().cloned().collect()
    }

    pub fn remove_quota(&mut self, role: &str) {
        self.quotas.remove(role);
    }
}
