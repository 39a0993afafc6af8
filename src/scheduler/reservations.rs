use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Hosts earmarked for a specific pending task.
///
/// When the preempter kills a victim, the freed slot should go to the
/// candidate that justified the kill, not to whichever pending task sorts
/// first when the offer comes back. A reservation steers the next offer from
/// that host to the candidate; it is consumed on assignment and dropped when
/// the candidate is no longer pending.
#[derive(Clone, Default)]
pub struct Reservations {
    by_host: Arc<Mutex<HashMap<String, String>>>,
}

impl Reservations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&self, host: &str, task_id: &str) {
        self.by_host
            .lock()
            .expect("reservations poisoned")
            .insert(host.to_string(), task_id.to_string());
    }

    pub fn reserved_task(&self, host: &str) -> Option<String> {
        self.by_host
            .lock()
            .expect("reservations poisoned")
            .get(host)
            .cloned()
    }

    pub fn release(&self, host: &str) {
        self.by_host
            .lock()
            .expect("reservations poisoned")
            .remove(host);
    }
}
