use std::collections::BTreeSet;
use std::sync::Arc;

use crate::events::{EventBus, SchedulerEvent};
use crate::filter::{SchedulingFilter, Veto};
use crate::model::resources::Resources;
use crate::model::task::TaskConfig;

/// Decorator that publishes a `Vetoed` event whenever the wrapped filter
/// rejects a placement. Results are unchanged; the bus is best-effort and
/// subscribers must not block the filter.
pub struct NotifyingSchedulingFilter<F> {
    inner: F,
    bus: Arc<EventBus>,
}

impl<F: SchedulingFilter> NotifyingSchedulingFilter<F> {
    pub fn new(inner: F, bus: Arc<EventBus>) -> Self {
        Self { inner, bus }
    }
}

impl<F: SchedulingFilter> SchedulingFilter for NotifyingSchedulingFilter<F> {
    fn filter(
        &self,
        slot: &Resources,
        host: &str,
        task: &TaskConfig,
        task_id: &str,
    ) -> BTreeSet<Veto> {
        let vetoes = self.inner.filter(slot, host, task, task_id);
        if !vetoes.is_empty() {
            self.bus.publish(SchedulerEvent::Vetoed {
                task_id: task_id.to_string(),
                vetoes: vetoes.clone(),
            });
        }
        vetoes
    }
}
