//! In-memory storage façade.
//!
//! All authoritative state lives behind a single [`Storage`] handle. Reads
//! come in two flavors: `consistent_read` observes a snapshot not mixed
//! across concurrent writes, `weakly_consistent_read` makes no such promise
//! and is what hot paths (offer matching, periodic sweeps) should use.
//! Writes are serialized with all other writes. Every store yields clones on
//! read, so nothing a caller does to a returned value leaks back in.

pub mod attribute_store;
pub mod backfill;
pub mod job_store;
pub mod quota_store;
pub mod task_store;
pub mod update_store;

use std::sync::{Arc, RwLock};

use crate::config::SchedulerConfig;
use crate::events::{EventBus, SchedulerEvent};
use crate::ports::clock::Clock;

pub use attribute_store::AttributeStore;
pub use job_store::JobStore;
pub use quota_store::QuotaStore;
pub use task_store::TaskStore;
pub use update_store::UpdateStore;

/// The sub-stores visible inside a read or write.
pub struct Stores {
    pub task_store: TaskStore,
    pub job_store: JobStore,
    pub update_store: UpdateStore,
    pub quota_store: QuotaStore,
    pub attribute_store: AttributeStore,
}

pub struct Storage {
    stores: RwLock<Stores>,
    bus: Arc<EventBus>,
}

impl Storage {
    pub fn new(config: &SchedulerConfig, bus: Arc<EventBus>) -> Self {
        Self {
            stores: RwLock::new(Stores {
                task_store: TaskStore::new(config.slow_query_log_threshold),
                job_store: JobStore::new(),
                update_store: UpdateStore::new(),
                quota_store: QuotaStore::new(),
                attribute_store: AttributeStore::new(),
            }),
            bus,
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Runs `work` against a snapshot; concurrent writers wait, so the view
    /// is linearizable with respect to writes.
    pub fn consistent_read<T>(&self, work: impl FnOnce(&Stores) -> T) -> T {
        let stores = self.stores.read().expect("storage lock poisoned");
        work(&stores)
    }

    /// Runs `work` without any snapshot promise. Today this shares the read
    /// lock with `consistent_read`; callers must not rely on that.
    pub fn weakly_consistent_read<T>(&self, work: impl FnOnce(&Stores) -> T) -> T {
        let stores = self.stores.read().expect("storage lock poisoned");
        work(&stores)
    }

    /// Runs `work` in the single write critical section. Mutations that can
    /// fail must validate before touching the stores; there is no rollback.
    /// Post-commit side effects (events, driver commands) belong to the
    /// caller, to be flushed after this returns.
    pub fn write<T>(&self, work: impl FnOnce(&mut Stores) -> T) -> T {
        let mut stores = self.stores.write().expect("storage lock poisoned");
        work(&mut stores)
    }

    /// Repairs loaded state and announces readiness on the bus.
    pub fn start(&self, clock: &dyn Clock) {
        self.write(|stores| backfill::backfill(stores, clock));
        self.bus.publish(SchedulerEvent::StorageStarted);
    }
}

/// Convenience: fetch matching tasks under a consistent read.
pub fn consistent_fetch_tasks(
    storage: &Storage,
    query: &crate::base::query::TaskQuery,
) -> Vec<crate::model::task::ScheduledTask> {
    storage.consistent_read(|stores| stores.task_store.fetch_tasks(query))
}
