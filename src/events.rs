//! Best-effort pub/sub for scheduler state changes.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::filter::Veto;
use crate::model::task::{ScheduledTask, TaskStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// Storage finished loading and is ready for subscribers to act on.
    StorageStarted,
    /// A task committed a state transition.
    TaskStateChange {
        task: ScheduledTask,
        old_status: TaskStatus,
    },
    /// Tasks were removed from storage.
    TasksDeleted { tasks: Vec<ScheduledTask> },
    /// The scheduling filter rejected a placement.
    Vetoed {
        task_id: String,
        vetoes: BTreeSet<Veto>,
    },
}

type Subscriber = Arc<dyn Fn(&SchedulerEvent) + Send + Sync>;

/// Queued event dispatcher.
///
/// Events are enqueued and drained by whichever publisher finds the queue
/// idle, so a subscriber that publishes again (directly or by driving another
/// state change) appends to the queue instead of recursing. Delivery order is
/// commit order. Subscribers must not block.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    queue: Mutex<VecDeque<SchedulerEvent>>,
    draining: AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: impl Fn(&SchedulerEvent) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .expect("event bus subscribers poisoned")
            .push(Arc::new(subscriber));
    }

    pub fn publish(&self, event: SchedulerEvent) {
        self.queue
            .lock()
            .expect("event bus queue poisoned")
            .push_back(event);

        // Whoever wins the drain flag delivers everything queued, including
        // events enqueued by subscribers while draining.
        if self.draining.swap(true, Ordering::Acquire) {
            return;
        }
        loop {
            loop {
                let next = self
                    .queue
                    .lock()
                    .expect("event bus queue poisoned")
                    .pop_front();
                let Some(next) = next else { break };
                let subscribers: Vec<Subscriber> = self
                    .subscribers
                    .lock()
                    .expect("event bus subscribers poisoned")
                    .clone();
                for subscriber in subscribers {
                    subscriber(&next);
                }
            }
            self.draining.store(false, Ordering::Release);
            if self.queue.lock().expect("event bus queue poisoned").is_empty()
                || self.draining.swap(true, Ordering::Acquire)
            {
                break;
            }
        }
    }
}
