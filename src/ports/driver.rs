use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::resources::Resources;
use crate::model::task::TaskStatus;

/// A snapshot of unreserved resources on one worker host, presented by the
/// cluster-manager driver.
#[derive(Debug, Clone, PartialEq)]
pub struct HostOffer {
    pub offer_id: String,
    pub slave_id: String,
    pub host: String,
    pub num_cpus: f64,
    pub ram_mb: u64,
    pub disk_mb: u64,
    /// Inclusive port ranges available on the host.
    pub port_ranges: Vec<(u16, u16)>,
}

impl HostOffer {
    pub fn resources(&self) -> Resources {
        Resources::new(
            self.num_cpus,
            self.ram_mb,
            self.disk_mb,
            self.free_ports().len(),
        )
    }

    /// Every individual port offered, ascending.
    pub fn free_ports(&self) -> BTreeSet<u16> {
        self.port_ranges
            .iter()
            .flat_map(|&(lo, hi)| lo..=hi)
            .collect()
    }
}

/// A task status report from the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub task_id: String,
    pub status: TaskStatus,
    pub message: Option<String>,
}

/// Everything the driver needs to launch an assigned task on a slot.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDescription {
    pub offer_id: String,
    pub task_id: String,
    pub slave_id: String,
    pub assigned_ports: BTreeMap<String, u16>,
    pub payload: Vec<u8>,
}

/// Outbound commands to the cluster manager. Implementations must not block;
/// the core invokes these only after releasing the storage lock.
pub trait Driver: Send + Sync {
    fn kill_task(&self, task_id: &str);

    fn launch_task(&self, task: TaskDescription);

    fn cancel_offer(&self, offer_id: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub enum DriverCommand {
    Kill(String),
    Launch(TaskDescription),
    CancelOffer(String),
}

/// Channel-backed driver adapter: commands enqueue here and a dedicated
/// dispatch task relays them to the real driver, keeping slow transports off
/// the scheduling path.
pub struct QueuedDriver {
    tx: mpsc::UnboundedSender<DriverCommand>,
}

impl QueuedDriver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DriverCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Relays queued commands to `inner` until cancelled. Commands already
    /// queued when the token fires are dropped; the driver owns redelivery.
    pub async fn dispatch(
        mut rx: mpsc::UnboundedReceiver<DriverCommand>,
        inner: Arc<dyn Driver>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Driver dispatch loop shutting down");
                    break;
                }
                command = rx.recv() => {
                    match command {
                        Some(DriverCommand::Kill(task_id)) => inner.kill_task(&task_id),
                        Some(DriverCommand::Launch(task)) => inner.launch_task(task),
                        Some(DriverCommand::CancelOffer(offer_id)) => inner.cancel_offer(&offer_id),
                        None => break,
                    }
                }
            }
        }
    }
}

impl Driver for QueuedDriver {
    fn kill_task(&self, task_id: &str) {
        let _ = self.tx.send(DriverCommand::Kill(task_id.to_string()));
    }

    fn launch_task(&self, task: TaskDescription) {
        let _ = self.tx.send(DriverCommand::Launch(task));
    }

    fn cancel_offer(&self, offer_id: &str) {
        let _ = self.tx.send(DriverCommand::CancelOffer(offer_id.to_string()));
    }
}
