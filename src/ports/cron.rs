use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ::cron::Schedule;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, SchedulerError};

pub type CronCallback = Arc<dyn Fn() + Send + Sync>;

/// Schedule evaluation seam consumed by the cron job manager.
pub trait CronScheduler: Send + Sync {
    fn is_valid_schedule(&self, expr: &str) -> bool;

    /// Registers `callback` to fire per `expr`; returns an opaque key.
    fn schedule(&self, expr: &str, callback: CronCallback) -> Result<String>;

    fn deschedule(&self, key: &str);

    fn get_schedule(&self, key: &str) -> Option<String>;

    fn start(&self);

    fn stop(&self);
}

struct CronEntry {
    expr: String,
    schedule: Schedule,
    callback: CronCallback,
    next_fire: Option<DateTime<Utc>>,
}

/// Cron evaluator backed by the `cron` crate: a single tick loop checks each
/// registered schedule and fires due callbacks inline.
pub struct CronEngine {
    entries: Arc<Mutex<HashMap<String, CronEntry>>>,
    tick: Duration,
    shutdown: CancellationToken,
}

impl Default for CronEngine {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl CronEngine {
    pub fn new(tick: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            tick,
            shutdown: CancellationToken::new(),
        }
    }

    fn fire_due(entries: &Mutex<HashMap<String, CronEntry>>, now: DateTime<Utc>) {
        let due: Vec<CronCallback> = {
            let mut entries = entries.lock().expect("cron entries poisoned");
            entries
                .values_mut()
                .filter_map(|entry| {
                    let fire_at = entry.next_fire?;
                    if fire_at <= now {
                        entry.next_fire = entry.schedule.after(&now).next();
                        Some(entry.callback.clone())
                    } else {
                        None
                    }
                })
                .collect()
        };
        for callback in due {
            callback();
        }
    }
}

impl CronScheduler for CronEngine {
    fn is_valid_schedule(&self, expr: &str) -> bool {
        Schedule::from_str(expr).is_ok()
    }

    fn schedule(&self, expr: &str, callback: CronCallback) -> Result<String> {
        let schedule = Schedule::from_str(expr).map_err(|e| {
            SchedulerError::Schedule(format!("Invalid cron schedule {expr}: {e}"))
        })?;
        let key = Uuid::new_v4().to_string();
        let next_fire = schedule.after(&Utc::now()).next();
        self.entries.lock().expect("cron entries poisoned").insert(
            key.clone(),
            CronEntry {
                expr: expr.to_string(),
                schedule,
                callback,
                next_fire,
            },
        );
        Ok(key)
    }

    fn deschedule(&self, key: &str) {
        self.entries
            .lock()
            .expect("cron entries poisoned")
            .remove(key);
    }

    fn get_schedule(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("cron entries poisoned")
            .get(key)
            .map(|entry| entry.expr.clone())
    }

    fn start(&self) {
        let entries = self.entries.clone();
        let shutdown = self.shutdown.clone();
        let tick = self.tick;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Cron engine shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        Self::fire_due(&entries, Utc::now());
                    }
                }
            }
        });
    }

    fn stop(&self) {
        self.shutdown.cancel();
    }
}
