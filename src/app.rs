//! Wires the scheduler subsystems together around a set of injected ports.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::cron::CronJobManager;
use crate::events::EventBus;
use crate::filter::{NotifyingSchedulingFilter, SchedulingFilter, SchedulingFilterImpl};
use crate::ports::clock::Clock;
use crate::ports::codec::Codec;
use crate::ports::cron::CronScheduler;
use crate::ports::driver::Driver;
use crate::scheduler::{Preempter, Reservations, SchedulerCore};
use crate::state::StateManager;
use crate::storage::Storage;

/// The assembled scheduler core. Construction only wires components;
/// [`Scheduler::start`] loads state and [`Scheduler::run`] drives the
/// periodic subsystems until shutdown.
pub struct Scheduler {
    config: SchedulerConfig,
    storage: Arc<Storage>,
    state_manager: Arc<StateManager>,
    core: Arc<SchedulerCore>,
    preempter: Arc<Preempter>,
    cron_manager: Arc<CronJobManager>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        driver: Arc<dyn Driver>,
        cron: Arc<dyn CronScheduler>,
        codec: Arc<dyn Codec>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let storage = Arc::new(Storage::new(&config, bus.clone()));
        let state_manager = Arc::new(StateManager::new(
            storage.clone(),
            clock.clone(),
            driver.clone(),
        ));
        let filter: Arc<dyn SchedulingFilter> = Arc::new(NotifyingSchedulingFilter::new(
            SchedulingFilterImpl::new(storage.clone()),
            bus.clone(),
        ));
        let reservations = Reservations::new();
        let core = Arc::new(SchedulerCore::new(
            storage.clone(),
            state_manager.clone(),
            filter.clone(),
            driver,
            codec,
            config.clone(),
            reservations,
        ));
        let preempter = Arc::new(Preempter::new(
            storage.clone(),
            core.clone(),
            filter,
            clock.clone(),
            config.preemption_candidacy_delay,
        ));
        let shutdown = CancellationToken::new();
        let cron_manager = CronJobManager::new(
            storage.clone(),
            state_manager.clone(),
            core.clone(),
            cron,
            config.clone(),
            shutdown.clone(),
        );

        Self {
            config,
            storage,
            state_manager,
            core,
            preempter,
            cron_manager,
            clock,
            shutdown,
        }
    }

    /// Repairs and announces storage, then registers persisted cron jobs.
    pub fn start(&self) {
        self.storage.start(self.clock.as_ref());
        self.cron_manager.storage_started();
    }

    /// Runs the periodic subsystems until [`Scheduler::shutdown`].
    pub async fn run(&self) {
        let preempter = self.preempter.clone();
        let interval = self.config.preemption_interval;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            preempter.run(interval, shutdown).await;
        });
        self.shutdown.cancelled().await;
    }

    pub fn shutdown(&self) {
        self.cron_manager.shutdown();
        self.shutdown.cancel();
    }

    pub fn core(&self) -> &Arc<SchedulerCore> {
        &self.core
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn cron_manager(&self) -> &Arc<CronJobManager> {
        &self.cron_manager
    }

    pub fn preempter(&self) -> &Arc<Preempter> {
        &self.preempter
    }
}
