use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::TimeDelta;
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    delivery::DispatcherRegistry,
    storage::{
        AccountRepository, NotifyingReminderRepository, ReminderErrorRepository,
        ReminderRepository,
    },
};

use super::{
    common::mailbox,
    control_loop::{self, LoopTask, LoopTiming},
    garbage_collector::GarbageCollector,
    scheduler::ReminderScheduler,
};

static RUNNING: Mutex<Option<EngineHandle>> = Mutex::new(None);
static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub scheduler_mailbox_capacity: usize,
    pub collector_mailbox_capacity: usize,
    /// Reminders due within this window of a wake-up fire together.
    pub due_tolerance: Duration,
    pub overdue_delay: Duration,
    pub retry_delay: Duration,
    pub grace_period: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            scheduler_mailbox_capacity: 64,
            collector_mailbox_capacity: 64,
            due_tolerance: Duration::from_secs(60),
            overdue_delay: Duration::from_secs(1),
            retry_delay: Duration::from_secs(5),
            grace_period: Duration::from_secs(30 * 60),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Collaborators the engine runs against.
pub struct EngineDeps {
    pub reminders: Arc<dyn ReminderRepository>,
    pub accounts: Arc<dyn AccountRepository>,
    pub errors: Arc<dyn ReminderErrorRepository>,
    pub registry: DispatcherRegistry,
    pub clock: Arc<dyn Clock>,
}

/// Cheap, cloneable view of a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    id: u64,
    repository: Arc<NotifyingReminderRepository>,
    cancellation_token: CancellationToken,
}

impl EngineHandle {
    /// The repository every collaborator must write through so the loops see the change.
    pub fn repository(&self) -> Arc<NotifyingReminderRepository> {
        Arc::clone(&self.repository)
    }

    pub fn is_stopping(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

/// The running scheduler and garbage collector.
pub struct ReminderEngine {
    handle: EngineHandle,
    scheduler: LoopTask,
    collector: LoopTask,
    shutdown_timeout: Duration,
}

impl ReminderEngine {
    /// Spawns both loops on children of `parent_token` and registers the engine as the running one.
    pub fn start(
        parent_token: &CancellationToken,
        deps: EngineDeps,
        settings: EngineSettings,
    ) -> anyhow::Result<Self> {
        let due_tolerance = TimeDelta::from_std(settings.due_tolerance)?;
        let grace_period = TimeDelta::from_std(settings.grace_period)?;
        let timing = LoopTiming {
            overdue_delay: settings.overdue_delay,
            retry_delay: settings.retry_delay,
        };

        let (scheduler_mailbox, scheduler_events) =
            mailbox("scheduler", settings.scheduler_mailbox_capacity);
        let (collector_mailbox, collector_events) =
            mailbox("garbage_collector", settings.collector_mailbox_capacity);
        let repository = Arc::new(NotifyingReminderRepository::new(
            deps.reminders,
            scheduler_mailbox,
            collector_mailbox,
        ));

        let cancellation_token = parent_token.child_token();
        let scheduler = ReminderScheduler::new(
            repository.clone(),
            deps.accounts,
            deps.errors,
            Arc::new(deps.registry),
            deps.clock.clone(),
            due_tolerance,
        );
        let collector = GarbageCollector::new(repository.clone(), deps.clock.clone(), grace_period);

        let scheduler = control_loop::spawn(
            scheduler,
            scheduler_events,
            cancellation_token.child_token(),
            deps.clock.clone(),
            timing,
        );
        let collector = control_loop::spawn(
            collector,
            collector_events,
            cancellation_token.child_token(),
            deps.clock,
            timing,
        );

        let handle = EngineHandle {
            id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            repository,
            cancellation_token,
        };
        register(handle.clone());
        log::info!("Reminder engine started. [engine_id = {}]", handle.id);

        Ok(Self {
            handle,
            scheduler,
            collector,
            shutdown_timeout: settings.shutdown_timeout,
        })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn repository(&self) -> Arc<NotifyingReminderRepository> {
        self.handle.repository()
    }

    pub fn is_running(&self) -> bool {
        !self.scheduler.is_finished() && !self.collector.is_finished()
    }

    /// Cancels both loops and waits for them, each bounded by the shutdown timeout.
    pub async fn stop(self) {
        log::info!("Stopping reminder engine. [engine_id = {}]", self.handle.id);
        self.handle.cancellation_token.cancel();
        tokio::join!(
            self.scheduler.cancel(self.shutdown_timeout),
            self.collector.cancel(self.shutdown_timeout),
        );
        unregister(self.handle.id);
        log::info!("Reminder engine stopped. [engine_id = {}]", self.handle.id);
    }
}

/// The engine most recently started in this process, until it is stopped.
pub fn running() -> Option<EngineHandle> {
    RUNNING
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

fn register(handle: EngineHandle) {
    let mut running = RUNNING.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(previous) = running.replace(handle) {
        log::warn!(
            "Another reminder engine was already registered. [engine_id = {}]",
            previous.id
        );
    }
}

fn unregister(id: u64) {
    let mut running = RUNNING.lock().unwrap_or_else(PoisonError::into_inner);
    if running.as_ref().is_some_and(|handle| handle.id == id) {
        *running = None;
    }
}
