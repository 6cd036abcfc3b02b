mod common;
mod control_loop;
pub mod engine;
mod garbage_collector;
mod scheduler;


pub use common::{CollectorEvent, Mailbox, SchedulerEvent, mailbox};
pub use control_loop::{ControlLoop, LoopTask, LoopTiming};
pub use engine::{EngineDeps, EngineHandle, EngineSettings, ReminderEngine};
pub use garbage_collector::{GarbageCollector, is_eligible_for_deletion};
pub use scheduler::ReminderScheduler;
