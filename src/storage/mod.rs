mod model;
mod notifying;
mod reminder_storage;

pub use model::{NewReminder, NewReminderError, UpdateReminder};
pub use notifying::NotifyingReminderRepository;
pub use reminder_storage::{
    AccountRepository, InMemoryReminderStorage, ReminderErrorRepository, ReminderRepository,
    StorageError,
};
