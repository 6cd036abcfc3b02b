use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{
    clock::Clock,
    destination::{DestinationError, DestinationId, NewDestination, ReminderDestination},
    recurrence::RecurrenceState,
    reminder::{Account, AccountId, Reminder, ReminderError, ReminderErrorId, ReminderId},
};

use super::{NewReminder, NewReminderError, UpdateReminder};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Reminder {0} does not exist")]
    NotFound(ReminderId),

    #[error("Reminder error {0} does not exist")]
    ReminderErrorNotFound(ReminderErrorId),

    #[error("Account {0} does not exist")]
    AccountNotFound(AccountId),

    #[error(transparent)]
    InvalidDestination(#[from] DestinationError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[async_trait]
pub trait ReminderRepository: Send + Sync {
    async fn create(&self, reminder: NewReminder) -> Result<Reminder, StorageError>;
    async fn update(&self, update: UpdateReminder) -> Result<Reminder, StorageError>;
    /// `notify = false` keeps the deletion from waking the scheduling loops.
    async fn delete(&self, id: ReminderId, notify: bool) -> Result<(), StorageError>;
    async fn get_by_id(&self, id: ReminderId) -> Result<Option<Reminder>, StorageError>;
    /// Pending reminders ordered by effective fire time, earliest first.
    async fn get_next_due_reminders(&self) -> Result<Vec<Reminder>, StorageError>;
    /// One-shot reminders that fired and have not been snoozed since.
    async fn get_reminders_pending_deletion(&self) -> Result<Vec<Reminder>, StorageError>;
    /// Moves the nominal fire time.
    ///
    /// `consumed` is the snooze override the fire was read with. It is cleared only while it is
    /// still the stored one, so a snooze made during delivery survives.
    async fn reschedule(
        &self,
        id: ReminderId,
        new_time: DateTime<Utc>,
        consumed: Option<DateTime<Utc>>,
    ) -> Result<Reminder, StorageError>;
    /// Flags a reminder as fired. `consumed` behaves as in [`ReminderRepository::reschedule`].
    async fn mark_dispatched(
        &self,
        id: ReminderId,
        at: DateTime<Utc>,
        consumed: Option<DateTime<Utc>>,
    ) -> Result<Reminder, StorageError>;

    async fn snooze(
        &self,
        id: ReminderId,
        until: DateTime<Utc>,
    ) -> Result<Reminder, StorageError> {
        self.update(UpdateReminder::new(id).next_fire(Some(until)))
            .await
    }

    async fn set_paused(&self, id: ReminderId, paused: bool) -> Result<Reminder, StorageError> {
        self.update(UpdateReminder::new(id).paused(paused)).await
    }
}

/// Append-only sink for failed deliveries.
#[async_trait]
pub trait ReminderErrorRepository: Send + Sync {
    async fn record(&self, error: NewReminderError) -> Result<ReminderError, StorageError>;
    async fn mark_fixed(&self, id: ReminderErrorId) -> Result<ReminderError, StorageError>;
    async fn list_unfixed(&self) -> Result<Vec<ReminderError>, StorageError>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn get(&self, id: AccountId) -> Result<Option<Account>, StorageError>;
}

#[derive(Default)]
struct InMemoryStore {
    current_reminder_id: ReminderId,
    current_destination_id: DestinationId,
    current_error_id: ReminderErrorId,
    reminders: HashMap<ReminderId, Reminder>,
    errors: Vec<ReminderError>,
    accounts: HashMap<AccountId, Account>,
}

impl InMemoryStore {
    fn next_reminder_id(&mut self) -> ReminderId {
        self.current_reminder_id += 1;
        self.current_reminder_id
    }

    fn next_error_id(&mut self) -> ReminderErrorId {
        self.current_error_id += 1;
        self.current_error_id
    }

    fn build_destinations(
        &mut self,
        destinations: Vec<NewDestination>,
    ) -> Result<Vec<ReminderDestination>, StorageError> {
        for destination in &destinations {
            destination.validate()?;
        }

        Ok(destinations
            .into_iter()
            .map(|destination| {
                self.current_destination_id += 1;
                destination.into_destination(self.current_destination_id)
            })
            .collect())
    }

    fn reminder_mut(&mut self, id: ReminderId) -> Result<&mut Reminder, StorageError> {
        self.reminders.get_mut(&id).ok_or(StorageError::NotFound(id))
    }
}

fn consume_snooze(reminder: &mut Reminder, consumed: Option<DateTime<Utc>>) {
    if reminder.next_fire == consumed {
        reminder.next_fire = None;
    }
}

/// Process-local storage backing every repository contract.
pub struct InMemoryReminderStorage {
    store: RwLock<InMemoryStore>,
    clock: Arc<dyn Clock>,
}

impl InMemoryReminderStorage {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: RwLock::new(InMemoryStore::default()),
            clock,
        }
    }

    pub async fn add_account(&self, account: Account) {
        let mut store = self.store.write().await;
        store.accounts.insert(account.id, account);
    }
}

#[async_trait]
impl ReminderRepository for InMemoryReminderStorage {
    async fn create(&self, reminder: NewReminder) -> Result<Reminder, StorageError> {
        let mut store = self.store.write().await;
        if !store.accounts.contains_key(&reminder.account_id) {
            return Err(StorageError::AccountNotFound(reminder.account_id));
        }

        let destinations = store.build_destinations(reminder.destinations)?;
        let id = store.next_reminder_id();
        let created = Reminder {
            id,
            account_id: reminder.account_id,
            message: reminder.message,
            remind_at: reminder.remind_at,
            recurrence: RecurrenceState::new(reminder.recurrence, false),
            next_fire: None,
            created_at: self.clock.now(),
            dispatched_at: None,
            destinations,
        };

        store.reminders.insert(id, created.clone());
        log::debug!("Stored reminder {id}");
        Ok(created)
    }

    async fn update(&self, update: UpdateReminder) -> Result<Reminder, StorageError> {
        let mut store = self.store.write().await;
        let destinations = match update.destinations {
            Some(destinations) => Some(store.build_destinations(destinations)?),
            None => None,
        };
        let reminder = store.reminder_mut(update.id)?;

        if let Some(message) = update.message {
            reminder.message = message;
        }
        if let Some(remind_at) = update.remind_at {
            if remind_at != reminder.remind_at {
                reminder.remind_at = remind_at;
                reminder.dispatched_at = None;
            }
        }
        if let Some(paused) = update.paused {
            reminder.recurrence = reminder.recurrence.with_paused(paused);
        }
        if let Some(next_fire) = update.next_fire {
            reminder.next_fire = next_fire;
        }
        if let Some(destinations) = destinations {
            reminder.destinations = destinations;
        }

        Ok(reminder.clone())
    }

    async fn delete(&self, id: ReminderId, _notify: bool) -> Result<(), StorageError> {
        let mut store = self.store.write().await;
        store
            .reminders
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::NotFound(id))
    }

    async fn get_by_id(&self, id: ReminderId) -> Result<Option<Reminder>, StorageError> {
        let store = self.store.read().await;
        Ok(store.reminders.get(&id).cloned())
    }

    async fn get_next_due_reminders(&self) -> Result<Vec<Reminder>, StorageError> {
        let store = self.store.read().await;
        let mut pending: Vec<Reminder> = store
            .reminders
            .values()
            .filter(|reminder| reminder.is_pending())
            .cloned()
            .collect();

        pending.sort_by_key(|reminder| (reminder.effective_fire_time(), reminder.id));
        Ok(pending)
    }

    async fn get_reminders_pending_deletion(&self) -> Result<Vec<Reminder>, StorageError> {
        let store = self.store.read().await;
        Ok(store
            .reminders
            .values()
            .filter(|reminder| reminder.is_awaiting_deletion())
            .cloned()
            .collect())
    }

    async fn reschedule(
        &self,
        id: ReminderId,
        new_time: DateTime<Utc>,
        consumed: Option<DateTime<Utc>>,
    ) -> Result<Reminder, StorageError> {
        let mut store = self.store.write().await;
        let reminder = store.reminder_mut(id)?;
        reminder.remind_at = new_time;
        reminder.dispatched_at = None;
        consume_snooze(reminder, consumed);

        Ok(reminder.clone())
    }

    async fn mark_dispatched(
        &self,
        id: ReminderId,
        at: DateTime<Utc>,
        consumed: Option<DateTime<Utc>>,
    ) -> Result<Reminder, StorageError> {
        let mut store = self.store.write().await;
        let reminder = store.reminder_mut(id)?;
        reminder.dispatched_at = Some(at);
        consume_snooze(reminder, consumed);

        Ok(reminder.clone())
    }
}

#[async_trait]
impl ReminderErrorRepository for InMemoryReminderStorage {
    async fn record(&self, error: NewReminderError) -> Result<ReminderError, StorageError> {
        let mut store = self.store.write().await;
        let id = store.next_error_id();
        let created = ReminderError {
            id,
            reminder_id: error.reminder_id,
            destination_id: error.destination_id,
            trace: error.trace,
            fixed: false,
            created_at: self.clock.now(),
        };

        store.errors.push(created.clone());
        Ok(created)
    }

    async fn mark_fixed(&self, id: ReminderErrorId) -> Result<ReminderError, StorageError> {
        let mut store = self.store.write().await;
        let error = store
            .errors
            .iter_mut()
            .find(|error| error.id == id)
            .ok_or(StorageError::ReminderErrorNotFound(id))?;
        error.fixed = true;

        Ok(error.clone())
    }

    async fn list_unfixed(&self) -> Result<Vec<ReminderError>, StorageError> {
        let store = self.store.read().await;
        Ok(store
            .errors
            .iter()
            .filter(|error| !error.fixed)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AccountRepository for InMemoryReminderStorage {
    async fn get(&self, id: AccountId) -> Result<Option<Account>, StorageError> {
        let store = self.store.read().await;
        Ok(store.accounts.get(&id).cloned())
    }
}
