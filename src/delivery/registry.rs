use std::{collections::HashMap, sync::Arc};

use crate::{
    destination::{DestinationId, DestinationType},
    reminder::Reminder,
    storage::{NewReminderError, ReminderErrorRepository},
};

use super::{DispatchError, Dispatcher};

#[derive(Debug)]
pub struct DestinationFailure {
    pub destination_id: DestinationId,
    pub kind: DestinationType,
    pub error: DispatchError,
}

/// Outcome of fanning a reminder out to all of its destinations.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failures: Vec<DestinationFailure>,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Routes each destination of a reminder to the dispatcher registered for its type.
pub struct DispatcherRegistry {
    dispatchers: HashMap<DestinationType, Arc<dyn Dispatcher>>,
    errors: Arc<dyn ReminderErrorRepository>,
}

impl DispatcherRegistry {
    pub fn new(errors: Arc<dyn ReminderErrorRepository>) -> Self {
        Self {
            dispatchers: HashMap::new(),
            errors,
        }
    }

    /// Replaces any dispatcher previously registered for the same type.
    pub fn register(mut self, dispatcher: impl Dispatcher) -> Self {
        self.dispatchers
            .insert(dispatcher.supported_type(), Arc::new(dispatcher));
        self
    }

    pub fn supports(&self, kind: DestinationType) -> bool {
        self.dispatchers.contains_key(&kind)
    }

    /// Delivers to every destination in order. A failing destination never stops the others; each
    /// failure is logged and persisted as a reminder error.
    pub async fn dispatch(&self, reminder: &Reminder) -> DispatchReport {
        let mut report = DispatchReport::default();

        for destination in &reminder.destinations {
            let result = match self.dispatchers.get(&destination.kind) {
                Some(dispatcher) => dispatcher.dispatch(reminder, destination).await,
                None => Err(DispatchError::NoDispatcher(destination.kind)),
            };

            match result {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    log::warn!(
                        "Failed to deliver reminder. [reminder_id = {}, destination_id = {}, destination = {}, error = {}]",
                        reminder.id,
                        destination.id,
                        destination.kind,
                        error
                    );
                    self.record_failure(reminder, destination.id, &error).await;
                    report.failures.push(DestinationFailure {
                        destination_id: destination.id,
                        kind: destination.kind,
                        error,
                    });
                }
            }
        }

        if !report.is_success() {
            log::warn!(
                "Reminder delivered partially. [reminder_id = {}, delivered = {}, failed = {}]",
                reminder.id,
                report.delivered,
                report.failures.len()
            );
        }

        report
    }

    async fn record_failure(
        &self,
        reminder: &Reminder,
        destination_id: DestinationId,
        error: &DispatchError,
    ) {
        let record = NewReminderError {
            reminder_id: reminder.id,
            destination_id: Some(destination_id),
            trace: error.trace(),
        };

        if let Err(storage_error) = self.errors.record(record).await {
            log::error!(
                "Failed to record delivery error. [reminder_id = {}, destination_id = {}, error = {}]",
                reminder.id,
                destination_id,
                storage_error
            );
        }
    }
}
