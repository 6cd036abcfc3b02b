use chrono::{DateTime, Utc};

use crate::{
    destination::{DestinationId, NewDestination},
    recurrence::RecurrenceKind,
    reminder::{AccountId, ReminderId},
};

pub struct NewReminder {
    pub account_id: AccountId,
    pub message: String,
    pub remind_at: DateTime<Utc>,
    pub recurrence: RecurrenceKind,
    pub destinations: Vec<NewDestination>,
}

/// Partial edit of a reminder. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateReminder {
    pub id: ReminderId,
    pub message: Option<String>,
    pub remind_at: Option<DateTime<Utc>>,
    pub paused: Option<bool>,
    pub next_fire: Option<Option<DateTime<Utc>>>,
    pub destinations: Option<Vec<NewDestination>>,
}

impl UpdateReminder {
    pub fn new(id: ReminderId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn remind_at(mut self, remind_at: DateTime<Utc>) -> Self {
        self.remind_at = Some(remind_at);
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = Some(paused);
        self
    }

    pub fn next_fire(mut self, next_fire: Option<DateTime<Utc>>) -> Self {
        self.next_fire = Some(next_fire);
        self
    }

    pub fn destinations(mut self, destinations: Vec<NewDestination>) -> Self {
        self.destinations = Some(destinations);
        self
    }
}

pub struct NewReminderError {
    pub reminder_id: ReminderId,
    pub destination_id: Option<DestinationId>,
    pub trace: String,
}
