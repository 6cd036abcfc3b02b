use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    destination::{DestinationId, ReminderDestination},
    recurrence::RecurrenceState,
};

pub type ReminderId = i64;
pub type AccountId = i64;
pub type ReminderErrorId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// IANA zone id, e.g. `Europe/Berlin`.
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: ReminderId,
    pub account_id: AccountId,
    pub message: String,
    pub remind_at: DateTime<Utc>,
    pub recurrence: RecurrenceState,
    /// One-time override of the next fire instant, set by snoozing.
    pub next_fire: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Set once a one-shot reminder has fired; it then waits for the garbage collector.
    pub dispatched_at: Option<DateTime<Utc>>,
    pub destinations: Vec<ReminderDestination>,
}

impl Reminder {
    /// The instant the reminder notifies next. A snooze override wins until it has fired.
    pub fn effective_fire_time(&self) -> DateTime<Utc> {
        self.next_fire.unwrap_or(self.remind_at)
    }

    pub fn is_paused(&self) -> bool {
        self.recurrence.is_paused()
    }

    pub fn is_one_shot(&self) -> bool {
        self.recurrence.is_one_shot()
    }

    /// Whether the scheduler still has to fire this reminder.
    pub fn is_pending(&self) -> bool {
        !self.is_paused() && (self.dispatched_at.is_none() || self.next_fire.is_some())
    }

    /// A one-shot reminder that fired and has not been snoozed since.
    pub fn is_awaiting_deletion(&self) -> bool {
        self.is_one_shot() && self.dispatched_at.is_some() && self.next_fire.is_none()
    }

    pub fn deletion_deadline(&self, grace_period: TimeDelta) -> Option<DateTime<Utc>> {
        if self.is_awaiting_deletion() {
            self.dispatched_at.map(|dispatched_at| dispatched_at + grace_period)
        } else {
            None
        }
    }
}

/// Audit record of a failed delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderError {
    pub id: ReminderErrorId,
    pub reminder_id: ReminderId,
    pub destination_id: Option<DestinationId>,
    pub trace: String,
    pub fixed: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::recurrence::RecurrenceKind;

    fn reminder(kind: RecurrenceKind) -> Reminder {
        let at = Utc.with_ymd_and_hms(2025, 5, 31, 12, 0, 0).unwrap();
        Reminder {
            id: 1,
            account_id: 1,
            message: "Water the plants".to_owned(),
            remind_at: at,
            recurrence: kind.into(),
            next_fire: None,
            created_at: at - TimeDelta::hours(1),
            dispatched_at: None,
            destinations: vec![],
        }
    }

    #[test]
    fn snooze_override_takes_precedence() {
        let mut reminder = reminder(RecurrenceKind::Daily);
        let snoozed_until = reminder.remind_at - TimeDelta::hours(3);
        reminder.next_fire = Some(snoozed_until);

        assert_eq!(reminder.effective_fire_time(), snoozed_until);
    }

    #[test]
    fn fired_one_shot_is_no_longer_pending() {
        let mut reminder = reminder(RecurrenceKind::Once);
        reminder.dispatched_at = Some(reminder.remind_at);

        assert!(!reminder.is_pending());
        assert!(reminder.is_awaiting_deletion());
    }

    #[test]
    fn snoozed_one_shot_is_pending_and_not_awaiting_deletion() {
        let mut reminder = reminder(RecurrenceKind::Once);
        reminder.dispatched_at = Some(reminder.remind_at);
        reminder.next_fire = Some(reminder.remind_at + TimeDelta::minutes(10));

        assert!(reminder.is_pending());
        assert!(!reminder.is_awaiting_deletion());
        assert_eq!(reminder.deletion_deadline(TimeDelta::minutes(30)), None);
    }

    #[test]
    fn paused_reminder_is_not_pending() {
        let mut reminder = reminder(RecurrenceKind::Weekly);
        reminder.recurrence = reminder.recurrence.with_paused(true);

        assert!(!reminder.is_pending());
    }
}
