use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    delivery::DispatcherRegistry,
    recurrence::next_occurrence_after,
    reminder::Reminder,
    storage::{AccountRepository, NewReminderError, ReminderErrorRepository, ReminderRepository},
};

use super::{SchedulerEvent, control_loop::ControlLoop};

/// Fires due reminders and moves each one to its next state: one-shots are flagged for the garbage
/// collector, recurring reminders are advanced to their next occurrence.
pub struct ReminderScheduler {
    repository: Arc<dyn ReminderRepository>,
    accounts: Arc<dyn AccountRepository>,
    errors: Arc<dyn ReminderErrorRepository>,
    registry: Arc<DispatcherRegistry>,
    clock: Arc<dyn Clock>,
    due_tolerance: TimeDelta,
}

impl ReminderScheduler {
    pub fn new(
        repository: Arc<dyn ReminderRepository>,
        accounts: Arc<dyn AccountRepository>,
        errors: Arc<dyn ReminderErrorRepository>,
        registry: Arc<DispatcherRegistry>,
        clock: Arc<dyn Clock>,
        due_tolerance: TimeDelta,
    ) -> Self {
        Self {
            repository,
            accounts,
            errors,
            registry,
            clock,
            due_tolerance,
        }
    }

    async fn fire(&self, reminder: Reminder, now: DateTime<Utc>) -> anyhow::Result<()> {
        let report = self.registry.dispatch(&reminder).await;
        log::info!(
            "Reminder fired. [reminder_id = {}, delivered = {}, failed = {}]",
            reminder.id,
            report.delivered,
            report.failures.len()
        );

        if reminder.is_one_shot() {
            self.repository
                .mark_dispatched(reminder.id, now, reminder.next_fire)
                .await?;
            return Ok(());
        }

        // A snooze that fired ahead of the nominal occurrence leaves that occurrence in place.
        if reminder.next_fire.is_some() && reminder.remind_at > now + self.due_tolerance {
            self.repository
                .reschedule(reminder.id, reminder.remind_at, reminder.next_fire)
                .await?;
            return Ok(());
        }

        self.advance(&reminder, now).await
    }

    async fn advance(&self, reminder: &Reminder, now: DateTime<Utc>) -> anyhow::Result<()> {
        let Some(account) = self.accounts.get(reminder.account_id).await? else {
            let reason = format!("Account {} does not exist", reminder.account_id);
            return self.park(reminder, now, reason).await;
        };

        match next_occurrence_after(reminder.remind_at, reminder.recurrence, &account.timezone, now)
        {
            Ok(next) => {
                self.repository
                    .reschedule(reminder.id, next, reminder.next_fire)
                    .await?;
                log::debug!(
                    "Reminder rescheduled. [reminder_id = {}, next = {}]",
                    reminder.id,
                    next
                );
                Ok(())
            }
            Err(error) => self.park(reminder, now, error.to_string()).await,
        }
    }

    /// Takes a reminder that cannot be advanced out of the due set until it is edited.
    async fn park(
        &self,
        reminder: &Reminder,
        now: DateTime<Utc>,
        reason: String,
    ) -> anyhow::Result<()> {
        log::error!(
            "Cannot advance recurring reminder, parking it. [reminder_id = {}, reason = {}]",
            reminder.id,
            reason
        );

        self.errors
            .record(NewReminderError {
                reminder_id: reminder.id,
                destination_id: None,
                trace: reason,
            })
            .await?;
        self.repository
            .mark_dispatched(reminder.id, now, reminder.next_fire)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ControlLoop for ReminderScheduler {
    type Event = SchedulerEvent;

    fn name(&self) -> &'static str {
        "scheduler"
    }

    async fn next_wakeup(&mut self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let due = self.repository.get_next_due_reminders().await?;
        Ok(due.first().map(Reminder::effective_fire_time))
    }

    async fn on_event(&mut self, _event: SchedulerEvent) -> anyhow::Result<()> {
        // The loop rearms from storage after every event.
        Ok(())
    }

    async fn on_fire(&mut self, token: &CancellationToken) -> anyhow::Result<()> {
        let now = self.clock.now();
        let horizon = now + self.due_tolerance;
        let due = self.repository.get_next_due_reminders().await?;

        for reminder in due
            .into_iter()
            .take_while(|reminder| reminder.effective_fire_time() <= horizon)
        {
            if token.is_cancelled() {
                log::info!("Shutdown requested, leaving remaining reminders for the next start");
                break;
            }
            self.fire(reminder, now).await?;
        }

        Ok(())
    }
}
