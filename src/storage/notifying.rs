use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    reminder::{Reminder, ReminderId},
    scheduling::{CollectorEvent, Mailbox, SchedulerEvent},
};

use super::{NewReminder, ReminderRepository, StorageError, UpdateReminder};

/// Wraps a repository so every successful mutation wakes the scheduler and the garbage collector.
/// Reads pass straight through.
pub struct NotifyingReminderRepository {
    inner: Arc<dyn ReminderRepository>,
    scheduler: Mailbox<SchedulerEvent>,
    collector: Mailbox<CollectorEvent>,
}

impl NotifyingReminderRepository {
    pub fn new(
        inner: Arc<dyn ReminderRepository>,
        scheduler: Mailbox<SchedulerEvent>,
        collector: Mailbox<CollectorEvent>,
    ) -> Self {
        Self {
            inner,
            scheduler,
            collector,
        }
    }

    fn notify_updated(&self, id: ReminderId) {
        self.scheduler.post(SchedulerEvent::Updated(id));
        self.collector.post(CollectorEvent::Updated(id));
    }
}

#[async_trait]
impl ReminderRepository for NotifyingReminderRepository {
    async fn create(&self, reminder: NewReminder) -> Result<Reminder, StorageError> {
        let created = self.inner.create(reminder).await?;
        self.scheduler.post(SchedulerEvent::Created(created.id));
        Ok(created)
    }

    async fn update(&self, update: UpdateReminder) -> Result<Reminder, StorageError> {
        let updated = self.inner.update(update).await?;
        self.notify_updated(updated.id);
        Ok(updated)
    }

    async fn delete(&self, id: ReminderId, notify: bool) -> Result<(), StorageError> {
        self.inner.delete(id, notify).await?;
        if notify {
            self.scheduler.post(SchedulerEvent::Deleted(id));
            self.collector.post(CollectorEvent::Deleted(id));
        }
        Ok(())
    }

    async fn get_by_id(&self, id: ReminderId) -> Result<Option<Reminder>, StorageError> {
        self.inner.get_by_id(id).await
    }

    async fn get_next_due_reminders(&self) -> Result<Vec<Reminder>, StorageError> {
        self.inner.get_next_due_reminders().await
    }

    async fn get_reminders_pending_deletion(&self) -> Result<Vec<Reminder>, StorageError> {
        self.inner.get_reminders_pending_deletion().await
    }

    async fn reschedule(
        &self,
        id: ReminderId,
        new_time: DateTime<Utc>,
        consumed: Option<DateTime<Utc>>,
    ) -> Result<Reminder, StorageError> {
        let rescheduled = self.inner.reschedule(id, new_time, consumed).await?;
        self.notify_updated(id);
        Ok(rescheduled)
    }

    async fn mark_dispatched(
        &self,
        id: ReminderId,
        at: DateTime<Utc>,
        consumed: Option<DateTime<Utc>>,
    ) -> Result<Reminder, StorageError> {
        let dispatched = self.inner.mark_dispatched(id, at, consumed).await?;
        self.scheduler.post(SchedulerEvent::Updated(id));
        self.collector.post(CollectorEvent::Queued(id));
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        clock::SystemClock,
        recurrence::RecurrenceKind,
        reminder::Account,
        scheduling::mailbox,
        storage::InMemoryReminderStorage,
    };

    struct Fixture {
        repository: NotifyingReminderRepository,
        scheduler_rx: tokio::sync::mpsc::Receiver<SchedulerEvent>,
        collector_rx: tokio::sync::mpsc::Receiver<CollectorEvent>,
    }

    async fn fixture() -> Fixture {
        let storage = InMemoryReminderStorage::new(Arc::new(SystemClock));
        storage
            .add_account(Account {
                id: 1,
                timezone: "UTC".to_owned(),
            })
            .await;
        let (scheduler, scheduler_rx) = mailbox("scheduler", 16);
        let (collector, collector_rx) = mailbox("collector", 16);

        Fixture {
            repository: NotifyingReminderRepository::new(Arc::new(storage), scheduler, collector),
            scheduler_rx,
            collector_rx,
        }
    }

    fn new_reminder() -> NewReminder {
        NewReminder {
            account_id: 1,
            message: "Stretch".to_owned(),
            remind_at: Utc.with_ymd_and_hms(2025, 5, 31, 12, 0, 0).unwrap(),
            recurrence: RecurrenceKind::Once,
            destinations: vec![],
        }
    }

    #[tokio::test]
    async fn mutations_post_events() {
        let mut fx = fixture().await;

        let reminder = fx.repository.create(new_reminder()).await.unwrap();
        fx.repository.snooze(reminder.id, reminder.remind_at).await.unwrap();
        fx.repository
            .mark_dispatched(reminder.id, reminder.remind_at, Some(reminder.remind_at))
            .await
            .unwrap();
        fx.repository.delete(reminder.id, true).await.unwrap();

        let id = reminder.id;
        let mut scheduler_events = vec![];
        while let Ok(event) = fx.scheduler_rx.try_recv() {
            scheduler_events.push(event);
        }
        let mut collector_events = vec![];
        while let Ok(event) = fx.collector_rx.try_recv() {
            collector_events.push(event);
        }

        assert_eq!(
            scheduler_events,
            vec![
                SchedulerEvent::Created(id),
                SchedulerEvent::Updated(id),
                SchedulerEvent::Updated(id),
                SchedulerEvent::Deleted(id),
            ]
        );
        assert_eq!(
            collector_events,
            vec![
                CollectorEvent::Updated(id),
                CollectorEvent::Queued(id),
                CollectorEvent::Deleted(id),
            ]
        );
    }

    #[tokio::test]
    async fn silent_delete_and_reads_post_nothing() {
        let mut fx = fixture().await;
        let reminder = fx.repository.create(new_reminder()).await.unwrap();
        let _ = fx.scheduler_rx.try_recv();

        fx.repository.get_by_id(reminder.id).await.unwrap();
        fx.repository.get_next_due_reminders().await.unwrap();
        fx.repository.delete(reminder.id, false).await.unwrap();

        assert!(fx.scheduler_rx.try_recv().is_err());
        assert!(fx.collector_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_mutation_posts_nothing() {
        let mut fx = fixture().await;

        let result = fx.repository.reschedule(42, Utc::now(), None).await;

        assert!(matches!(result, Err(StorageError::NotFound(42))));
        assert!(fx.scheduler_rx.try_recv().is_err());
        assert!(fx.collector_rx.try_recv().is_err());
    }
}
