use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    reminder::{Reminder, ReminderId},
    storage::ReminderRepository,
};

use super::{CollectorEvent, control_loop::ControlLoop};

pub fn is_eligible_for_deletion(
    reminder: &Reminder,
    now: DateTime<Utc>,
    grace_period: TimeDelta,
) -> bool {
    reminder
        .deletion_deadline(grace_period)
        .is_some_and(|deadline| now >= deadline)
}

/// Deletes fired one-shot reminders once their grace period is over.
///
/// The deletion queue is read from storage on every rearm, so a queue event dropped by a full
/// mailbox only delays a deletion.
pub struct GarbageCollector {
    repository: Arc<dyn ReminderRepository>,
    clock: Arc<dyn Clock>,
    grace_period: TimeDelta,
}

impl GarbageCollector {
    pub fn new(
        repository: Arc<dyn ReminderRepository>,
        clock: Arc<dyn Clock>,
        grace_period: TimeDelta,
    ) -> Self {
        Self {
            repository,
            clock,
            grace_period,
        }
    }

    async fn deadlines(&self) -> anyhow::Result<Vec<(ReminderId, DateTime<Utc>)>> {
        let pending = self.repository.get_reminders_pending_deletion().await?;
        Ok(pending
            .iter()
            .filter_map(|reminder| {
                reminder
                    .deletion_deadline(self.grace_period)
                    .map(|deadline| (reminder.id, deadline))
            })
            .collect())
    }

    async fn collect(&self, id: ReminderId, now: DateTime<Utc>) -> anyhow::Result<()> {
        let Some(reminder) = self.repository.get_by_id(id).await? else {
            return Ok(());
        };

        if is_eligible_for_deletion(&reminder, now, self.grace_period) {
            self.repository.delete(id, false).await?;
            log::info!("Deleted expired reminder. [reminder_id = {}]", id);
        }
        Ok(())
    }
}

#[async_trait]
impl ControlLoop for GarbageCollector {
    type Event = CollectorEvent;

    fn name(&self) -> &'static str {
        "garbage_collector"
    }

    async fn next_wakeup(&mut self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let deadlines = self.deadlines().await?;
        log::debug!("Deletion queue loaded. [pending = {}]", deadlines.len());
        Ok(deadlines.into_iter().map(|(_, deadline)| deadline).min())
    }

    async fn on_event(&mut self, _event: CollectorEvent) -> anyhow::Result<()> {
        // The loop rearms from storage after every event.
        Ok(())
    }

    async fn on_fire(&mut self, token: &CancellationToken) -> anyhow::Result<()> {
        let now = self.clock.now();
        let mut expired: Vec<ReminderId> = self
            .deadlines()
            .await?
            .into_iter()
            .filter(|(_, deadline)| *deadline <= now)
            .map(|(id, _)| id)
            .collect();
        expired.sort_unstable();

        for id in expired {
            if token.is_cancelled() {
                break;
            }
            self.collect(id, now).await?;
        }
        Ok(())
    }
}
