use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

use crate::{
    clock::Clock,
    delivery::{ChatClient, ChatError, OutgoingMessage},
    recurrence::RecurrenceKind,
    reminder::{Reminder, ReminderId},
};

type SentMessages = Arc<Mutex<Vec<(String, OutgoingMessage)>>>;

/// Chat client that records every message instead of talking to a platform.
#[derive(Clone, Default)]
pub struct RecordingChatClient {
    sent: SentMessages,
    fail: bool,
}

impl RecordingChatClient {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, OutgoingMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for RecordingChatClient {
    async fn open_private_channel(&self, user_id: &str) -> Result<String, ChatError> {
        Ok(format!("dm-{user_id}"))
    }

    async fn send_message(
        &self,
        channel_id: &str,
        message: OutgoingMessage,
    ) -> Result<(), ChatError> {
        if self.fail {
            return Err(ChatError::Rejected("chat not found".to_owned()));
        }

        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_owned(), message));
        Ok(())
    }
}

/// Wall-clock that follows tokio's (possibly paused) timer, so storage timestamps and sleeps agree.
pub struct TokioClock {
    base: DateTime<Utc>,
    started: Instant,
}

impl TokioClock {
    pub fn starting_at(base: DateTime<Utc>) -> Self {
        Self {
            base,
            started: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().duration_since(self.started);
        self.base + TimeDelta::from_std(elapsed).unwrap()
    }
}

pub fn reminder_at(id: ReminderId, at: DateTime<Utc>) -> Reminder {
    Reminder {
        id,
        account_id: 1,
        message: "Reminder Text".to_owned(),
        remind_at: at,
        recurrence: RecurrenceKind::Once.into(),
        next_fire: None,
        created_at: at,
        dispatched_at: None,
        destinations: vec![],
    }
}
