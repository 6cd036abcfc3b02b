use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    destination::{DestinationType, ReminderDestination, keys},
    reminder::Reminder,
};

use super::{ChatClient, DispatchError, Dispatcher, OutgoingMessage, notification_text, with_timeout};

/// Posts into a group channel, optionally mentioning a role.
pub struct ChannelDispatcher {
    client: Arc<dyn ChatClient>,
    timeout: Duration,
}

impl ChannelDispatcher {
    pub fn new(client: Arc<dyn ChatClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl Dispatcher for ChannelDispatcher {
    fn supported_type(&self) -> DestinationType {
        DestinationType::Channel
    }

    async fn dispatch(
        &self,
        reminder: &Reminder,
        destination: &ReminderDestination,
    ) -> Result<(), DispatchError> {
        let channel_id = destination.required(keys::CHANNEL_ID)?;
        let guild_id = destination.required(keys::GUILD_ID)?;
        let message = OutgoingMessage {
            text: notification_text(reminder),
            mention_role: destination.optional(keys::ROLE_ID)?,
            snooze_action: None,
        };

        with_timeout(self.timeout, self.client.send_message(&channel_id, message)).await?;

        log::info!(
            "Delivered reminder to channel. [reminder_id = {}, guild_id = {}, channel_id = {}]",
            reminder.id,
            guild_id,
            channel_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        destination::NewDestination,
        test_utils::{RecordingChatClient, reminder_at},
    };

    use super::*;

    #[tokio::test]
    async fn posts_into_channel_with_role_mention() {
        let client = RecordingChatClient::default();
        let dispatcher = ChannelDispatcher::new(Arc::new(client.clone()), Duration::from_secs(10));
        let reminder = reminder_at(3, chrono::Utc::now());
        let destination = NewDestination::new(DestinationType::Channel)
            .with(keys::CHANNEL_ID, "-100200")
            .with(keys::GUILD_ID, "-100")
            .with(keys::ROLE_ID, "oncall")
            .into_destination(1);

        dispatcher.dispatch(&reminder, &destination).await.unwrap();

        let sent = client.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "-100200");
        assert_eq!(sent[0].1.mention_role.as_deref(), Some("oncall"));
        assert_eq!(sent[0].1.snooze_action, None);
    }

    #[tokio::test]
    async fn chat_failure_is_reported() {
        let client = RecordingChatClient::failing();
        let dispatcher = ChannelDispatcher::new(Arc::new(client), Duration::from_secs(10));
        let reminder = reminder_at(3, chrono::Utc::now());
        let destination = NewDestination::new(DestinationType::Channel)
            .with(keys::CHANNEL_ID, "-100200")
            .with(keys::GUILD_ID, "-100")
            .into_destination(1);

        let result = dispatcher.dispatch(&reminder, &destination).await;

        assert!(matches!(result, Err(DispatchError::Chat(_))));
    }
}
