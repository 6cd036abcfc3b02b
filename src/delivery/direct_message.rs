use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    destination::{DestinationType, ReminderDestination, keys},
    reminder::Reminder,
};

use super::{ChatClient, DispatchError, Dispatcher, OutgoingMessage, notification_text, with_timeout};

pub struct DirectMessageDispatcher {
    client: Arc<dyn ChatClient>,
    timeout: Duration,
}

impl DirectMessageDispatcher {
    pub fn new(client: Arc<dyn ChatClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl Dispatcher for DirectMessageDispatcher {
    fn supported_type(&self) -> DestinationType {
        DestinationType::DirectMessage
    }

    async fn dispatch(
        &self,
        reminder: &Reminder,
        destination: &ReminderDestination,
    ) -> Result<(), DispatchError> {
        let user_id = destination.required(keys::USER_ID)?;
        let message = OutgoingMessage {
            text: notification_text(reminder),
            mention_role: None,
            snooze_action: Some(reminder.id),
        };

        with_timeout(self.timeout, async {
            let channel_id = self.client.open_private_channel(&user_id).await?;
            self.client.send_message(&channel_id, message).await
        })
        .await?;

        log::info!(
            "Delivered reminder as direct message. [reminder_id = {}, user_id = {}]",
            reminder.id,
            user_id
        );
        Ok(())
    }
}
