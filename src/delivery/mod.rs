mod channel;
mod chat;
mod direct_message;
mod registry;
mod webhook;

use std::{error::Error as _, future::Future, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    destination::{DestinationError, DestinationType, ReminderDestination},
    reminder::Reminder,
};

pub use channel::ChannelDispatcher;
pub use chat::{ChatClient, ChatError, OutgoingMessage};
pub use direct_message::DirectMessageDispatcher;
pub use registry::{DestinationFailure, DispatchReport, DispatcherRegistry};
pub use webhook::{WebhookDispatcher, build_payload, mask_url};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    InvalidDestination(#[from] DestinationError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    /// `source` never carries the URL; `url` is already masked.
    #[error("Webhook request to {url} failed")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Webhook {url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("Webhook payload is not valid JSON")]
    Payload(#[from] serde_json::Error),

    #[error("No dispatcher registered for {0} destinations")]
    NoDispatcher(DestinationType),
}

impl DispatchError {
    /// Renders the error with its whole source chain, used as the persisted trace.
    pub fn trace(&self) -> String {
        let mut trace = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            trace.push_str(": ");
            trace.push_str(&cause.to_string());
            source = cause.source();
        }
        trace
    }
}

/// Delivers a fired reminder to one kind of destination.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    fn supported_type(&self) -> DestinationType;

    async fn dispatch(
        &self,
        reminder: &Reminder,
        destination: &ReminderDestination,
    ) -> Result<(), DispatchError>;
}

pub(crate) fn notification_text(reminder: &Reminder) -> String {
    format!("🔔 {}", reminder.message)
}

pub(crate) async fn with_timeout<T, E>(
    limit: Duration,
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, DispatchError>
where
    E: Into<DispatchError>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(DispatchError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_includes_the_source_chain() {
        let error = DispatchError::from(ChatError::Rejected("chat not found".to_owned()));

        assert_eq!(error.trace(), "Chat platform rejected the message: chat not found");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_delivery_times_out() {
        let result: Result<(), DispatchError> = with_timeout(Duration::from_secs(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ChatError>(())
        })
        .await;

        assert!(matches!(result, Err(DispatchError::Timeout(limit)) if limit == Duration::from_secs(10)));
    }
}
