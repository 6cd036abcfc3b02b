use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup},
};

use crate::{
    clock::Clock,
    delivery::{ChatClient, ChatError, OutgoingMessage},
    reminder::ReminderId,
    storage::{ReminderRepository, StorageError},
};

type HandlerResult = anyhow::Result<()>;
type HandlerRepository = Arc<dyn ReminderRepository>;
type HandlerClock = Arc<dyn Clock>;

#[derive(Debug, Clone, Copy)]
struct SnoozeDuration(TimeDelta);

pub const SNOOZE_CALLBACK_PREFIX: &str = "snooze:";

/// Chat client backed by the Telegram Bot API. In Telegram a private chat shares its id with the
/// user, so opening one is just parsing the id.
pub struct TelegramChatClient {
    bot: Bot,
}

impl TelegramChatClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatClient for TelegramChatClient {
    async fn open_private_channel(&self, user_id: &str) -> Result<String, ChatError> {
        parse_chat_id(user_id).map(|chat_id| chat_id.0.to_string())
    }

    async fn send_message(
        &self,
        channel_id: &str,
        message: OutgoingMessage,
    ) -> Result<(), ChatError> {
        let chat_id = parse_chat_id(channel_id)?;
        let text = render_text(&message);

        let request = self.bot.send_message(chat_id, text);
        match message.snooze_action {
            Some(reminder_id) => {
                request.reply_markup(snooze_keyboard(reminder_id)).await?;
            }
            None => {
                request.await?;
            }
        }

        Ok(())
    }
}

fn parse_chat_id(raw: &str) -> Result<ChatId, ChatError> {
    raw.trim()
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| ChatError::InvalidId(raw.to_owned()))
}

fn render_text(message: &OutgoingMessage) -> String {
    match &message.mention_role {
        Some(role) => format!("@{} {}", role.trim_start_matches('@'), message.text),
        None => message.text.clone(),
    }
}

fn snooze_keyboard(reminder_id: ReminderId) -> InlineKeyboardMarkup {
    let snooze_button = InlineKeyboardButton::callback(
        "Snooze",
        format!("{SNOOZE_CALLBACK_PREFIX}{reminder_id}"),
    );
    InlineKeyboardMarkup::new(vec![vec![snooze_button]])
}

/// Extracts the reminder id from a snooze button callback.
pub fn parse_snooze_callback(data: &str) -> Option<ReminderId> {
    data.strip_prefix(SNOOZE_CALLBACK_PREFIX)?.parse().ok()
}

/// Answers snooze button presses until Ctrl-C. `repository` must be the engine's notifying
/// repository so the scheduler picks up the new fire time.
pub async fn listen_for_snoozes(
    bot: Bot,
    repository: HandlerRepository,
    clock: HandlerClock,
    snooze_for: TimeDelta,
) {
    log::info!("Listening for snooze requests");

    let handler = Update::filter_callback_query().endpoint(handle_snooze_query);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![repository, clock, SnoozeDuration(snooze_for)])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await
}

async fn handle_snooze_query(
    bot: Bot,
    query: CallbackQuery,
    repository: HandlerRepository,
    clock: HandlerClock,
    snooze: SnoozeDuration,
) -> HandlerResult {
    let Some(reminder_id) = query.data.as_deref().and_then(parse_snooze_callback) else {
        bot.answer_callback_query(query.id).await?;
        return Ok(());
    };

    let until = clock.now() + snooze.0;
    let answer = match snooze_reminder(repository.as_ref(), reminder_id, until).await? {
        Some(until) => format!("Snoozed until {} UTC", until.format("%H:%M")),
        None => "This reminder no longer exists".to_owned(),
    };

    bot.answer_callback_query(query.id).text(answer).await?;
    Ok(())
}

/// Returns the new fire time, or `None` when the reminder is gone.
async fn snooze_reminder(
    repository: &dyn ReminderRepository,
    reminder_id: ReminderId,
    until: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, StorageError> {
    match repository.snooze(reminder_id, until).await {
        Ok(reminder) => {
            log::info!(
                "Reminder snoozed from chat. [reminder_id = {}, until = {}]",
                reminder_id,
                until
            );
            Ok(reminder.next_fire)
        }
        Err(StorageError::NotFound(_)) => Ok(None),
        Err(error) => Err(error),
    }
}
