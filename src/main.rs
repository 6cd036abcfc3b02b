use std::sync::Arc;

use chime::{
    appsettings,
    clock::{Clock, SystemClock},
    delivery::{ChannelDispatcher, DirectMessageDispatcher, DispatcherRegistry, WebhookDispatcher},
    scheduling::{EngineDeps, ReminderEngine},
    storage::{InMemoryReminderStorage, ReminderRepository},
    telegram::{self, TelegramChatClient},
};
use teloxide::Bot;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    pretty_env_logger::init();

    let settings = appsettings::init()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let storage = Arc::new(InMemoryReminderStorage::new(clock.clone()));

    let bot = Bot::new(settings.telegram.token.clone());
    let chat_client = Arc::new(TelegramChatClient::new(bot.clone()));
    let http_client = reqwest::Client::builder()
        .user_agent(concat!("chime/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let registry = DispatcherRegistry::new(storage.clone())
        .register(DirectMessageDispatcher::new(
            chat_client.clone(),
            settings.delivery.chat_timeout(),
        ))
        .register(ChannelDispatcher::new(
            chat_client,
            settings.delivery.chat_timeout(),
        ))
        .register(WebhookDispatcher::new(
            http_client,
            settings.delivery.webhook_timeout(),
        ));

    let shutdown = CancellationToken::new();
    let engine = ReminderEngine::start(
        &shutdown,
        EngineDeps {
            reminders: storage.clone(),
            accounts: storage.clone(),
            errors: storage,
            registry,
            clock: clock.clone(),
        },
        settings.engine_settings(),
    )?;

    let repository: Arc<dyn ReminderRepository> = engine.repository();
    telegram::listen_for_snoozes(bot, repository, clock, settings.telegram.snooze_for()).await;

    log::info!("Shutting down");
    shutdown.cancel();
    engine.stop().await;
    Ok(())
}
