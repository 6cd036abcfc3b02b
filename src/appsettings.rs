use std::{sync::OnceLock, time::Duration};

use chrono::TimeDelta;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, builder::DefaultState};
use serde::Deserialize;

use crate::scheduling::EngineSettings;

#[derive(Deserialize, Debug)]
pub struct TelegramSettings {
    pub token: String,
    /// How far the snooze button pushes a reminder.
    #[serde(default = "default_snooze_minutes")]
    pub snooze_minutes: u32,
}

fn default_snooze_minutes() -> u32 {
    10
}

impl TelegramSettings {
    pub fn snooze_for(&self) -> TimeDelta {
        TimeDelta::minutes(self.snooze_minutes.into())
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct SchedulerSettings {
    pub mailbox_capacity: usize,
    pub due_tolerance_secs: u64,
    pub overdue_delay_ms: u64,
    pub retry_delay_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
            due_tolerance_secs: 60,
            overdue_delay_ms: 1000,
            retry_delay_secs: 5,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct GarbageCollectorSettings {
    pub mailbox_capacity: usize,
    pub grace_period_secs: u64,
}

impl Default for GarbageCollectorSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
            grace_period_secs: 30 * 60,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct DeliverySettings {
    pub webhook_timeout_secs: u64,
    pub chat_timeout_secs: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            webhook_timeout_secs: 10,
            chat_timeout_secs: 10,
        }
    }
}

impl DeliverySettings {
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn chat_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_timeout_secs)
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct EngineLifecycleSettings {
    pub shutdown_timeout_secs: u64,
}

impl Default for EngineLifecycleSettings {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 5,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct AppSettings {
    pub telegram: TelegramSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub garbage_collector: GarbageCollectorSettings,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default)]
    pub engine: EngineLifecycleSettings,
}

impl AppSettings {
    fn new() -> Result<Self, ConfigError> {
        Self::build(
            Config::builder()
                .add_source(File::with_name("appsettings").required(true))
                .add_source(File::with_name("appsettings.local").required(false))
                .add_source(
                    Environment::with_prefix("APP")
                        .prefix_separator("_")
                        .separator("__")
                        .try_parsing(true),
                ),
        )
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            scheduler_mailbox_capacity: self.scheduler.mailbox_capacity,
            collector_mailbox_capacity: self.garbage_collector.mailbox_capacity,
            due_tolerance: Duration::from_secs(self.scheduler.due_tolerance_secs),
            overdue_delay: Duration::from_millis(self.scheduler.overdue_delay_ms),
            retry_delay: Duration::from_secs(self.scheduler.retry_delay_secs),
            grace_period: Duration::from_secs(self.garbage_collector.grace_period_secs),
            shutdown_timeout: Duration::from_secs(self.engine.shutdown_timeout_secs),
        }
    }
}

static APPSETTINGS: OnceLock<AppSettings> = OnceLock::new();

/// Loads the settings once per process; later calls return the cached value.
pub fn init() -> Result<&'static AppSettings, ConfigError> {
    if let Some(settings) = APPSETTINGS.get() {
        return Ok(settings);
    }

    let settings = AppSettings::new()?;
    Ok(APPSETTINGS.get_or_init(|| settings))
}
