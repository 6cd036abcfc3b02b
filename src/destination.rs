use std::{fmt, str::FromStr};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type DestinationId = i64;
pub type DestinationMetadata = serde_json::Map<String, Value>;

pub mod keys {
    pub const USER_ID: &str = "user_id";
    pub const CHANNEL_ID: &str = "channel_id";
    pub const GUILD_ID: &str = "guild_id";
    pub const ROLE_ID: &str = "role_id";
    pub const URL: &str = "url";
    pub const PLATFORM: &str = "platform";
    pub const HEADERS: &str = "headers";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationType {
    DirectMessage,
    Channel,
    Webhook,
}

impl fmt::Display for DestinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DestinationType::DirectMessage => "direct_message",
            DestinationType::Channel => "channel",
            DestinationType::Webhook => "webhook",
        };
        f.write_str(name)
    }
}

/// Selects the payload shape a webhook destination receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookPlatform {
    #[default]
    Generic,
    Discord,
    Slack,
}

impl FromStr for WebhookPlatform {
    type Err = DestinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "generic" => Ok(Self::Generic),
            "discord" => Ok(Self::Discord),
            "slack" => Ok(Self::Slack),
            other => Err(DestinationError::InvalidValue {
                key: keys::PLATFORM,
                reason: format!("unsupported platform {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DestinationError {
    #[error("{kind} destination requires metadata key {key:?}")]
    MissingKey {
        kind: DestinationType,
        key: &'static str,
    },

    #[error("Metadata key {key:?} is invalid: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDestination {
    #[serde(rename = "type")]
    pub kind: DestinationType,
    #[serde(default)]
    pub metadata: DestinationMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderDestination {
    pub id: DestinationId,
    #[serde(rename = "type")]
    pub kind: DestinationType,
    #[serde(default)]
    pub metadata: DestinationMetadata,
}

impl NewDestination {
    pub fn new(kind: DestinationType) -> Self {
        Self {
            kind,
            metadata: DestinationMetadata::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), DestinationError> {
        validate_metadata(self.kind, &self.metadata)
    }

    pub fn into_destination(self, id: DestinationId) -> ReminderDestination {
        ReminderDestination {
            id,
            kind: self.kind,
            metadata: self.metadata,
        }
    }
}

impl ReminderDestination {
    pub fn validate(&self) -> Result<(), DestinationError> {
        validate_metadata(self.kind, &self.metadata)
    }

    pub fn required(&self, key: &'static str) -> Result<String, DestinationError> {
        required(self.kind, &self.metadata, key)
    }

    pub fn optional(&self, key: &'static str) -> Result<Option<String>, DestinationError> {
        optional(&self.metadata, key)
    }

    pub fn webhook_url(&self) -> Result<Url, DestinationError> {
        parse_url(&self.required(keys::URL)?)
    }

    pub fn webhook_platform(&self) -> Result<WebhookPlatform, DestinationError> {
        self.optional(keys::PLATFORM)?
            .map(|platform| platform.parse())
            .transpose()
            .map(Option::unwrap_or_default)
    }

    pub fn webhook_headers(&self) -> Result<Vec<(String, String)>, DestinationError> {
        headers(&self.metadata)
    }
}

fn validate_metadata(
    kind: DestinationType,
    metadata: &DestinationMetadata,
) -> Result<(), DestinationError> {
    match kind {
        DestinationType::DirectMessage => {
            required(kind, metadata, keys::USER_ID)?;
        }
        DestinationType::Channel => {
            required(kind, metadata, keys::CHANNEL_ID)?;
            required(kind, metadata, keys::GUILD_ID)?;
            optional(metadata, keys::ROLE_ID)?;
        }
        DestinationType::Webhook => {
            parse_url(&required(kind, metadata, keys::URL)?)?;
            if let Some(platform) = optional(metadata, keys::PLATFORM)? {
                platform.parse::<WebhookPlatform>()?;
            }
            headers(metadata)?;
        }
    }

    Ok(())
}

fn required(
    kind: DestinationType,
    metadata: &DestinationMetadata,
    key: &'static str,
) -> Result<String, DestinationError> {
    optional(metadata, key)?.ok_or(DestinationError::MissingKey { kind, key })
}

/// Ids may arrive either as strings or as JSON numbers; both are read back as text.
fn optional(
    metadata: &DestinationMetadata,
    key: &'static str,
) -> Result<Option<String>, DestinationError> {
    match metadata.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) if value.trim().is_empty() => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.trim().to_owned())),
        Some(Value::Number(value)) => Ok(Some(value.to_string())),
        Some(other) => Err(DestinationError::InvalidValue {
            key,
            reason: format!("expected a string, got {other}"),
        }),
    }
}

fn parse_url(raw: &str) -> Result<Url, DestinationError> {
    let url = Url::parse(raw).map_err(|e| DestinationError::InvalidValue {
        key: keys::URL,
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(DestinationError::InvalidValue {
            key: keys::URL,
            reason: format!("unsupported scheme {scheme:?}"),
        }),
    }
}

fn headers(metadata: &DestinationMetadata) -> Result<Vec<(String, String)>, DestinationError> {
    let invalid = |reason: String| DestinationError::InvalidValue {
        key: keys::HEADERS,
        reason,
    };

    match metadata.get(keys::HEADERS) {
        None | Some(Value::Null) => Ok(vec![]),
        Some(Value::Object(headers)) => headers
            .iter()
            .map(|(name, value)| match value {
                Value::String(value) => Ok((name.clone(), value.clone())),
                other => Err(invalid(format!("header {name:?} must be a string, got {other}"))),
            })
            .collect(),
        Some(other) => Err(invalid(format!("expected an object, got {other}"))),
    }
}
