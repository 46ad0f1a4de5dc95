//! models/channel_model.rs
//! Identificadores de canal y su orden de prioridad por defecto.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Telegram,
    Email,
    Sms,
    Push,
}

/// Order used for multi-channel sends and for fallback selection.
pub const DEFAULT_PRIORITY: [Channel; 4] = [
    Channel::Telegram,
    Channel::Email,
    Channel::Sms,
    Channel::Push,
];

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Telegram => "telegram",
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Push => "push",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "telegram" => Ok(Channel::Telegram),
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            "push" => Ok(Channel::Push),
            other => Err(format!("Unsupported channel: {other}")),
        }
    }
}
