//! services/channels/telegram_channel.rs
//! Envío de despachos por la Bot API de Telegram.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::dispatch_config::TelegramSettings;
use crate::models::channel_model::Channel;
use crate::models::entity_model::Driver;
use crate::services::channels::{
    non_blank, ChannelAdapter, HealthStatus, SendContext, SendOutcome,
};

const NOT_CONFIGURED: &str = "Telegram bot token is not configured";

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    first_name: String,
    username: Option<String>,
}

#[derive(Clone)]
pub struct TelegramChannel {
    http_client: Client,
    api_url: String,
    bot_token: Option<String>,
}

impl TelegramChannel {
    pub fn new(settings: &TelegramSettings) -> Self {
        Self::with_client(Client::new(), settings)
    }

    pub fn with_client(http_client: Client, settings: &TelegramSettings) -> Self {
        Self {
            http_client,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            bot_token: settings.bot_token.clone(),
        }
    }

    fn method_url(&self, token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, token, method)
    }
}

#[async_trait]
impl ChannelAdapter for TelegramChannel {
    fn channel_type(&self) -> Channel {
        Channel::Telegram
    }

    fn can_send(&self, driver: &Driver) -> bool {
        non_blank(&driver.telegram_chat_id).is_some()
    }

    async fn send(&self, context: &SendContext<'_>) -> SendOutcome {
        let sent_at = Utc::now();
        let dispatch_id = &context.dispatch.id;

        let Some(chat_id) = non_blank(&context.driver.telegram_chat_id) else {
            log::warn!(
                "(telegram) Driver {} has no telegram_chat_id (dispatch {})",
                context.driver.id,
                dispatch_id
            );
            return SendOutcome::failed("Driver does not have telegram_chat_id configured", sent_at);
        };
        let Some(token) = self.bot_token.as_deref() else {
            log::error!("(telegram) {} (dispatch {})", NOT_CONFIGURED, dispatch_id);
            return SendOutcome::failed(NOT_CONFIGURED, sent_at);
        };

        let payload = json!({
            "chat_id": chat_id,
            "text": escape_markdown_v2(context.message),
            "parse_mode": "MarkdownV2",
        });

        let response = match self
            .http_client
            .post(self.method_url(token, "sendMessage"))
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                // without_url: the request URL carries the bot token.
                let e = e.without_url();
                log::error!("(telegram) sendMessage failed for dispatch {}: {}", dispatch_id, e);
                return SendOutcome::failed(format!("Telegram request failed: {e}"), sent_at);
            }
        };

        let http_status = response.status();
        let body = match response.json::<TelegramResponse<SentMessage>>().await {
            Ok(b) => b,
            Err(_) => {
                return SendOutcome::failed(
                    format!("Telegram API returned HTTP {http_status}"),
                    sent_at,
                )
            }
        };

        match body {
            TelegramResponse {
                ok: true,
                result: Some(message),
                ..
            } => {
                log::info!(
                    "(telegram) Dispatch {} delivered, message_id={}",
                    dispatch_id,
                    message.message_id
                );
                SendOutcome::delivered(Some(message.message_id.to_string()), sent_at)
            }
            TelegramResponse {
                error_code,
                description,
                ..
            } => {
                let error =
                    description.unwrap_or_else(|| "Unknown Telegram API error".to_string());
                log::error!(
                    "(telegram) API error for dispatch {}: code={:?} {}",
                    dispatch_id,
                    error_code,
                    error
                );
                SendOutcome::failed(error, sent_at)
            }
        }
    }

    async fn health_check(&self) -> HealthStatus {
        let Some(token) = self.bot_token.as_deref() else {
            return HealthStatus::unconfigured(NOT_CONFIGURED);
        };

        let response = match self
            .http_client
            .get(self.method_url(token, "getMe"))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return HealthStatus::unhealthy(format!("Health check failed: {}", e.without_url()))
            }
        };

        match response.json::<TelegramResponse<BotUser>>().await {
            Ok(TelegramResponse {
                ok: true,
                result: Some(bot),
                ..
            }) => HealthStatus::healthy(format!(
                "Bot connected: @{}",
                bot.username.unwrap_or(bot.first_name)
            )),
            Ok(TelegramResponse { description, .. }) => HealthStatus::unhealthy(
                description.unwrap_or_else(|| "Failed to verify bot connectivity".to_string()),
            ),
            Err(e) => HealthStatus::unhealthy(format!("Health check failed: {}", e.without_url())),
        }
    }
}

/// Escapes every character Telegram's MarkdownV2 treats as markup.
pub fn escape_markdown_v2(text: &str) -> String {
    const SPECIAL: &[char] = &[
        '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.',
        '!',
    ];

    let mut escaped = String::with_capacity(text.len() + text.len() / 8);
    for c in text.chars() {
        if SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
