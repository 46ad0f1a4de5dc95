//! config/dispatch_config.rs
//! Configuración del servicio leída del entorno (.env incluido vía dotenv).

use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailProvider {
    SendGrid,
    Resend,
    Smtp,
}

impl FromStr for EmailProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sendgrid" => Ok(EmailProvider::SendGrid),
            "resend" => Ok(EmailProvider::Resend),
            "smtp" => Ok(EmailProvider::Smtp),
            other => Err(format!("Unknown email provider: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub api_url: String,
    pub bot_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub provider: EmailProvider,
    pub sendgrid_api_url: String,
    pub sendgrid_api_key: Option<String>,
    pub resend_api_url: String,
    pub resend_api_key: Option<String>,
    pub smtp: Option<SmtpSettings>,
    pub from_address: String,
    pub from_name: String,
}

/// Timeouts and pool width used by the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub channel_send_timeout: Duration,
    pub dispatch_timeout: Duration,
    pub batch_concurrency: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        OrchestratorSettings {
            channel_send_timeout: Duration::from_secs(30),
            dispatch_timeout: Duration::from_secs(120),
            batch_concurrency: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub bind_address: String,
    pub port: u16,
    pub http_workers: usize,
    pub database_url: String,
    pub app_base_url: String,
    pub orchestrator: OrchestratorSettings,
    pub telegram: TelegramSettings,
    pub email: EmailSettings,
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let defaults = OrchestratorSettings::default();
        let orchestrator = OrchestratorSettings {
            channel_send_timeout: Duration::from_secs(parse_or(
                "CHANNEL_SEND_TIMEOUT_SECS",
                get("CHANNEL_SEND_TIMEOUT_SECS"),
                defaults.channel_send_timeout.as_secs(),
            )),
            dispatch_timeout: Duration::from_secs(parse_or(
                "DISPATCH_TIMEOUT_SECS",
                get("DISPATCH_TIMEOUT_SECS"),
                defaults.dispatch_timeout.as_secs(),
            )),
            batch_concurrency: parse_or(
                "BATCH_CONCURRENCY",
                get("BATCH_CONCURRENCY"),
                defaults.batch_concurrency,
            )
            .max(1),
        };

        let smtp = get("SMTP_HOST").map(|host| SmtpSettings {
            host,
            port: parse_or("SMTP_PORT", get("SMTP_PORT"), 587),
            user: get_or("SMTP_USER", ""),
            pass: get_or("SMTP_PASS", ""),
        });

        let provider = match get("EMAIL_PROVIDER") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                log::warn!("{e}; falling back to sendgrid");
                EmailProvider::SendGrid
            }),
            None => EmailProvider::SendGrid,
        };

        DispatchConfig {
            bind_address: get_or("BIND_ADDRESS", "0.0.0.0"),
            port: parse_or("PORT", get("PORT"), 5022),
            http_workers: parse_or("HTTP_WORKERS", get("HTTP_WORKERS"), 1usize).max(1),
            database_url: get_or("DATABASE_URL", "sqlite:data/dispatch.db"),
            app_base_url: get_or("APP_BASE_URL", "https://fleetillo.com"),
            orchestrator,
            telegram: TelegramSettings {
                api_url: get_or("TELEGRAM_API_URL", "https://api.telegram.org"),
                bot_token: get("TELEGRAM_BOT_TOKEN"),
            },
            email: EmailSettings {
                provider,
                sendgrid_api_url: get_or("SENDGRID_API_URL", "https://api.sendgrid.com"),
                sendgrid_api_key: get("SENDGRID_API_KEY"),
                resend_api_url: get_or("RESEND_API_URL", "https://api.resend.com"),
                resend_api_key: get("RESEND_API_KEY"),
                smtp,
                from_address: get_or("EMAIL_FROM_ADDRESS", "dispatch@fleetillo.com"),
                from_name: get_or("EMAIL_FROM_NAME", "Fleetillo Dispatch"),
            },
        }
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr + Copy,
{
    match raw {
        Some(value) => value.parse().unwrap_or_else(|_| {
            log::warn!("Invalid value for {key}: {value:?}; using default");
            default
        }),
        None => default,
    }
}
