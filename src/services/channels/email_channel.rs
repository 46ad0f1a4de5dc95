//! services/channels/email_channel.rs
//! Envío de despachos por email: SendGrid, Resend (HTTP) o SMTP directo con lettre.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::dispatch_config::{EmailProvider, EmailSettings, SmtpSettings};
use crate::models::channel_model::Channel;
use crate::models::entity_model::{Driver, Route};
use crate::services::channels::{
    non_blank, ChannelAdapter, HealthStatus, SendContext, SendOutcome,
};

const NOT_CONFIGURED: &str = "Email provider is not configured";

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendGridErrorResponse {
    #[serde(default)]
    errors: Vec<SendGridError>,
}

#[derive(Debug, Deserialize)]
struct SendGridError {
    message: Option<String>,
}

/// Provider credentials resolved once at construction.
#[derive(Clone)]
enum Transport {
    SendGrid { api_url: String, api_key: String },
    Resend { api_url: String, api_key: String },
    Smtp(SmtpSettings),
    Unconfigured,
}

#[derive(Clone)]
pub struct EmailChannel {
    http_client: Client,
    transport: Transport,
    from_address: String,
    from_name: String,
}

impl EmailChannel {
    pub fn new(settings: &EmailSettings) -> Self {
        Self::with_client(Client::new(), settings)
    }

    pub fn with_client(http_client: Client, settings: &EmailSettings) -> Self {
        let transport = match settings.provider {
            EmailProvider::SendGrid => match &settings.sendgrid_api_key {
                Some(key) => Transport::SendGrid {
                    api_url: settings.sendgrid_api_url.trim_end_matches('/').to_string(),
                    api_key: key.clone(),
                },
                None => Transport::Unconfigured,
            },
            EmailProvider::Resend => match &settings.resend_api_key {
                Some(key) => Transport::Resend {
                    api_url: settings.resend_api_url.trim_end_matches('/').to_string(),
                    api_key: key.clone(),
                },
                None => Transport::Unconfigured,
            },
            EmailProvider::Smtp => match &settings.smtp {
                Some(smtp) => Transport::Smtp(smtp.clone()),
                None => Transport::Unconfigured,
            },
        };

        Self {
            http_client,
            transport,
            from_address: settings.from_address.clone(),
            from_name: settings.from_name.clone(),
        }
    }

    fn provider_name(&self) -> &'static str {
        match self.transport {
            Transport::SendGrid { .. } => "sendgrid",
            Transport::Resend { .. } => "resend",
            Transport::Smtp(_) => "smtp",
            Transport::Unconfigured => "none",
        }
    }

    async fn send_via_sendgrid(
        &self,
        api_url: &str,
        api_key: &str,
        email: &OutgoingEmail<'_>,
    ) -> Result<Option<String>> {
        let payload = json!({
            "personalizations": [{ "to": [{ "email": email.to }] }],
            "from": { "email": self.from_address, "name": self.from_name },
            "subject": email.subject,
            "content": [
                { "type": "text/plain", "value": email.text },
                { "type": "text/html", "value": email.html },
            ],
        });

        let response = self
            .http_client
            .post(format!("{api_url}/v3/mail/send"))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .context("SendGrid request failed")?;

        let status = response.status();
        if status == StatusCode::ACCEPTED || status == StatusCode::OK {
            let message_id = response
                .headers()
                .get("x-message-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Ok(message_id);
        }

        let detail = response
            .json::<SendGridErrorResponse>()
            .await
            .ok()
            .map(|body| {
                body.errors
                    .into_iter()
                    .filter_map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .filter(|msg| !msg.is_empty());

        Err(anyhow!(
            detail.unwrap_or_else(|| format!("SendGrid API error: {}", status.as_u16()))
        ))
    }

    async fn send_via_resend(
        &self,
        api_url: &str,
        api_key: &str,
        email: &OutgoingEmail<'_>,
    ) -> Result<Option<String>> {
        let payload = json!({
            "from": format!("{} <{}>", self.from_name, self.from_address),
            "to": [email.to],
            "subject": email.subject,
            "html": email.html,
            "text": email.text,
        });

        let response = self
            .http_client
            .post(format!("{api_url}/emails"))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .context("Resend request failed")?;

        let status = response.status();
        let body = response.json::<ResendResponse>().await.ok();

        match body {
            Some(ResendResponse { id: Some(id), .. }) if status.is_success() => Ok(Some(id)),
            Some(ResendResponse {
                message: Some(message),
                ..
            }) => Err(anyhow!(message)),
            _ => Err(anyhow!("Resend API error: {}", status.as_u16())),
        }
    }

    async fn send_via_smtp(&self, smtp: &SmtpSettings, email: &OutgoingEmail<'_>) -> Result<String> {
        let from: Mailbox = format!("{} <{}>", self.from_name, self.from_address)
            .parse()
            .context("Invalid from address")?;
        let to: Mailbox = email.to.parse().context("Invalid recipient address")?;

        let domain = self
            .from_address
            .rsplit_once('@')
            .map(|(_, d)| d)
            .unwrap_or("localhost");
        let message_id = format!("<{}@{}>", Uuid::new_v4(), domain);

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.clone())
            .message_id(Some(message_id.clone()))
            .multipart(MultiPart::alternative_plain_html(
                email.text.to_string(),
                email.html.clone(),
            ))
            .context("Failed to build email message")?;

        build_smtp_transport(smtp)?
            .send(message)
            .await
            .context("SMTP send failed")?;

        Ok(message_id)
    }
}

fn build_smtp_transport(smtp: &SmtpSettings) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
    let tls_params = TlsParameters::new(smtp.host.clone())?;
    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?
        .port(smtp.port)
        .tls(Tls::Required(tls_params));
    if !smtp.user.is_empty() {
        builder = builder.credentials(Credentials::new(smtp.user.clone(), smtp.pass.clone()));
    }
    Ok(builder.build())
}

struct OutgoingEmail<'a> {
    to: &'a str,
    subject: String,
    text: &'a str,
    html: String,
}

pub fn email_subject(route: &Route) -> String {
    format!("Route Assignment: {} - {}", route.name, route.date)
}

/// Wraps the rendered text in a minimal HTML document, escaped.
pub fn html_body(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    format!(
        "<!DOCTYPE html><html><body><pre style=\"font-family: inherit; white-space: pre-wrap;\">{escaped}</pre></body></html>"
    )
}

#[async_trait]
impl ChannelAdapter for EmailChannel {
    fn channel_type(&self) -> Channel {
        Channel::Email
    }

    fn can_send(&self, driver: &Driver) -> bool {
        non_blank(&driver.email).is_some()
    }

    async fn send(&self, context: &SendContext<'_>) -> SendOutcome {
        let sent_at = Utc::now();
        let dispatch_id = &context.dispatch.id;

        let Some(to) = non_blank(&context.driver.email) else {
            log::warn!(
                "(email) Driver {} has no email address (dispatch {})",
                context.driver.id,
                dispatch_id
            );
            return SendOutcome::failed("Driver does not have email address configured", sent_at);
        };

        let email = OutgoingEmail {
            to,
            subject: email_subject(context.route),
            text: context.message,
            html: html_body(context.message),
        };

        let result = match &self.transport {
            Transport::SendGrid { api_url, api_key } => {
                self.send_via_sendgrid(api_url, api_key, &email).await
            }
            Transport::Resend { api_url, api_key } => {
                self.send_via_resend(api_url, api_key, &email).await
            }
            Transport::Smtp(smtp) => self.send_via_smtp(smtp, &email).await.map(Some),
            Transport::Unconfigured => {
                log::error!("(email) {} (dispatch {})", NOT_CONFIGURED, dispatch_id);
                return SendOutcome::failed(NOT_CONFIGURED, sent_at);
            }
        };

        match result {
            Ok(message_id) => {
                log::info!(
                    "(email) Dispatch {} sent via {}, message_id={:?}",
                    dispatch_id,
                    self.provider_name(),
                    message_id
                );
                SendOutcome::delivered(message_id, sent_at)
            }
            Err(e) => {
                log::error!(
                    "(email) Dispatch {} failed via {}: {:#}",
                    dispatch_id,
                    self.provider_name(),
                    e
                );
                SendOutcome::failed(format!("{e:#}"), sent_at)
            }
        }
    }

    async fn health_check(&self) -> HealthStatus {
        let (url, api_key, label) = match &self.transport {
            Transport::SendGrid { api_url, api_key } => {
                (format!("{api_url}/v3/user/profile"), api_key, "SendGrid")
            }
            Transport::Resend { api_url, api_key } => {
                (format!("{api_url}/domains"), api_key, "Resend")
            }
            Transport::Smtp(smtp) => {
                return match build_smtp_transport(smtp) {
                    Ok(mailer) => match mailer.test_connection().await {
                        Ok(true) => HealthStatus::healthy("SMTP server connected"),
                        Ok(false) => HealthStatus::unhealthy("SMTP server refused connection"),
                        Err(e) => HealthStatus::unhealthy(format!("Health check failed: {e}")),
                    },
                    Err(e) => HealthStatus::unhealthy(format!("Health check failed: {e:#}")),
                };
            }
            Transport::Unconfigured => return HealthStatus::unconfigured(NOT_CONFIGURED),
        };

        match self.http_client.get(url).bearer_auth(api_key).send().await {
            Ok(r) if r.status().is_success() => HealthStatus::healthy(format!("{label} API connected")),
            Ok(r) if r.status() == StatusCode::UNAUTHORIZED => {
                HealthStatus::unhealthy("Invalid API key")
            }
            Ok(r) => HealthStatus::unhealthy(format!("API error: {}", r.status().as_u16())),
            Err(e) => HealthStatus::unhealthy(format!("Health check failed: {e}")),
        }
    }
}
