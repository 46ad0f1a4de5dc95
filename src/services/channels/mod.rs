//! services/channels/mod.rs
//! Contrato común de los adaptadores de canal y el registro que los agrupa.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::channel_model::{Channel, DEFAULT_PRIORITY};
use crate::models::dispatch_model::DispatchRecord;
use crate::models::entity_model::{Driver, Route};

pub mod email_channel;
pub mod telegram_channel;

/// Everything an adapter needs for one attempt. `message` is the rendered,
/// channel-neutral text; adapters may format or escape it but not rebuild it.
#[derive(Debug, Clone, Copy)]
pub struct SendContext<'a> {
    pub dispatch: &'a DispatchRecord,
    pub driver: &'a Driver,
    pub route: &'a Route,
    pub message: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

impl SendOutcome {
    pub fn delivered(provider_message_id: Option<String>, sent_at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            provider_message_id,
            error: None,
            sent_at,
        }
    }

    pub fn failed(error: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            error: Some(error.into()),
            sent_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub healthy: bool,
    /// False when the provider credentials are missing, as opposed to a failed probe.
    pub configured: bool,
    pub message: Option<String>,
}

impl HealthStatus {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            configured: true,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            configured: true,
            message: Some(message.into()),
        }
    }

    pub fn unconfigured(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            configured: false,
            message: Some(message.into()),
        }
    }
}

/// One implementation per channel. `send` performs exactly one provider call and
/// reports provider failures in the outcome instead of returning an error.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel_type(&self) -> Channel;

    fn can_send(&self, driver: &Driver) -> bool;

    async fn send(&self, context: &SendContext<'_>) -> SendOutcome;

    async fn health_check(&self) -> HealthStatus;
}

/// Adapters injected at bootstrap, keyed by channel.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    pub fn new(adapters: Vec<Arc<dyn ChannelAdapter>>) -> Self {
        let mut registry = ChannelRegistry::default();
        for adapter in adapters {
            registry.register(adapter);
        }
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        let channel = adapter.channel_type();
        if self.adapters.insert(channel, adapter).is_some() {
            log::warn!("Adapter for channel '{}' replaced", channel);
        }
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel).cloned()
    }

    /// A channel without a registered adapter is never reachable.
    pub fn can_send(&self, channel: Channel, driver: &Driver) -> bool {
        self.adapters
            .get(&channel)
            .map(|adapter| adapter.can_send(driver))
            .unwrap_or(false)
    }

    /// Registered adapters in default priority order.
    pub fn adapters(&self) -> Vec<Arc<dyn ChannelAdapter>> {
        DEFAULT_PRIORITY
            .iter()
            .filter_map(|channel| self.get(*channel))
            .collect()
    }
}

/// Trimmed, non-empty value of an optional driver field.
pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
