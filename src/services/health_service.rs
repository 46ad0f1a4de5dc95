//! services/health_service.rs
//! Estado de la base de datos y de cada proveedor de canal.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use futures::future::join_all;

use crate::models::health_model::{ComponentHealth, ComponentStatus, HealthReport};
use crate::services::channels::ChannelRegistry;
use crate::services::dispatch_repository::DispatchRepository;

#[derive(Clone)]
pub struct HealthService {
    dispatches: Arc<dyn DispatchRepository>,
    registry: Arc<ChannelRegistry>,
}

impl HealthService {
    pub fn new(dispatches: Arc<dyn DispatchRepository>, registry: Arc<ChannelRegistry>) -> Self {
        HealthService {
            dispatches,
            registry,
        }
    }

    /// Unhealthy if the database is down or a configured provider fails its probe;
    /// degraded if some provider is simply not configured.
    pub async fn check(&self) -> HealthReport {
        let mut components = BTreeMap::new();

        let database = match self.dispatches.ping().await {
            Ok(()) => ComponentHealth {
                status: ComponentStatus::Healthy,
                message: None,
            },
            Err(e) => {
                log::error!("Health: database unreachable: {}", e);
                ComponentHealth {
                    status: ComponentStatus::Unhealthy,
                    message: Some(e.message),
                }
            }
        };
        components.insert("database".to_string(), database);

        let adapters = self.registry.adapters();
        let probes = join_all(adapters.iter().map(|adapter| adapter.health_check())).await;
        for (adapter, probe) in adapters.iter().zip(probes) {
            let status = if probe.healthy {
                ComponentStatus::Healthy
            } else if !probe.configured {
                ComponentStatus::Degraded
            } else {
                ComponentStatus::Unhealthy
            };
            components.insert(
                adapter.channel_type().to_string(),
                ComponentHealth {
                    status,
                    message: probe.message,
                },
            );
        }

        let status = overall_status(components.values().map(|c| c.status));
        HealthReport {
            status,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            components,
        }
    }
}

fn overall_status<I>(statuses: I) -> ComponentStatus
where
    I: IntoIterator<Item = ComponentStatus>,
{
    statuses
        .into_iter()
        .fold(ComponentStatus::Healthy, |acc, status| match (acc, status) {
            (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                ComponentStatus::Unhealthy
            }
            (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                ComponentStatus::Degraded
            }
            _ => ComponentStatus::Healthy,
        })
}
