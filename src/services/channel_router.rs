//! services/channel_router.rs
//! Elige por qué canales se envía un despacho. Sin I/O: solo consulta el registro.

use std::sync::Arc;

use crate::errors::DispatchError;
use crate::models::channel_model::{Channel, DEFAULT_PRIORITY};
use crate::models::dispatch_model::DispatchRequest;
use crate::models::entity_model::Driver;
use crate::services::channels::ChannelRegistry;

#[derive(Clone)]
pub struct ChannelRouter {
    registry: Arc<ChannelRegistry>,
}

impl ChannelRouter {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self { registry }
    }

    /// Channels to attempt, in send order.
    ///
    /// 1. Explicit channels, filtered to the reachable ones.
    /// 2. `multi_channel`: every reachable channel in default priority.
    /// 3. The preferred channel when reachable.
    /// 4. With fallback enabled, the first reachable channel other than the preferred one.
    ///
    /// A driver with no preferred channel gets the first reachable channel in priority order.
    pub fn select(
        &self,
        driver: &Driver,
        request: &DispatchRequest,
    ) -> Result<Vec<Channel>, DispatchError> {
        let reachable = |channel: &Channel| self.registry.can_send(*channel, driver);

        let selected: Vec<Channel> = if !request.channels.is_empty() {
            let mut channels = Vec::with_capacity(request.channels.len());
            for channel in request.channels.iter().filter(|c| reachable(*c)) {
                if !channels.contains(channel) {
                    channels.push(*channel);
                }
            }
            channels
        } else if request.multi_channel {
            DEFAULT_PRIORITY.iter().copied().filter(reachable).collect()
        } else {
            match driver.preferred_channel {
                Some(preferred) if reachable(&preferred) => vec![preferred],
                Some(preferred) if driver.fallback_enabled => DEFAULT_PRIORITY
                    .iter()
                    .copied()
                    .filter(|c| *c != preferred)
                    .find(reachable)
                    .into_iter()
                    .collect(),
                Some(_) => Vec::new(),
                None => DEFAULT_PRIORITY
                    .iter()
                    .copied()
                    .find(reachable)
                    .into_iter()
                    .collect(),
            }
        };

        if selected.is_empty() {
            return Err(DispatchError::NoChannelAvailable {
                driver_id: driver.id.clone(),
            });
        }
        Ok(selected)
    }
}
