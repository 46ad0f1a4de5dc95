//! services/dispatch_service.rs
//! Orquestador: carga entidades, elige canales, renderiza una vez y envía en paralelo.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::{
    sync::Semaphore,
    time::{timeout, timeout_at, Instant},
};

use crate::config::dispatch_config::OrchestratorSettings;
use crate::errors::{DispatchError, EntityKind, ValidationError};
use crate::models::channel_model::Channel;
use crate::models::dispatch_model::{
    BatchDispatchResult, BatchItemResult, ChannelDispatchStatus, ChannelDispatchUpdate,
    DispatchList, DispatchListFilters, DispatchRequest, DispatchResult,
    DispatchRecord, DispatchStats, DispatchStatus, DispatchWithChannels, NewDispatch,
};
use crate::models::entity_model::{Booking, Driver, Route, Vehicle};
use crate::services::channel_router::ChannelRouter;
use crate::services::channels::{ChannelRegistry, SendContext, SendOutcome};
use crate::services::dispatch_repository::DispatchRepository;
use crate::services::entity_repository::EntityRepository;
use crate::services::template_service::TemplateEngine;

pub const MAX_BATCH_SIZE: usize = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

struct Prepared {
    route: Route,
    driver: Driver,
    vehicle: Option<Vehicle>,
    bookings: Vec<Booking>,
    channels: Vec<Channel>,
    dispatch: DispatchRecord,
}

#[derive(Clone)]
pub struct DispatchOrchestrator {
    entities: Arc<dyn EntityRepository>,
    dispatches: Arc<dyn DispatchRepository>,
    registry: Arc<ChannelRegistry>,
    router: ChannelRouter,
    templates: TemplateEngine,
    settings: OrchestratorSettings,
}

impl DispatchOrchestrator {
    pub fn new(
        entities: Arc<dyn EntityRepository>,
        dispatches: Arc<dyn DispatchRepository>,
        registry: Arc<ChannelRegistry>,
        templates: TemplateEngine,
        settings: OrchestratorSettings,
    ) -> Self {
        DispatchOrchestrator {
            router: ChannelRouter::new(registry.clone()),
            entities,
            dispatches,
            registry,
            templates,
            settings,
        }
    }

    /// Runs one dispatch to completion.
    ///
    /// Not-found and no-channel errors return before anything is written. Once the
    /// dispatch row exists, channel failures are recorded per channel and never
    /// surface as errors. `dispatch_timeout` bounds the whole call: if it runs out
    /// before the row is written the call fails with `TimedOut`, afterwards with
    /// `Cancelled`, leaving the row in `sending`.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResult, DispatchError> {
        log::info!(
            "Dispatch requested: route={} driver={}",
            request.route_id,
            request.driver_id
        );
        let deadline = Instant::now() + self.settings.dispatch_timeout;

        let Prepared {
            route,
            driver,
            vehicle,
            bookings,
            channels,
            dispatch,
        } = match timeout_at(deadline, self.prepare(request)).await {
            Ok(prepared) => prepared?,
            Err(_) => {
                log::warn!(
                    "Dispatch timed out after {:?} before it was recorded",
                    self.settings.dispatch_timeout
                );
                return Err(DispatchError::TimedOut {
                    timeout_secs: self.settings.dispatch_timeout.as_secs(),
                });
            }
        };

        let context = self.templates.build_context(
            &dispatch,
            &driver,
            &route,
            vehicle.as_ref(),
            &bookings,
        );
        let message = self.templates.render(&context);

        if let Err(e) = self
            .dispatches
            .update_dispatch_status(&dispatch.id, DispatchStatus::Sending)
            .await
        {
            log::error!("Dispatch {}: could not mark as sending: {}", dispatch.id, e);
        }

        let send_context = SendContext {
            dispatch: &dispatch,
            driver: &driver,
            route: &route,
            message: &message,
        };
        let fan_out = join_all(
            channels
                .iter()
                .map(|channel| self.send_to_channel(send_context, *channel)),
        );

        let statuses = match timeout_at(deadline, fan_out).await {
            Ok(statuses) => statuses,
            Err(_) => {
                log::warn!(
                    "Dispatch {} cancelled after {:?}; left in sending",
                    dispatch.id,
                    self.settings.dispatch_timeout
                );
                return Err(DispatchError::Cancelled {
                    dispatch_id: dispatch.id,
                    timeout_secs: self.settings.dispatch_timeout.as_secs(),
                });
            }
        };

        let status = DispatchStatus::aggregate(statuses);
        if let Err(e) = self
            .dispatches
            .update_dispatch_status(&dispatch.id, status)
            .await
        {
            log::error!(
                "Dispatch {}: final status {} not persisted: {}",
                dispatch.id,
                status,
                e
            );
        }

        log::info!("Dispatch {} finished: {}", dispatch.id, status);
        Ok(DispatchResult {
            dispatch_id: dispatch.id,
            status,
            requested_channels: channels,
        })
    }

    /// Steps up to and including the `pending` dispatch row.
    async fn prepare(&self, request: DispatchRequest) -> Result<Prepared, DispatchError> {
        let (route, driver) = tokio::try_join!(
            self.entities.get_route(&request.route_id),
            self.entities.get_driver(&request.driver_id),
        )?;
        let Some(route) = route else {
            log::warn!("Route not found: {}", request.route_id);
            return Err(DispatchError::entity_not_found(EntityKind::Route, &request.route_id));
        };
        let Some(driver) = driver else {
            log::warn!("Driver not found: {}", request.driver_id);
            return Err(DispatchError::entity_not_found(EntityKind::Driver, &request.driver_id));
        };

        let (vehicle, bookings) = tokio::join!(
            self.fetch_vehicle(&route),
            self.entities.get_bookings_for_route(&route.id),
        );
        let bookings = bookings?;

        let channels = self.router.select(&driver, &request).map_err(|e| {
            log::warn!("{}", e);
            e
        })?;

        let dispatch = self
            .dispatches
            .create_dispatch(NewDispatch {
                route_id: route.id.clone(),
                driver_id: driver.id.clone(),
                requested_channels: channels.clone(),
                metadata: request.metadata,
            })
            .await?;
        log::info!(
            "Dispatch {} created with channels {:?}",
            dispatch.id,
            channels
        );

        Ok(Prepared {
            route,
            driver,
            vehicle,
            bookings,
            channels,
            dispatch,
        })
    }

    /// A missing or unreadable vehicle only means "not assigned" in the message.
    async fn fetch_vehicle(&self, route: &Route) -> Option<Vehicle> {
        let vehicle_id = route.vehicle_id.as_deref().filter(|v| !v.is_empty())?;
        match self.entities.get_vehicle(vehicle_id).await {
            Ok(vehicle) => vehicle,
            Err(e) => {
                log::warn!("Route {}: vehicle {} unavailable: {}", route.id, vehicle_id, e);
                None
            }
        }
    }

    /// One channel attempt: row, sending, send, outcome. Returns the settled status
    /// even when the outcome could not be persisted.
    async fn send_to_channel(
        &self,
        context: SendContext<'_>,
        channel: Channel,
    ) -> ChannelDispatchStatus {
        let dispatch_id = &context.dispatch.id;

        let record = match self
            .dispatches
            .create_channel_dispatch(dispatch_id, channel)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                log::error!(
                    "Dispatch {}: {} not attempted, channel row not created: {}",
                    dispatch_id,
                    channel,
                    e
                );
                return ChannelDispatchStatus::Failed;
            }
        };

        if let Err(e) = self
            .dispatches
            .update_channel_dispatch(&record.id, ChannelDispatchUpdate::sending())
            .await
        {
            log::error!(
                "Dispatch {}: could not mark {} as sending: {}",
                dispatch_id,
                channel,
                e
            );
        }

        let outcome = self.attempt(&context, channel).await;
        let update = settle(&outcome);
        let status = update.status;

        if status == ChannelDispatchStatus::Delivered {
            log::info!("Dispatch {}: {} delivered", dispatch_id, channel);
        } else {
            log::warn!(
                "Dispatch {}: {} failed: {}",
                dispatch_id,
                channel,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }

        if let Err(e) = self
            .dispatches
            .update_channel_dispatch(&record.id, update)
            .await
        {
            log::error!(
                "Dispatch {}: {} outcome not persisted ({}): {:?}",
                dispatch_id,
                channel,
                e,
                outcome
            );
        }

        status
    }

    async fn attempt(&self, context: &SendContext<'_>, channel: Channel) -> SendOutcome {
        let started = Utc::now();
        let Some(adapter) = self.registry.get(channel) else {
            return SendOutcome::failed(
                format!("No adapter registered for channel {channel}"),
                started,
            );
        };

        match timeout(self.settings.channel_send_timeout, adapter.send(context)).await {
            Ok(outcome) => outcome,
            Err(_) => SendOutcome::failed(
                format!(
                    "Channel {} timed out after {:?}",
                    channel, self.settings.channel_send_timeout
                ),
                started,
            ),
        }
    }

    pub async fn dispatch_batch(
        &self,
        requests: Vec<DispatchRequest>,
    ) -> Result<BatchDispatchResult, DispatchError> {
        self.dispatch_batch_parsed(requests.into_iter().map(Ok).collect())
            .await
    }

    /// Items that failed validation are reported at their index without being run.
    /// Results keep input order regardless of completion order.
    pub async fn dispatch_batch_parsed(
        &self,
        items: Vec<Result<DispatchRequest, ValidationError>>,
    ) -> Result<BatchDispatchResult, DispatchError> {
        if items.is_empty() || items.len() > MAX_BATCH_SIZE {
            return Err(DispatchError::InvalidBatchSize {
                got: items.len(),
                max: MAX_BATCH_SIZE,
            });
        }

        log::info!("Batch dispatch of {} items", items.len());
        let semaphore = Semaphore::new(self.settings.batch_concurrency.max(1));
        let semaphore = &semaphore;

        let tasks = items.into_iter().enumerate().map(|(index, item)| async move {
            let request = match item {
                Ok(request) => request,
                Err(e) => return BatchItemResult::failed(index, DispatchError::from(e).to_string()),
            };
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => return BatchItemResult::failed(index, "Batch worker pool closed".into()),
            };
            match self.dispatch(request).await {
                Ok(result) => BatchItemResult::succeeded(index, result.dispatch_id),
                Err(e) => BatchItemResult::failed(index, e.to_string()),
            }
        });

        let batch = BatchDispatchResult::from_results(join_all(tasks).await);
        log::info!(
            "Batch finished: {} ok, {} failed",
            batch.summary.successful,
            batch.summary.failed
        );
        Ok(batch)
    }

    pub async fn get_dispatch(&self, id: &str) -> Result<DispatchWithChannels, DispatchError> {
        self.dispatches
            .get_dispatch_with_channels(id)
            .await?
            .ok_or_else(|| DispatchError::DispatchNotFound(id.to_string()))
    }

    pub async fn list_dispatches(
        &self,
        filters: DispatchListFilters,
    ) -> Result<DispatchList, DispatchError> {
        let limit = filters.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(ValidationError::new(
                "limit",
                format!("limit must be between 1 and {MAX_PAGE_SIZE}"),
            )
            .into());
        }
        let offset = filters.offset.unwrap_or(0);

        let (dispatches, total) = self
            .dispatches
            .list_dispatches(&filters, limit, offset)
            .await?;
        Ok(DispatchList {
            dispatches,
            total,
            limit,
            offset,
        })
    }

    pub async fn dispatch_stats(&self) -> Result<DispatchStats, DispatchError> {
        Ok(self.dispatches.get_dispatch_stats().await?)
    }
}

fn settle(outcome: &SendOutcome) -> ChannelDispatchUpdate {
    if outcome.success {
        ChannelDispatchUpdate {
            status: ChannelDispatchStatus::Delivered,
            provider_message_id: outcome.provider_message_id.clone(),
            error_message: None,
            sent_at: Some(outcome.sent_at),
            delivered_at: Some(Utc::now()),
        }
    } else {
        ChannelDispatchUpdate {
            sent_at: Some(outcome.sent_at),
            ..ChannelDispatchUpdate::failed(
                outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string()),
            )
        }
    }
}
