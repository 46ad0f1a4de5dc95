//! tests/support.rs
//! Dobles de prueba compartidos: repositorios en memoria, adaptadores guionizados y fixtures.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::config::dispatch_config::OrchestratorSettings;
use crate::errors::{RepositoryError, RepositoryErrorCode};
use crate::models::channel_model::Channel;
use crate::models::dispatch_model::{
    ChannelDispatchRecord, ChannelDispatchStatus, ChannelDispatchUpdate, DispatchListFilters,
    DispatchRecord, DispatchStats, DispatchStatus, DispatchWithChannels, NewDispatch,
};
use crate::models::entity_model::{Booking, Driver, Route, Vehicle};
use crate::services::channels::{
    ChannelAdapter, ChannelRegistry, HealthStatus, SendContext, SendOutcome,
};
use crate::services::dispatch_repository::DispatchRepository;
use crate::services::dispatch_service::DispatchOrchestrator;
use crate::services::entity_repository::EntityRepository;
use crate::services::template_service::TemplateEngine;

pub const ROUTE_ID: &str = "6f1a2b3c-4d5e-4f60-8a7b-9c0d1e2f3a4b";
pub const VEHICLE_ID: &str = "0b6c1d2e-3f40-4a5b-8c6d-7e8f9a0b1c2d";
pub const DRIVER_BOTH: &str = "11111111-1111-4111-8111-111111111111";
pub const DRIVER_EMAIL_ONLY: &str = "22222222-2222-4222-8222-222222222222";
pub const DRIVER_UNREACHABLE: &str = "33333333-3333-4333-8333-333333333333";
pub const UNKNOWN_ID: &str = "99999999-9999-4999-8999-999999999999";

pub fn driver(
    id: &str,
    email: Option<&str>,
    telegram_chat_id: Option<&str>,
    preferred_channel: Option<Channel>,
    fallback_enabled: bool,
) -> Driver {
    Driver {
        id: id.to_string(),
        first_name: "Ana".to_string(),
        last_name: "Lopez".to_string(),
        email: email.map(str::to_string),
        telegram_chat_id: telegram_chat_id.map(str::to_string),
        preferred_channel,
        fallback_enabled,
    }
}

pub fn route(id: &str, vehicle_id: Option<&str>) -> Route {
    Route {
        id: id.to_string(),
        name: "Downtown Loop".to_string(),
        code: Some("DT-01".to_string()),
        date: "2025-03-14".to_string(),
        planned_start_time: Some("08:00".to_string()),
        planned_end_time: Some("16:30".to_string()),
        total_stops: 2,
        total_distance_km: Some(12.34),
        total_duration_minutes: Some(95),
        vehicle_id: vehicle_id.map(str::to_string),
        driver_id: None,
    }
}

pub fn vehicle(id: &str) -> Vehicle {
    Vehicle {
        id: id.to_string(),
        name: "Van 3".to_string(),
        license_plate: Some("ABC-123".to_string()),
        make: Some("Ford".to_string()),
        model: Some("Transit".to_string()),
    }
}

pub fn booking(route_id: &str, stop_number: i64, client_name: &str) -> Booking {
    Booking {
        id: Uuid::new_v4().to_string(),
        route_id: route_id.to_string(),
        stop_number,
        client_name: client_name.to_string(),
        address: format!("{stop_number} Main St"),
        scheduled_time: None,
        services: None,
        special_instructions: None,
        maps_url: None,
    }
}

/// Entity store with one route, its vehicle, two bookings and three drivers.
pub fn standard_entities() -> FakeEntities {
    FakeEntities::default()
        .with_route(route(ROUTE_ID, Some(VEHICLE_ID)))
        .with_vehicle(vehicle(VEHICLE_ID))
        .with_booking(booking(ROUTE_ID, 2, "Blue Spa"))
        .with_booking(booking(ROUTE_ID, 1, "Acme Pools"))
        .with_driver(driver(
            DRIVER_BOTH,
            Some("ana@example.com"),
            Some("5550001"),
            Some(Channel::Telegram),
            true,
        ))
        .with_driver(driver(
            DRIVER_EMAIL_ONLY,
            Some("eva@example.com"),
            None,
            Some(Channel::Email),
            false,
        ))
        .with_driver(driver(DRIVER_UNREACHABLE, None, None, Some(Channel::Telegram), true))
}

#[derive(Default)]
pub struct FakeEntities {
    routes: HashMap<String, Route>,
    drivers: HashMap<String, Driver>,
    vehicles: HashMap<String, Vehicle>,
    bookings: Vec<Booking>,
    fetches: AtomicUsize,
    pub fail_vehicle: AtomicBool,
    /// Route lookups never return while set.
    pub stall_routes: AtomicBool,
}

impl FakeEntities {
    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.insert(route.id.clone(), route);
        self
    }

    pub fn with_driver(mut self, driver: Driver) -> Self {
        self.drivers.insert(driver.id.clone(), driver);
        self
    }

    pub fn with_vehicle(mut self, vehicle: Vehicle) -> Self {
        self.vehicles.insert(vehicle.id.clone(), vehicle);
        self
    }

    pub fn with_booking(mut self, booking: Booking) -> Self {
        self.bookings.push(booking);
        self
    }

    /// Every repository call, whatever the entity.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntityRepository for FakeEntities {
    async fn get_route(&self, id: &str) -> Result<Option<Route>, RepositoryError> {
        self.record_fetch();
        if self.stall_routes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.routes.get(id).cloned())
    }

    async fn get_driver(&self, id: &str) -> Result<Option<Driver>, RepositoryError> {
        self.record_fetch();
        Ok(self.drivers.get(id).cloned())
    }

    async fn get_vehicle(&self, id: &str) -> Result<Option<Vehicle>, RepositoryError> {
        self.record_fetch();
        if self.fail_vehicle.load(Ordering::SeqCst) {
            return Err(RepositoryError::new(
                RepositoryErrorCode::EntityQueryFailed,
                "vehicle table unavailable",
            ));
        }
        Ok(self.vehicles.get(id).cloned())
    }

    async fn get_bookings_for_route(
        &self,
        route_id: &str,
    ) -> Result<Vec<Booking>, RepositoryError> {
        self.record_fetch();
        Ok(self
            .bookings
            .iter()
            .filter(|b| b.route_id == route_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct MemoryState {
    dispatches: Vec<DispatchRecord>,
    channels: Vec<ChannelDispatchRecord>,
}

/// In-memory dispatch store with the same transition rules as the SQLite one,
/// plus switches to inject storage failures.
#[derive(Default)]
pub struct MemoryDispatchRepository {
    state: Mutex<MemoryState>,
    pub fail_create_dispatch: AtomicBool,
    pub fail_ping: AtomicBool,
    /// Fails every channel update that would settle a row.
    pub fail_channel_outcomes: AtomicBool,
    fail_channel_create: Mutex<HashSet<Channel>>,
}

impl MemoryDispatchRepository {
    pub fn fail_channel_create_for(&self, channel: Channel) {
        self.lock_failures().insert(channel);
    }

    pub fn dispatch_count(&self) -> usize {
        self.lock().dispatches.len()
    }

    pub fn channel_count(&self) -> usize {
        self.lock().channels.len()
    }

    pub fn dispatch(&self, id: &str) -> Option<DispatchRecord> {
        self.lock().dispatches.iter().find(|d| d.id == id).cloned()
    }

    pub fn channels_for(&self, dispatch_id: &str) -> Vec<ChannelDispatchRecord> {
        self.lock()
            .channels
            .iter()
            .filter(|c| c.dispatch_id == dispatch_id)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, HashSet<Channel>> {
        self.fail_channel_create.lock().unwrap()
    }
}

#[async_trait]
impl DispatchRepository for MemoryDispatchRepository {
    async fn create_dispatch(&self, new: NewDispatch) -> Result<DispatchRecord, RepositoryError> {
        if self.fail_create_dispatch.load(Ordering::SeqCst) {
            return Err(RepositoryError::new(
                RepositoryErrorCode::DispatchCreateFailed,
                "disk full",
            ));
        }
        let now = Utc::now();
        let record = DispatchRecord {
            id: Uuid::new_v4().to_string(),
            route_id: new.route_id,
            driver_id: new.driver_id,
            status: DispatchStatus::Pending,
            requested_channels: new.requested_channels,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        };
        self.lock().dispatches.push(record.clone());
        Ok(record)
    }

    async fn update_dispatch_status(
        &self,
        id: &str,
        status: DispatchStatus,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        match state.dispatches.iter_mut().find(|d| d.id == id) {
            Some(d) if d.status.can_transition_to(status) => {
                d.status = status;
                d.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(RepositoryError::new(
                RepositoryErrorCode::DispatchUpdateFailed,
                format!("Dispatch {id} not found or cannot move to {status}"),
            )),
        }
    }

    async fn create_channel_dispatch(
        &self,
        dispatch_id: &str,
        channel: Channel,
    ) -> Result<ChannelDispatchRecord, RepositoryError> {
        if self.lock_failures().contains(&channel) {
            return Err(RepositoryError::new(
                RepositoryErrorCode::ChannelDispatchCreateFailed,
                "insert rejected",
            ));
        }
        let now = Utc::now();
        let record = ChannelDispatchRecord {
            id: Uuid::new_v4().to_string(),
            dispatch_id: dispatch_id.to_string(),
            channel,
            status: ChannelDispatchStatus::Pending,
            provider_message_id: None,
            error_message: None,
            sent_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        };
        self.lock().channels.push(record.clone());
        Ok(record)
    }

    async fn update_channel_dispatch(
        &self,
        id: &str,
        update: ChannelDispatchUpdate,
    ) -> Result<(), RepositoryError> {
        if update.status.is_terminal() && self.fail_channel_outcomes.load(Ordering::SeqCst) {
            return Err(RepositoryError::new(
                RepositoryErrorCode::ChannelDispatchUpdateFailed,
                "connection reset",
            ));
        }
        let mut state = self.lock();
        match state.channels.iter_mut().find(|c| c.id == id) {
            Some(c) if c.status.can_transition_to(update.status) => {
                c.status = update.status;
                c.provider_message_id = update.provider_message_id.or(c.provider_message_id.take());
                c.error_message = update.error_message.or(c.error_message.take());
                c.sent_at = update.sent_at.or(c.sent_at);
                c.delivered_at = update.delivered_at.or(c.delivered_at);
                c.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(RepositoryError::new(
                RepositoryErrorCode::ChannelDispatchUpdateFailed,
                format!("Channel dispatch {id} not found or cannot move to {}", update.status),
            )),
        }
    }

    async fn get_dispatch_with_channels(
        &self,
        id: &str,
    ) -> Result<Option<DispatchWithChannels>, RepositoryError> {
        let Some(dispatch) = self.dispatch(id) else {
            return Ok(None);
        };
        Ok(Some(DispatchWithChannels {
            channel_dispatches: self.channels_for(id),
            dispatch,
        }))
    }

    async fn list_dispatches(
        &self,
        filters: &DispatchListFilters,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<DispatchRecord>, u64), RepositoryError> {
        let state = self.lock();
        let matching: Vec<DispatchRecord> = state
            .dispatches
            .iter()
            .rev()
            .filter(|d| filters.status.map_or(true, |s| d.status == s))
            .filter(|d| filters.driver_id.as_ref().map_or(true, |v| &d.driver_id == v))
            .filter(|d| filters.route_id.as_ref().map_or(true, |v| &d.route_id == v))
            .cloned()
            .collect();
        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn get_dispatch_stats(&self) -> Result<DispatchStats, RepositoryError> {
        let mut stats = DispatchStats::default();
        for d in &self.lock().dispatches {
            stats.record(d.status, 1);
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(RepositoryError::new(
                RepositoryErrorCode::DispatchQueryFailed,
                "database is locked",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Script {
    Deliver(Option<String>),
    Fail(String),
    Hang,
    /// Delivers after the given delay.
    Slow(Duration),
}

/// Adapter with a fixed answer. Reachability follows the real adapters
/// (chat id for telegram, email for email) unless overridden.
pub struct ScriptedChannel {
    channel: Channel,
    script: Script,
    reachable: Option<bool>,
    health: HealthStatus,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    messages: Mutex<Vec<String>>,
}

impl ScriptedChannel {
    pub fn new(channel: Channel, script: Script) -> Self {
        ScriptedChannel {
            channel,
            script,
            reachable: None,
            health: HealthStatus::healthy("ok"),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn delivering(channel: Channel) -> Arc<Self> {
        Arc::new(Self::new(
            channel,
            Script::Deliver(Some(format!("{channel}-msg-1"))),
        ))
    }

    pub fn failing(channel: Channel, error: &str) -> Arc<Self> {
        Arc::new(Self::new(channel, Script::Fail(error.to_string())))
    }

    pub fn hanging(channel: Channel) -> Arc<Self> {
        Arc::new(Self::new(channel, Script::Hang))
    }

    pub fn slow(channel: Channel, delay: Duration) -> Arc<Self> {
        Arc::new(Self::new(channel, Script::Slow(delay)))
    }

    pub fn always_reachable(mut self, reachable: bool) -> Self {
        self.reachable = Some(reachable);
        self
    }

    pub fn with_health(mut self, health: HealthStatus) -> Self {
        self.health = health;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most sends observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelAdapter for ScriptedChannel {
    fn channel_type(&self) -> Channel {
        self.channel
    }

    fn can_send(&self, driver: &Driver) -> bool {
        if let Some(reachable) = self.reachable {
            return reachable;
        }
        let field = match self.channel {
            Channel::Telegram => &driver.telegram_chat_id,
            Channel::Email => &driver.email,
            Channel::Sms | Channel::Push => return false,
        };
        field.as_deref().map_or(false, |v| !v.trim().is_empty())
    }

    async fn send(&self, context: &SendContext<'_>) -> SendOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.messages
            .lock()
            .unwrap()
            .push(context.message.to_string());
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        let outcome = match &self.script {
            Script::Deliver(id) => SendOutcome::delivered(id.clone(), Utc::now()),
            Script::Fail(error) => SendOutcome::failed(error.clone(), Utc::now()),
            Script::Hang => {
                std::future::pending::<()>().await;
                SendOutcome::failed("unreachable", Utc::now())
            }
            Script::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                SendOutcome::delivered(None, Utc::now())
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn health_check(&self) -> HealthStatus {
        self.health.clone()
    }
}

pub fn registry_of(adapters: &[Arc<ScriptedChannel>]) -> Arc<ChannelRegistry> {
    Arc::new(ChannelRegistry::new(
        adapters
            .iter()
            .map(|a| a.clone() as Arc<dyn ChannelAdapter>)
            .collect(),
    ))
}

pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        channel_send_timeout: Duration::from_millis(200),
        dispatch_timeout: Duration::from_secs(5),
        batch_concurrency: 4,
    }
}

pub fn orchestrator(
    entities: Arc<FakeEntities>,
    repository: Arc<MemoryDispatchRepository>,
    adapters: &[Arc<ScriptedChannel>],
    settings: OrchestratorSettings,
) -> DispatchOrchestrator {
    DispatchOrchestrator::new(
        entities,
        repository,
        registry_of(adapters),
        TemplateEngine::new("https://app.example.com"),
        settings,
    )
}
