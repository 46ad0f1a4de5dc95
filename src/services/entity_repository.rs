//! services/entity_repository.rs
//! Lectura de rutas, conductores, vehículos y reservas. El motor nunca las modifica.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

use crate::errors::{RepositoryError, RepositoryErrorCode};
use crate::models::channel_model::Channel;
use crate::models::entity_model::{Booking, Driver, Route, Vehicle};

/// Not-found is `Ok(None)`; `Err` is reserved for storage faults.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    async fn get_route(&self, id: &str) -> Result<Option<Route>, RepositoryError>;

    async fn get_driver(&self, id: &str) -> Result<Option<Driver>, RepositoryError>;

    async fn get_vehicle(&self, id: &str) -> Result<Option<Vehicle>, RepositoryError>;

    /// Ordered by stop number.
    async fn get_bookings_for_route(&self, route_id: &str)
        -> Result<Vec<Booking>, RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct DriverRow {
    id: String,
    first_name: String,
    last_name: String,
    email: Option<String>,
    telegram_chat_id: Option<String>,
    preferred_channel: Option<String>,
    fallback_enabled: bool,
}

impl From<DriverRow> for Driver {
    fn from(row: DriverRow) -> Self {
        let preferred_channel = row.preferred_channel.as_deref().and_then(|raw| {
            raw.parse::<Channel>()
                .map_err(|e| log::warn!("Driver {}: {}", row.id, e))
                .ok()
        });

        Driver {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            telegram_chat_id: row.telegram_chat_id,
            preferred_channel,
            fallback_enabled: row.fallback_enabled,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: String,
    route_id: String,
    stop_number: i64,
    client_name: String,
    address: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    scheduled_time: Option<String>,
    services: Option<String>,
    special_instructions: Option<String>,
}

impl From<BookingRow> for Booking {
    fn from(row: BookingRow) -> Self {
        let maps_url = match (row.latitude, row.longitude) {
            (Some(lat), Some(lng)) => Some(format!(
                "https://www.google.com/maps/dir/?api=1&destination={lat},{lng}"
            )),
            _ => None,
        };

        Booking {
            id: row.id,
            route_id: row.route_id,
            stop_number: row.stop_number,
            client_name: row.client_name,
            address: row.address,
            scheduled_time: row.scheduled_time,
            services: row.services,
            special_instructions: row.special_instructions,
            maps_url,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SqliteEntityRepository {
    db_pool: SqlitePool,
}

impl SqliteEntityRepository {
    pub fn new(db_pool: SqlitePool) -> Self {
        SqliteEntityRepository { db_pool }
    }
}

fn query_failed(context: &str, err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(RepositoryErrorCode::EntityQueryFailed, context, err)
}

#[async_trait]
impl EntityRepository for SqliteEntityRepository {
    async fn get_route(&self, id: &str) -> Result<Option<Route>, RepositoryError> {
        sqlx::query_as::<_, Route>(
            r#"
            SELECT id, name, code, date, planned_start_time, planned_end_time,
                   total_stops, total_distance_km, total_duration_minutes,
                   vehicle_id, driver_id
            FROM routes
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| query_failed("Failed to fetch route", e))
    }

    async fn get_driver(&self, id: &str) -> Result<Option<Driver>, RepositoryError> {
        let row = sqlx::query_as::<_, DriverRow>(
            r#"
            SELECT id, first_name, last_name, email, telegram_chat_id,
                   preferred_channel, fallback_enabled
            FROM drivers
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| query_failed("Failed to fetch driver", e))?;

        Ok(row.map(Driver::from))
    }

    async fn get_vehicle(&self, id: &str) -> Result<Option<Vehicle>, RepositoryError> {
        sqlx::query_as::<_, Vehicle>(
            "SELECT id, name, license_plate, make, model FROM vehicles WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| query_failed("Failed to fetch vehicle", e))
    }

    async fn get_bookings_for_route(
        &self,
        route_id: &str,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let rows = sqlx::query_as::<_, BookingRow>(
            r#"
            SELECT id, route_id, stop_number, client_name, address,
                   latitude, longitude, scheduled_time, services, special_instructions
            FROM bookings
            WHERE route_id = ?1
            ORDER BY stop_number ASC, rowid ASC
            "#,
        )
        .bind(route_id)
        .fetch_all(&self.db_pool)
        .await
        .map_err(|e| query_failed("Failed to fetch bookings", e))?;

        Ok(rows.into_iter().map(Booking::from).collect())
    }
}
