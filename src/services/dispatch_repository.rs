//! services/dispatch_repository.rs
//! Persistencia de `dispatches` y `channel_dispatches`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{Sqlite, SqlitePool};
use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::errors::{RepositoryError, RepositoryErrorCode};
use crate::models::channel_model::Channel;
use crate::models::dispatch_model::{
    ChannelDispatchRecord, ChannelDispatchStatus, ChannelDispatchUpdate, DispatchListFilters,
    DispatchRecord, DispatchStats, DispatchStatus, DispatchWithChannels, NewDispatch,
};

/// Status updates only move forward; a write that would regress a row fails.
#[async_trait]
pub trait DispatchRepository: Send + Sync {
    async fn create_dispatch(&self, new: NewDispatch) -> Result<DispatchRecord, RepositoryError>;

    async fn update_dispatch_status(
        &self,
        id: &str,
        status: DispatchStatus,
    ) -> Result<(), RepositoryError>;

    async fn create_channel_dispatch(
        &self,
        dispatch_id: &str,
        channel: Channel,
    ) -> Result<ChannelDispatchRecord, RepositoryError>;

    async fn update_channel_dispatch(
        &self,
        id: &str,
        update: ChannelDispatchUpdate,
    ) -> Result<(), RepositoryError>;

    /// Channel rows come back in creation order.
    async fn get_dispatch_with_channels(
        &self,
        id: &str,
    ) -> Result<Option<DispatchWithChannels>, RepositoryError>;

    /// Newest first. Returns the page and the total matching the filters.
    async fn list_dispatches(
        &self,
        filters: &DispatchListFilters,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<DispatchRecord>, u64), RepositoryError>;

    async fn get_dispatch_stats(&self) -> Result<DispatchStats, RepositoryError>;

    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            RepositoryError::storage(
                RepositoryErrorCode::DispatchQueryFailed,
                &format!("Invalid {field} timestamp {raw:?}"),
                e,
            )
        })
}

fn parse_optional_timestamp(
    field: &str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|r| parse_timestamp(field, &r)).transpose()
}

fn corrupt(message: String) -> RepositoryError {
    RepositoryError::new(RepositoryErrorCode::DispatchQueryFailed, message)
}

#[derive(sqlx::FromRow)]
struct DispatchRow {
    id: String,
    route_id: String,
    driver_id: String,
    status: String,
    requested_channels: String,
    metadata: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<DispatchRow> for DispatchRecord {
    type Error = RepositoryError;

    fn try_from(row: DispatchRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<DispatchStatus>().map_err(corrupt)?;
        let requested_channels: Vec<Channel> = serde_json::from_str(&row.requested_channels)
            .map_err(|e| corrupt(format!("Invalid requested_channels for {}: {e}", row.id)))?;
        let metadata = match row.metadata {
            Some(raw) => serde_json::from_str::<Option<Map<String, Value>>>(&raw)
                .map_err(|e| corrupt(format!("Invalid metadata for {}: {e}", row.id)))?,
            None => None,
        };

        Ok(DispatchRecord {
            created_at: parse_timestamp("created_at", &row.created_at)?,
            updated_at: parse_timestamp("updated_at", &row.updated_at)?,
            id: row.id,
            route_id: row.route_id,
            driver_id: row.driver_id,
            status,
            requested_channels,
            metadata,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChannelDispatchRow {
    id: String,
    dispatch_id: String,
    channel: String,
    status: String,
    provider_message_id: Option<String>,
    error_message: Option<String>,
    sent_at: Option<String>,
    delivered_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ChannelDispatchRow> for ChannelDispatchRecord {
    type Error = RepositoryError;

    fn try_from(row: ChannelDispatchRow) -> Result<Self, Self::Error> {
        Ok(ChannelDispatchRecord {
            channel: row.channel.parse::<Channel>().map_err(corrupt)?,
            status: row.status.parse::<ChannelDispatchStatus>().map_err(corrupt)?,
            sent_at: parse_optional_timestamp("sent_at", row.sent_at)?,
            delivered_at: parse_optional_timestamp("delivered_at", row.delivered_at)?,
            created_at: parse_timestamp("created_at", &row.created_at)?,
            updated_at: parse_timestamp("updated_at", &row.updated_at)?,
            id: row.id,
            dispatch_id: row.dispatch_id,
            provider_message_id: row.provider_message_id,
            error_message: row.error_message,
        })
    }
}

const DISPATCH_COLUMNS: &str =
    "id, route_id, driver_id, status, requested_channels, metadata, created_at, updated_at";

const CHANNEL_DISPATCH_COLUMNS: &str = "id, dispatch_id, channel, status, provider_message_id, \
     error_message, sent_at, delivered_at, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct SqliteDispatchRepository {
    db_pool: SqlitePool,
}

impl SqliteDispatchRepository {
    pub fn new(db_pool: SqlitePool) -> Self {
        SqliteDispatchRepository { db_pool }
    }
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, Sqlite>, filters: &'a DispatchListFilters) {
    qb.push(" WHERE 1 = 1");
    if let Some(status) = filters.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(driver_id) = &filters.driver_id {
        qb.push(" AND driver_id = ").push_bind(driver_id.as_str());
    }
    if let Some(route_id) = &filters.route_id {
        qb.push(" AND route_id = ").push_bind(route_id.as_str());
    }
}

#[async_trait]
impl DispatchRepository for SqliteDispatchRepository {
    async fn create_dispatch(&self, new: NewDispatch) -> Result<DispatchRecord, RepositoryError> {
        let create_failed = |context: &str, e: &dyn std::fmt::Display| {
            RepositoryError::storage(RepositoryErrorCode::DispatchCreateFailed, context, e)
        };

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let channels_json = serde_json::to_string(&new.requested_channels)
            .map_err(|e| create_failed("Failed to encode requested_channels", &e))?;
        let metadata_json = new
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| create_failed("Failed to encode metadata", &e))?;

        sqlx::query(
            r#"
            INSERT INTO dispatches (
                id, route_id, driver_id, status, requested_channels,
                metadata, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?6)
            "#,
        )
        .bind(&id)
        .bind(&new.route_id)
        .bind(&new.driver_id)
        .bind(&channels_json)
        .bind(&metadata_json)
        .bind(format_timestamp(&now))
        .execute(&self.db_pool)
        .await
        .map_err(|e| create_failed("Failed to insert dispatch", &e))?;

        Ok(DispatchRecord {
            id,
            route_id: new.route_id,
            driver_id: new.driver_id,
            status: DispatchStatus::Pending,
            requested_channels: new.requested_channels,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        })
    }

    async fn update_dispatch_status(
        &self,
        id: &str,
        status: DispatchStatus,
    ) -> Result<(), RepositoryError> {
        let predecessors: Vec<&'static str> = DispatchStatus::ALL
            .iter()
            .filter(|prev| prev.can_transition_to(status))
            .map(|prev| prev.as_str())
            .collect();
        if predecessors.is_empty() {
            return Err(RepositoryError::new(
                RepositoryErrorCode::DispatchUpdateFailed,
                format!("Dispatch {id} cannot move to {status}"),
            ));
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE dispatches SET status = ");
        qb.push_bind(status.as_str())
            .push(", updated_at = ")
            .push_bind(format_timestamp(&Utc::now()))
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND status IN (");
        let mut allowed = qb.separated(", ");
        for prev in predecessors {
            allowed.push_bind(prev);
        }
        allowed.push_unseparated(")");

        let result = qb.build().execute(&self.db_pool).await.map_err(|e| {
            RepositoryError::storage(
                RepositoryErrorCode::DispatchUpdateFailed,
                "Failed to update dispatch status",
                e,
            )
        })?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::new(
                RepositoryErrorCode::DispatchUpdateFailed,
                format!("Dispatch {id} not found or cannot move to {status}"),
            ));
        }
        Ok(())
    }

    async fn create_channel_dispatch(
        &self,
        dispatch_id: &str,
        channel: Channel,
    ) -> Result<ChannelDispatchRecord, RepositoryError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO channel_dispatches (
                id, dispatch_id, channel, status, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, 'pending', ?4, ?4)
            "#,
        )
        .bind(&id)
        .bind(dispatch_id)
        .bind(channel.as_str())
        .bind(format_timestamp(&now))
        .execute(&self.db_pool)
        .await
        .map_err(|e| {
            RepositoryError::storage(
                RepositoryErrorCode::ChannelDispatchCreateFailed,
                "Failed to insert channel dispatch",
                e,
            )
        })?;

        Ok(ChannelDispatchRecord {
            id,
            dispatch_id: dispatch_id.to_string(),
            channel,
            status: ChannelDispatchStatus::Pending,
            provider_message_id: None,
            error_message: None,
            sent_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn update_channel_dispatch(
        &self,
        id: &str,
        update: ChannelDispatchUpdate,
    ) -> Result<(), RepositoryError> {
        let next = update.status;
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE channel_dispatches SET status = ");
        qb.push_bind(next.as_str())
            .push(", provider_message_id = COALESCE(")
            .push_bind(update.provider_message_id)
            .push(", provider_message_id), error_message = COALESCE(")
            .push_bind(update.error_message)
            .push(", error_message), sent_at = COALESCE(")
            .push_bind(update.sent_at.as_ref().map(format_timestamp))
            .push(", sent_at), delivered_at = COALESCE(")
            .push_bind(update.delivered_at.as_ref().map(format_timestamp))
            .push(", delivered_at), updated_at = ")
            .push_bind(format_timestamp(&Utc::now()))
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND status IN (");
        let mut allowed = qb.separated(", ");
        for prev in ChannelDispatchStatus::ALL
            .iter()
            .filter(|prev| prev.can_transition_to(next))
        {
            allowed.push_bind(prev.as_str());
        }
        allowed.push_unseparated(")");

        let result = qb.build().execute(&self.db_pool).await.map_err(|e| {
            RepositoryError::storage(
                RepositoryErrorCode::ChannelDispatchUpdateFailed,
                "Failed to update channel dispatch",
                e,
            )
        })?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::new(
                RepositoryErrorCode::ChannelDispatchUpdateFailed,
                format!("Channel dispatch {id} not found or cannot move to {next}"),
            ));
        }
        Ok(())
    }

    async fn get_dispatch_with_channels(
        &self,
        id: &str,
    ) -> Result<Option<DispatchWithChannels>, RepositoryError> {
        let query_failed = |e: sqlx::Error| {
            RepositoryError::storage(
                RepositoryErrorCode::DispatchQueryFailed,
                "Failed to fetch dispatch",
                e,
            )
        };

        let row = sqlx::query_as::<_, DispatchRow>(&format!(
            "SELECT {DISPATCH_COLUMNS} FROM dispatches WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(query_failed)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let channel_rows = sqlx::query_as::<_, ChannelDispatchRow>(&format!(
            "SELECT {CHANNEL_DISPATCH_COLUMNS} FROM channel_dispatches \
             WHERE dispatch_id = ?1 ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(id)
        .fetch_all(&self.db_pool)
        .await
        .map_err(query_failed)?;

        let channel_dispatches = channel_rows
            .into_iter()
            .map(ChannelDispatchRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(DispatchWithChannels {
            dispatch: DispatchRecord::try_from(row)?,
            channel_dispatches,
        }))
    }

    async fn list_dispatches(
        &self,
        filters: &DispatchListFilters,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<DispatchRecord>, u64), RepositoryError> {
        let query_failed = |e: sqlx::Error| {
            RepositoryError::storage(
                RepositoryErrorCode::DispatchQueryFailed,
                "Failed to list dispatches",
                e,
            )
        };

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM dispatches");
        push_filters(&mut count, filters);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.db_pool)
            .await
            .map_err(query_failed)?;

        let mut items = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {DISPATCH_COLUMNS} FROM dispatches"
        ));
        push_filters(&mut items, filters);
        items
            .push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
            .push_bind(i64::from(limit))
            .push(" OFFSET ")
            .push_bind(i64::from(offset));

        let rows = items
            .build_query_as::<DispatchRow>()
            .fetch_all(&self.db_pool)
            .await
            .map_err(query_failed)?;

        let dispatches = rows
            .into_iter()
            .map(DispatchRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((dispatches, total.max(0) as u64))
    }

    async fn get_dispatch_stats(&self) -> Result<DispatchStats, RepositoryError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM dispatches GROUP BY status",
        )
        .fetch_all(&self.db_pool)
        .await
        .map_err(|e| {
            RepositoryError::storage(
                RepositoryErrorCode::DispatchQueryFailed,
                "Failed to compute dispatch stats",
                e,
            )
        })?;

        let mut stats = DispatchStats::default();
        for (status, count) in rows {
            match status.parse::<DispatchStatus>() {
                Ok(status) => stats.record(status, count.max(0) as u64),
                Err(e) => log::warn!("Skipping {count} dispatches: {e}"),
            }
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1")
            .execute(&self.db_pool)
            .await
            .map(|_| ())
            .map_err(|e| {
                RepositoryError::storage(
                    RepositoryErrorCode::DispatchQueryFailed,
                    "Database ping failed",
                    e,
                )
            })
    }
}
