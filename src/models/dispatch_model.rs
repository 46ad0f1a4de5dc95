//! models/dispatch_model.rs
//! Registros de despacho, estados y resultados (individual y por lote).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::channel_model::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Pending,
    Sending,
    Delivered,
    Partial,
    Failed,
}

impl DispatchStatus {
    pub const ALL: [DispatchStatus; 5] = [
        DispatchStatus::Pending,
        DispatchStatus::Sending,
        DispatchStatus::Delivered,
        DispatchStatus::Partial,
        DispatchStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Pending => "pending",
            DispatchStatus::Sending => "sending",
            DispatchStatus::Delivered => "delivered",
            DispatchStatus::Partial => "partial",
            DispatchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatchStatus::Delivered | DispatchStatus::Partial | DispatchStatus::Failed
        )
    }

    /// pending -> sending -> {delivered | partial | failed}; terminal states never move.
    pub fn can_transition_to(&self, next: DispatchStatus) -> bool {
        match (self, next) {
            (DispatchStatus::Pending, DispatchStatus::Sending) => true,
            (DispatchStatus::Pending, n) | (DispatchStatus::Sending, n) => n.is_terminal(),
            _ => false,
        }
    }

    /// Folds settled channel outcomes into the aggregate status.
    ///
    /// Any channel that has not settled keeps the dispatch in `sending`. With
    /// no channels at all there is nothing that could have been delivered, so
    /// the dispatch is `failed`.
    pub fn aggregate<I>(channel_statuses: I) -> DispatchStatus
    where
        I: IntoIterator<Item = ChannelDispatchStatus>,
    {
        let mut delivered = 0usize;
        let mut failed = 0usize;

        for status in channel_statuses {
            match status {
                ChannelDispatchStatus::Delivered => delivered += 1,
                ChannelDispatchStatus::Failed => failed += 1,
                ChannelDispatchStatus::Pending | ChannelDispatchStatus::Sending => {
                    return DispatchStatus::Sending
                }
            }
        }

        match (delivered, failed) {
            (0, _) => DispatchStatus::Failed,
            (_, 0) => DispatchStatus::Delivered,
            _ => DispatchStatus::Partial,
        }
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(DispatchStatus::Pending),
            "sending" => Ok(DispatchStatus::Sending),
            "delivered" => Ok(DispatchStatus::Delivered),
            "partial" => Ok(DispatchStatus::Partial),
            "failed" => Ok(DispatchStatus::Failed),
            other => Err(format!("Unknown dispatch status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelDispatchStatus {
    Pending,
    Sending,
    Delivered,
    Failed,
}

impl ChannelDispatchStatus {
    pub const ALL: [ChannelDispatchStatus; 4] = [
        ChannelDispatchStatus::Pending,
        ChannelDispatchStatus::Sending,
        ChannelDispatchStatus::Delivered,
        ChannelDispatchStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelDispatchStatus::Pending => "pending",
            ChannelDispatchStatus::Sending => "sending",
            ChannelDispatchStatus::Delivered => "delivered",
            ChannelDispatchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChannelDispatchStatus::Delivered | ChannelDispatchStatus::Failed
        )
    }

    /// pending -> sending -> {delivered | failed}. A pending row may also be
    /// settled directly when the attempt never starts.
    pub fn can_transition_to(&self, next: ChannelDispatchStatus) -> bool {
        match (self, next) {
            (ChannelDispatchStatus::Pending, ChannelDispatchStatus::Sending) => true,
            (ChannelDispatchStatus::Pending, n) | (ChannelDispatchStatus::Sending, n) => {
                n.is_terminal()
            }
            _ => false,
        }
    }
}

impl fmt::Display for ChannelDispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelDispatchStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(ChannelDispatchStatus::Pending),
            "sending" => Ok(ChannelDispatchStatus::Sending),
            "delivered" => Ok(ChannelDispatchStatus::Delivered),
            "failed" => Ok(ChannelDispatchStatus::Failed),
            other => Err(format!("Unknown channel dispatch status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub id: String,
    pub route_id: String,
    pub driver_id: String,
    pub status: DispatchStatus,
    pub requested_channels: Vec<Channel>,
    pub metadata: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDispatchRecord {
    pub id: String,
    pub dispatch_id: String,
    pub channel: Channel,
    pub status: ChannelDispatchStatus,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for the initial `pending` dispatch row.
#[derive(Debug, Clone)]
pub struct NewDispatch {
    pub route_id: String,
    pub driver_id: String,
    pub requested_channels: Vec<Channel>,
    pub metadata: Option<Map<String, Value>>,
}

/// Fields written when a channel row changes state. `None` leaves the column untouched.
#[derive(Debug, Clone)]
pub struct ChannelDispatchUpdate {
    pub status: ChannelDispatchStatus,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl ChannelDispatchUpdate {
    pub fn sending() -> Self {
        Self {
            status: ChannelDispatchStatus::Sending,
            provider_message_id: None,
            error_message: None,
            sent_at: None,
            delivered_at: None,
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            status: ChannelDispatchStatus::Failed,
            error_message: Some(error_message.into()),
            ..Self::sending()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchWithChannels {
    #[serde(flatten)]
    pub dispatch: DispatchRecord,
    pub channel_dispatches: Vec<ChannelDispatchRecord>,
}

/// Parsed, validated dispatch request.
#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    pub route_id: String,
    pub driver_id: String,
    pub channels: Vec<Channel>,
    pub multi_channel: bool,
    pub metadata: Option<Map<String, Value>>,
}

impl DispatchRequest {
    pub fn new(route_id: impl Into<String>, driver_id: impl Into<String>) -> Self {
        Self {
            route_id: route_id.into(),
            driver_id: driver_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub dispatch_id: String,
    pub status: DispatchStatus,
    pub requested_channels: Vec<Channel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResult {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItemResult {
    pub fn succeeded(index: usize, dispatch_id: String) -> Self {
        Self {
            index,
            success: true,
            dispatch_id: Some(dispatch_id),
            error: None,
        }
    }

    pub fn failed(index: usize, error: String) -> Self {
        Self {
            index,
            success: false,
            dispatch_id: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchDispatchResult {
    pub results: Vec<BatchItemResult>,
    pub summary: BatchSummary,
}

impl BatchDispatchResult {
    pub fn from_results(results: Vec<BatchItemResult>) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        let summary = BatchSummary {
            total: results.len(),
            successful,
            failed: results.len() - successful,
        };
        Self { results, summary }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchListFilters {
    pub status: Option<DispatchStatus>,
    pub driver_id: Option<String>,
    pub route_id: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchList {
    pub dispatches: Vec<DispatchRecord>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

/// `sending` and `partial` both count as active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub total: u64,
    pub active: u64,
    pub success: u64,
    pub failed: u64,
    pub pending: u64,
}

impl DispatchStats {
    pub fn record(&mut self, status: DispatchStatus, count: u64) {
        self.total += count;
        match status {
            DispatchStatus::Sending | DispatchStatus::Partial => self.active += count,
            DispatchStatus::Delivered => self.success += count,
            DispatchStatus::Failed => self.failed += count,
            DispatchStatus::Pending => self.pending += count,
        }
    }
}
