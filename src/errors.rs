//! errors.rs
//! Errores tipados del motor de despacho y su mapeo a códigos HTTP.

use std::fmt;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Route,
    Driver,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Route => f.write_str("Route"),
            EntityKind::Driver => f.write_str("Driver"),
        }
    }
}

/// Malformed request shape, rejected before the orchestrator runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryErrorCode {
    DispatchCreateFailed,
    DispatchUpdateFailed,
    DispatchQueryFailed,
    ChannelDispatchCreateFailed,
    ChannelDispatchUpdateFailed,
    EntityQueryFailed,
    MigrationFailed,
}

impl RepositoryErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryErrorCode::DispatchCreateFailed => "DISPATCH_CREATE_FAILED",
            RepositoryErrorCode::DispatchUpdateFailed => "DISPATCH_UPDATE_FAILED",
            RepositoryErrorCode::DispatchQueryFailed => "DISPATCH_QUERY_FAILED",
            RepositoryErrorCode::ChannelDispatchCreateFailed => "CHANNEL_DISPATCH_CREATE_FAILED",
            RepositoryErrorCode::ChannelDispatchUpdateFailed => "CHANNEL_DISPATCH_UPDATE_FAILED",
            RepositoryErrorCode::EntityQueryFailed => "ENTITY_QUERY_FAILED",
            RepositoryErrorCode::MigrationFailed => "MIGRATION_FAILED",
        }
    }
}

impl fmt::Display for RepositoryErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{message} ({code})")]
pub struct RepositoryError {
    pub code: RepositoryErrorCode,
    pub message: String,
}

impl RepositoryError {
    pub fn new(code: RepositoryErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Wraps a storage error, keeping its text as context.
    pub fn storage(code: RepositoryErrorCode, context: &str, err: impl fmt::Display) -> Self {
        Self::new(code, format!("{context}: {err}"))
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("{kind} not found: {id}")]
    EntityNotFound { kind: EntityKind, id: String },
    #[error("No channel available for driver {driver_id}")]
    NoChannelAvailable { driver_id: String },
    #[error("Dispatch not found: {0}")]
    DispatchNotFound(String),
    #[error("Batch size must be between 1 and {max} items, got {got}")]
    InvalidBatchSize { got: usize, max: usize },
    #[error("Dispatch {dispatch_id} did not settle within {timeout_secs}s")]
    Cancelled { dispatch_id: String, timeout_secs: u64 },
    /// The deadline passed before the dispatch row was written; nothing was sent.
    #[error("Dispatch timed out after {timeout_secs}s before it was recorded")]
    TimedOut { timeout_secs: u64 },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl DispatchError {
    pub fn entity_not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::EntityNotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Validation(_) | DispatchError::InvalidBatchSize { .. } => {
                "VALIDATION_ERROR"
            }
            DispatchError::EntityNotFound { .. } | DispatchError::DispatchNotFound(_) => {
                "NOT_FOUND"
            }
            DispatchError::NoChannelAvailable { .. } => "NO_CHANNEL_AVAILABLE",
            DispatchError::Cancelled { .. } | DispatchError::TimedOut { .. } => {
                "DISPATCH_TIMEOUT"
            }
            DispatchError::Repository(e) => e.code.as_str(),
        }
    }
}

impl ResponseError for DispatchError {
    fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::Validation(_) | DispatchError::InvalidBatchSize { .. } => {
                StatusCode::BAD_REQUEST
            }
            DispatchError::EntityNotFound { .. } | DispatchError::DispatchNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            DispatchError::NoChannelAvailable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchError::Cancelled { .. } | DispatchError::TimedOut { .. } => {
                StatusCode::GATEWAY_TIMEOUT
            }
            DispatchError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let details = match self {
            DispatchError::Validation(e) => Some(json!({ "field": e.field })),
            DispatchError::EntityNotFound { kind, id } => {
                Some(json!({ "entity_type": kind, "entity_id": id }))
            }
            DispatchError::NoChannelAvailable { driver_id } => {
                Some(json!({ "driver_id": driver_id }))
            }
            DispatchError::Cancelled { dispatch_id, .. } => {
                Some(json!({ "dispatch_id": dispatch_id }))
            }
            _ => None,
        };

        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(details) = details {
            error["details"] = details;
        }

        HttpResponse::build(self.status_code()).json(json!({ "error": error }))
    }
}
