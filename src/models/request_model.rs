//! models/request_model.rs
//! Cuerpos HTTP tal como llegan y su validación hacia `DispatchRequest`.

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::ValidationError;
use crate::models::channel_model::Channel;
use crate::models::dispatch_model::DispatchRequest;

/// Body for POST /api/v1/dispatch. Every field is optional at the serde level
/// so that missing or mistyped fields surface as `ValidationError`s.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchBody {
    pub route_id: Option<String>,
    pub driver_id: Option<String>,
    pub channels: Option<Vec<String>>,
    pub multi_channel: Option<bool>,
    pub metadata: Option<Value>,
}

/// Body for POST /api/v1/dispatch/batch. Items stay raw JSON so one bad item
/// fails alone instead of rejecting the whole batch.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchDispatchBody {
    pub dispatches: Option<Vec<Value>>,
}

impl DispatchBody {
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        if !value.is_object() {
            return Err(ValidationError::new(
                "body",
                "Request body must be a JSON object",
            ));
        }
        serde_json::from_value(value).map_err(|e| ValidationError::new("body", e.to_string()))
    }

    pub fn validate(self) -> Result<DispatchRequest, ValidationError> {
        let route_id = required_uuid("route_id", self.route_id)?;
        let driver_id = required_uuid("driver_id", self.driver_id)?;

        let mut channels: Vec<Channel> = Vec::new();
        for raw in self.channels.unwrap_or_default() {
            let channel = raw
                .parse::<Channel>()
                .map_err(|e| ValidationError::new("channels", e))?;
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }

        let metadata = match self.metadata {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                return Err(ValidationError::new(
                    "metadata",
                    "metadata must be a JSON object",
                ))
            }
        };

        Ok(DispatchRequest {
            route_id,
            driver_id,
            channels,
            multi_channel: self.multi_channel.unwrap_or(false),
            metadata,
        })
    }
}

pub fn validate_uuid(field: &str, value: &str) -> Result<String, ValidationError> {
    Uuid::parse_str(value.trim())
        .map(|id| id.to_string())
        .map_err(|_| ValidationError::new(field, format!("{field} must be a valid UUID")))
}

fn required_uuid(field: &str, value: Option<String>) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => validate_uuid(field, &v),
        _ => Err(ValidationError::new(field, format!("{field} is required"))),
    }
}
