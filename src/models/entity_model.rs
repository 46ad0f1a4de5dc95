//! models/entity_model.rs
//! Entidades de negocio que el motor solo lee: rutas, conductores, vehículos y reservas.

use serde::{Deserialize, Serialize};

use crate::models::channel_model::Channel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub preferred_channel: Option<Channel>,
    pub fallback_enabled: bool,
}

impl Driver {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Route {
    pub id: String,
    pub name: String,
    pub code: Option<String>,
    pub date: String,
    pub planned_start_time: Option<String>,
    pub planned_end_time: Option<String>,
    pub total_stops: i64,
    pub total_distance_km: Option<f64>,
    pub total_duration_minutes: Option<i64>,
    pub vehicle_id: Option<String>,
    pub driver_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vehicle {
    pub id: String,
    pub name: String,
    pub license_plate: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub route_id: String,
    pub stop_number: i64,
    pub client_name: String,
    pub address: String,
    pub scheduled_time: Option<String>,
    pub services: Option<String>,
    pub special_instructions: Option<String>,
    pub maps_url: Option<String>,
}
