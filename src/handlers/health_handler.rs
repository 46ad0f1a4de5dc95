//! handlers/health_handler.rs
use actix_web::{web, HttpResponse};

use crate::models::health_model::ComponentStatus;
use crate::services::health_service::HealthService;

/// GET /api/v1/health
pub async fn health_endpoint(health: web::Data<HealthService>) -> HttpResponse {
    let report = health.check().await;
    match report.status {
        ComponentStatus::Unhealthy => HttpResponse::ServiceUnavailable().json(report),
        _ => HttpResponse::Ok().json(report),
    }
}
