//! handlers/dispatch_handler.rs
//! Endpoints de despacho: individual, por lote, consulta, listado y estadísticas.

use actix_web::{web, HttpResponse};
use serde_json::Value;

use crate::errors::{DispatchError, ValidationError};
use crate::models::dispatch_model::DispatchListFilters;
use crate::models::request_model::{validate_uuid, BatchDispatchBody, DispatchBody};
use crate::services::dispatch_service::DispatchOrchestrator;

/// POST /api/v1/dispatch
pub async fn create_dispatch_endpoint(
    orchestrator: web::Data<DispatchOrchestrator>,
    body: web::Json<Value>,
) -> Result<HttpResponse, DispatchError> {
    let request = DispatchBody::from_value(body.into_inner())?.validate()?;
    let result = orchestrator.dispatch(request).await?;
    Ok(HttpResponse::Created().json(result))
}

/// POST /api/v1/dispatch/batch
/// Un ítem inválido falla solo; el lote completo solo se rechaza por tamaño.
pub async fn batch_dispatch_endpoint(
    orchestrator: web::Data<DispatchOrchestrator>,
    body: web::Json<BatchDispatchBody>,
) -> Result<HttpResponse, DispatchError> {
    let items = body
        .into_inner()
        .dispatches
        .ok_or_else(|| ValidationError::new("dispatches", "dispatches is required"))?;

    let parsed = items
        .into_iter()
        .map(|item| DispatchBody::from_value(item).and_then(DispatchBody::validate))
        .collect();

    let result = orchestrator.dispatch_batch_parsed(parsed).await?;
    Ok(HttpResponse::Ok().json(result))
}

/// GET /api/v1/dispatch/{id}
pub async fn get_dispatch_endpoint(
    orchestrator: web::Data<DispatchOrchestrator>,
    path: web::Path<String>,
) -> Result<HttpResponse, DispatchError> {
    let id = validate_uuid("id", &path.into_inner())?;
    let dispatch = orchestrator.get_dispatch(&id).await?;
    Ok(HttpResponse::Ok().json(dispatch))
}

/// GET /api/v1/dispatch
pub async fn list_dispatches_endpoint(
    orchestrator: web::Data<DispatchOrchestrator>,
    query: web::Query<DispatchListFilters>,
) -> Result<HttpResponse, DispatchError> {
    let mut filters = query.into_inner();
    filters.driver_id = filters
        .driver_id
        .as_deref()
        .map(|v| validate_uuid("driver_id", v))
        .transpose()?;
    filters.route_id = filters
        .route_id
        .as_deref()
        .map(|v| validate_uuid("route_id", v))
        .transpose()?;

    let list = orchestrator.list_dispatches(filters).await?;
    Ok(HttpResponse::Ok().json(list))
}

/// GET /api/v1/dispatch/stats
pub async fn dispatch_stats_endpoint(
    orchestrator: web::Data<DispatchOrchestrator>,
) -> Result<HttpResponse, DispatchError> {
    let stats = orchestrator.dispatch_stats().await?;
    Ok(HttpResponse::Ok().json(stats))
}
