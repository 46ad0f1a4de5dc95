use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;

use crate::config::dispatch_config::DispatchConfig;
use crate::logger::init_logger;
use crate::services::channels::email_channel::EmailChannel;
use crate::services::channels::telegram_channel::TelegramChannel;
use crate::services::channels::{ChannelAdapter, ChannelRegistry};
use crate::services::database::{connect_pool, run_migrations};
use crate::services::dispatch_repository::SqliteDispatchRepository;
use crate::services::dispatch_service::DispatchOrchestrator;
use crate::services::entity_repository::SqliteEntityRepository;
use crate::services::health_service::HealthService;
use crate::services::template_service::TemplateEngine;

mod app;
mod config;
mod errors;
mod handlers;
mod logger;
mod models;
mod services;

#[cfg(test)]
mod tests;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    init_logger();

    let config = DispatchConfig::from_env();

    // Base de datos + migraciones
    let db_pool = connect_pool(&config.database_url, 5).await?;
    run_migrations(&db_pool)
        .await
        .context("Fallo en migraciones")?;

    // Adaptadores de canal
    let adapters: Vec<Arc<dyn ChannelAdapter>> = vec![
        Arc::new(TelegramChannel::new(&config.telegram)),
        Arc::new(EmailChannel::new(&config.email)),
    ];
    let registry = Arc::new(ChannelRegistry::new(adapters));

    let dispatch_repository = Arc::new(SqliteDispatchRepository::new(db_pool.clone()));
    let entity_repository = Arc::new(SqliteEntityRepository::new(db_pool.clone()));

    let orchestrator = DispatchOrchestrator::new(
        entity_repository,
        dispatch_repository.clone(),
        registry.clone(),
        TemplateEngine::new(&config.app_base_url),
        config.orchestrator,
    );
    let health_service = HealthService::new(dispatch_repository, registry);

    log::info!(
        "Levantando servidor en {}:{}",
        config.bind_address,
        config.port
    );
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(orchestrator.clone()))
            .app_data(web::Data::new(health_service.clone()))
            .configure(app::init_app)
    })
    .workers(config.http_workers)
    .bind((config.bind_address.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
