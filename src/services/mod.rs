//! services/mod.rs
//! Módulo que agrupa los servicios: canales, repositorios y el orquestador de despachos.

pub mod channel_router;
pub mod channels;
pub mod database;
pub mod dispatch_repository;
pub mod dispatch_service;
pub mod entity_repository;
pub mod health_service;
pub mod template_service;
