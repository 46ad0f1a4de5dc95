//! handlers/mod.rs
//! Handlers HTTP de despachos y salud.
pub mod dispatch_handler;
pub mod health_handler;
