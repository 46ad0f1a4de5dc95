//! models/mod.rs
//! Módulo raíz para modelos/estructuras compartidas.

pub mod channel_model;
pub mod dispatch_model;
pub mod entity_model;
pub mod health_model;
pub mod request_model;
