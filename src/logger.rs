//! logger.rs
//! Logger del servicio sobre env_logger.

use env_logger::{Builder, Env};

/// Consultas de sqlx y tráfico SMTP solo aparecen si RUST_LOG los pide.
const QUIET_BY_DEFAULT: &[(&str, log::LevelFilter)] = &[
    ("sqlx::query", log::LevelFilter::Warn),
    ("lettre", log::LevelFilter::Warn),
];

pub fn init_logger() {
    let filter = std::env::var("RUST_LOG").ok();

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    if filter.is_none() {
        for (module, level) in QUIET_BY_DEFAULT {
            builder.filter_module(module, *level);
        }
    }

    builder.format_timestamp_secs().format_target(true).init();
}
