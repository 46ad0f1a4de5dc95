//! services/database.rs
//! Pool de SQLite y migraciones. Lo construye `main` y se pasa a los repositorios.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::errors::{RepositoryError, RepositoryErrorCode};

pub async fn connect_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

    if !in_memory {
        if let Some(parent) = database_file(database_url).and_then(|p| p.parent()) {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("No se pudo crear el directorio {}", parent.display())
                })?;
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("DATABASE_URL inválida: {database_url}"))?
        .create_if_missing(true)
        .foreign_keys(true);

    // Cada conexión a :memory: es una base distinta: una sola conexión que no expire.
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(max_connections.max(1))
    };

    log::info!("Conectando a SQLite en {}", database_url);
    pool_options
        .connect_with(options)
        .await
        .context("No se pudo conectar a la base de datos SQLite")
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), RepositoryError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            RepositoryError::storage(RepositoryErrorCode::MigrationFailed, "Migration failed", e)
        })
}

fn database_file(database_url: &str) -> Option<&Path> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        None
    } else {
        Some(Path::new(path))
    }
}
