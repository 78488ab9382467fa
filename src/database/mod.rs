//! # Database Layer
//!
//! Pool construction and the processing-register capability the engine
//! consumes. The Postgres implementation lives in [`pg_register`]; tests run
//! against an in-memory register implementing the same trait.

pub mod pg_register;
pub mod register;

pub use pg_register::PgProcessingRegister;
pub use register::{OutstandingFilter, ProcessingRegister};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Build a connection pool from configuration and verify connectivity.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect(&config.url())
        .await?;

    // Cheap connectivity probe so misconfiguration fails at startup, not on
    // the first tick.
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}
