//! Connection pool, startup probe, and idempotent schema setup.
//!
//! The pool goes through sqlx's `Any` driver: production deployments point
//! `DATABASE_URL` at PostgreSQL, while tests run the same code against an
//! in-memory SQLite database. All SQL in this layer sticks to the syntax
//! both engines accept.

use std::sync::Once;
use std::time::Duration;

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::TrackerError;
use crate::model::Kind;

const POOL_MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS entities (
        id BIGINT NOT NULL,
        kind TEXT NOT NULL,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        notes TEXT NOT NULL,
        rating BIGINT,
        reason TEXT NOT NULL,
        created_at TEXT NOT NULL,
        started_at TEXT,
        ended_at TEXT,
        PRIMARY KEY (kind, id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_entities_kind_status ON entities (kind, status)",
    "CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value BIGINT NOT NULL
    )",
];

static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    // install_default_drivers panics when called twice.
    INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
}

/// Holds the connection pool for the relational backend.
#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
}

impl Database {
    /// Connect to `url`, probe the connection, and apply the schema.
    /// An unreachable database is reported promptly rather than hanging.
    pub async fn connect(url: &str) -> Result<Self, TrackerError> {
        install_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;

        let db = Self { pool };
        if !db.probe().await {
            return Err(TrackerError::Unavailable(
                "database did not answer the startup probe".into(),
            ));
        }
        db.setup_schema().await?;
        info!("database connection established");
        Ok(db)
    }

    /// In-memory SQLite database for tests. A single connection keeps the
    /// `:memory:` database alive for the pool's lifetime.
    #[cfg(test)]
    pub async fn new_in_memory() -> Result<Self, TrackerError> {
        install_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.setup_schema().await?;
        Ok(db)
    }

    /// Bounded `SELECT 1` probe; returns false instead of hanging.
    pub async fn probe(&self) -> bool {
        match timeout(PROBE_TIMEOUT, sqlx::query("SELECT 1").execute(&self.pool)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "database probe failed");
                false
            }
            Err(_) => {
                warn!("database probe timed out");
                false
            }
        }
    }

    async fn setup_schema(&self) -> Result<(), TrackerError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        for kind in Kind::ALL {
            let spec = kind.spec();
            sqlx::query("INSERT INTO settings (key, value) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING")
                .bind(spec.limit_key)
                .bind(i64::from(spec.default_limit))
                .execute(&self.pool)
                .await?;
            sqlx::query("INSERT INTO settings (key, value) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING")
                .bind(spec.next_id_key)
                .bind(1_i64)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}
