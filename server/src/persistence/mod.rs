//! Storage layer: one repository trait, two backends, and the adapter
//! that picks a backend once at startup.

mod json_store;
mod sql;
pub mod traits;

pub use json_store::JsonEntityStore;
pub use sql::{migrate_json_to_database, Database, MigrationReport, SqlEntityStore};

use tracing::{error, info};

use crate::config::Config;
use crate::error::TrackerError;
use crate::model::{Entity, EntityPatch, Kind, LimitStatus, NewEntity, Status};
use traits::EntityRepository;

/// The storage backend for the lifetime of the process. Exactly one
/// variant is ever constructed, so dual writes cannot happen.
pub enum Store {
    Json(JsonEntityStore),
    Sql(SqlEntityStore),
}

impl Store {
    /// Pick a backend from the config: a database URL selects the
    /// relational store (importing any existing JSON data once), otherwise
    /// the JSON files are used directly.
    pub async fn from_config(config: &Config) -> Result<Self, TrackerError> {
        match &config.database_url {
            Some(url) => {
                let db = Database::connect(url).await?;
                if let Err(e) = migrate_json_to_database(db.pool(), &config.data_dir).await {
                    error!(error = %e, "JSON migration failed, continuing with the database as-is");
                }
                info!("storage mode: database");
                Ok(Store::Sql(SqlEntityStore::new(db.pool().clone())))
            }
            None => {
                let store = JsonEntityStore::open(&config.data_dir)?;
                info!(data_dir = %config.data_dir.display(), "storage mode: json files");
                Ok(Store::Json(store))
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Store::Json(_) => "json",
            Store::Sql(_) => "database",
        }
    }
}

impl EntityRepository for Store {
    async fn list_all(&self, kind: Kind) -> Result<Vec<Entity>, TrackerError> {
        match self {
            Store::Json(s) => s.list_all(kind).await,
            Store::Sql(s) => s.list_all(kind).await,
        }
    }

    async fn get(&self, kind: Kind, id: i64) -> Result<Option<Entity>, TrackerError> {
        match self {
            Store::Json(s) => s.get(kind, id).await,
            Store::Sql(s) => s.get(kind, id).await,
        }
    }

    async fn create(&self, kind: Kind, req: NewEntity) -> Result<Entity, TrackerError> {
        match self {
            Store::Json(s) => s.create(kind, req).await,
            Store::Sql(s) => s.create(kind, req).await,
        }
    }

    async fn update(
        &self,
        kind: Kind,
        id: i64,
        patch: EntityPatch,
    ) -> Result<Entity, TrackerError> {
        match self {
            Store::Json(s) => s.update(kind, id, patch).await,
            Store::Sql(s) => s.update(kind, id, patch).await,
        }
    }

    async fn delete(&self, kind: Kind, id: i64) -> Result<(), TrackerError> {
        match self {
            Store::Json(s) => s.delete(kind, id).await,
            Store::Sql(s) => s.delete(kind, id).await,
        }
    }

    async fn count_by_status(&self, kind: Kind, status: Status) -> Result<u64, TrackerError> {
        match self {
            Store::Json(s) => s.count_by_status(kind, status).await,
            Store::Sql(s) => s.count_by_status(kind, status).await,
        }
    }

    async fn count_all(&self, kind: Kind) -> Result<u64, TrackerError> {
        match self {
            Store::Json(s) => s.count_all(kind).await,
            Store::Sql(s) => s.count_all(kind).await,
        }
    }

    async fn limit_status(&self, kind: Kind) -> Result<LimitStatus, TrackerError> {
        match self {
            Store::Json(s) => s.limit_status(kind).await,
            Store::Sql(s) => s.limit_status(kind).await,
        }
    }

    async fn set_limit(&self, kind: Kind, limit: u32) -> Result<LimitStatus, TrackerError> {
        match self {
            Store::Json(s) => s.set_limit(kind, limit).await,
            Store::Sql(s) => s.set_limit(kind, limit).await,
        }
    }
}
