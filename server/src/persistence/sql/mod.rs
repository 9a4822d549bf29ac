//! Relational backend: pool + schema management, the repository
//! implementation, and the one-shot JSON import.

mod database;
mod entity_repo;
mod migrate_json;

pub use database::Database;
pub use entity_repo::SqlEntityStore;
pub use migrate_json::{migrate_json_to_database, MigrationReport};
