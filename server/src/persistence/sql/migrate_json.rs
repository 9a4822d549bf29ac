//! One-shot import of the JSON data files into the relational store.
//!
//! Runs at startup when the relational backend is selected. A database
//! that already holds entities makes this a no-op, so restarting against
//! the same database never duplicates rows. The JSON files are left in
//! place as a backup.

use std::path::Path;

use sqlx::AnyPool;
use tracing::info;

use crate::error::TrackerError;
use crate::model::Kind;
use crate::persistence::json_store::read_kind_file;
use crate::persistence::sql::entity_repo::{insert_entity, write_setting};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    pub skipped: bool,
    pub games: u64,
    pub books: u64,
}

impl MigrationReport {
    fn has_data(&self) -> bool {
        self.games > 0 || self.books > 0
    }
}

/// Copy every record from the JSON files into the database verbatim:
/// ids, timestamps, limits, and next-id counters all carry over, so
/// migrated rows are indistinguishable from natively created ones.
pub async fn migrate_json_to_database(
    pool: &AnyPool,
    data_dir: &Path,
) -> Result<MigrationReport, TrackerError> {
    let existing = current_counts(pool).await?;
    if existing.has_data() {
        info!(
            games = existing.games,
            books = existing.books,
            "database already populated, skipping JSON migration"
        );
        return Ok(MigrationReport {
            skipped: true,
            ..existing
        });
    }

    let mut report = MigrationReport {
        skipped: false,
        games: 0,
        books: 0,
    };

    let mut tx = pool.begin().await?;
    for kind in Kind::ALL {
        let spec = kind.spec();
        let Some(data) = read_kind_file(&data_dir.join(spec.data_file))? else {
            continue;
        };

        let mut migrated = 0u64;
        for entity in data.entities.values() {
            insert_entity(&mut tx, kind, entity).await?;
            migrated += 1;
        }

        if let Some(limit) = data.limit {
            write_setting(&mut tx, spec.limit_key, i64::from(limit)).await?;
        }
        let max_id = data.entities.keys().next_back().copied().unwrap_or(0);
        let next_id = data.next_id.unwrap_or(0).max(max_id + 1);
        write_setting(&mut tx, spec.next_id_key, next_id).await?;

        match kind {
            Kind::Game => report.games = migrated,
            Kind::Book => report.books = migrated,
        }
    }
    tx.commit().await?;

    if report.has_data() {
        info!(
            games = report.games,
            books = report.books,
            "migrated JSON data into the database"
        );
    } else {
        info!("no JSON data found to migrate");
    }
    Ok(report)
}

async fn current_counts(pool: &AnyPool) -> Result<MigrationReport, TrackerError> {
    Ok(MigrationReport {
        skipped: false,
        games: kind_count(pool, Kind::Game).await?,
        books: kind_count(pool, Kind::Book).await?,
    })
}

async fn kind_count(pool: &AnyPool, kind: Kind) -> Result<u64, TrackerError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entities WHERE kind = $1")
        .bind(kind.as_str())
        .fetch_one(pool)
        .await?;
    Ok(count as u64)
}
