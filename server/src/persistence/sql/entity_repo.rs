//! Relational storage backend.
//!
//! Every mutation runs in a transaction that first takes a write lock on
//! the kind's settings row, serializing the invariant checks with the
//! write they guard. The business rules themselves are the same shared
//! functions the JSON backend uses; this module only moves rows in and
//! out of SQL.

use chrono::{DateTime, Utc};
use sqlx::{Any, AnyPool, Transaction};

use crate::error::TrackerError;
use crate::model::{self, Entity, EntityPatch, Kind, KindSpec, LimitStatus, NewEntity, Status};
use crate::persistence::traits::EntityRepository;
use crate::rules;

type AnyTx<'a> = Transaction<'a, Any>;

const ENTITY_COLUMNS: &str =
    "id, name, status, notes, rating, reason, created_at, started_at, ended_at";

type EntityRow = (
    i64,            // id
    String,         // name
    String,         // status
    String,         // notes
    Option<i64>,    // rating
    String,         // reason
    String,         // created_at
    Option<String>, // started_at
    Option<String>, // ended_at
);

fn decode_ts(raw: &str) -> Result<DateTime<Utc>, TrackerError> {
    model::decode_ts(raw)
        .map_err(|e| TrackerError::InvalidRecord(format!("bad timestamp '{raw}': {e}")))
}

fn row_to_entity(row: EntityRow) -> Result<Entity, TrackerError> {
    let (id, name, status, notes, rating, reason, created_at, started_at, ended_at) = row;
    let status = Status::parse(&status)
        .ok_or_else(|| TrackerError::InvalidRecord(format!("unknown status '{status}'")))?;
    let rating = match rating {
        Some(r) if (0..=i64::from(rules::MAX_RATING)).contains(&r) => Some(r as u8),
        Some(r) => {
            return Err(TrackerError::InvalidRecord(format!(
                "rating {r} out of range"
            )))
        }
        None => None,
    };
    Ok(Entity {
        id,
        name,
        status,
        notes,
        rating,
        reason,
        created_at: decode_ts(&created_at)?,
        started_at: started_at.as_deref().map(decode_ts).transpose()?,
        ended_at: ended_at.as_deref().map(decode_ts).transpose()?,
    })
}

/// Take a write lock on the kind's settings row. Every writer goes through
/// here first, so checks made afterwards in the same transaction cannot
/// race another writer of the same kind.
async fn lock_kind(tx: &mut AnyTx<'_>, spec: &KindSpec) -> Result<(), TrackerError> {
    sqlx::query("UPDATE settings SET value = value WHERE key = $1")
        .bind(spec.limit_key)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn read_limit(tx: &mut AnyTx<'_>, spec: &KindSpec) -> Result<u32, TrackerError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT value FROM settings WHERE key = $1")
        .bind(spec.limit_key)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.map_or(spec.default_limit, |(v,)| v as u32))
}

async fn counting_count(
    tx: &mut AnyTx<'_>,
    spec: &KindSpec,
    exclude: Option<i64>,
) -> Result<u64, TrackerError> {
    let (count,): (i64,) = match exclude {
        Some(id) => {
            sqlx::query_as(
                "SELECT COUNT(*) FROM entities WHERE kind = $1 AND status = $2 AND id <> $3",
            )
            .bind(spec.kind.as_str())
            .bind(spec.counting.as_str())
            .bind(id)
            .fetch_one(&mut **tx)
            .await?
        }
        None => {
            sqlx::query_as("SELECT COUNT(*) FROM entities WHERE kind = $1 AND status = $2")
                .bind(spec.kind.as_str())
                .bind(spec.counting.as_str())
                .fetch_one(&mut **tx)
                .await?
        }
    };
    Ok(count as u64)
}

async fn counting_names(
    tx: &mut AnyTx<'_>,
    spec: &KindSpec,
    exclude: Option<i64>,
) -> Result<Vec<String>, TrackerError> {
    let rows: Vec<(String,)> = match exclude {
        Some(id) => {
            sqlx::query_as(
                "SELECT name FROM entities WHERE kind = $1 AND status = $2 AND id <> $3",
            )
            .bind(spec.kind.as_str())
            .bind(spec.counting.as_str())
            .bind(id)
            .fetch_all(&mut **tx)
            .await?
        }
        None => {
            sqlx::query_as("SELECT name FROM entities WHERE kind = $1 AND status = $2")
                .bind(spec.kind.as_str())
                .bind(spec.counting.as_str())
                .fetch_all(&mut **tx)
                .await?
        }
    };
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Upsert a settings row. `excluded` is understood by both engines.
pub(crate) async fn write_setting(
    tx: &mut AnyTx<'_>,
    key: &str,
    value: i64,
) -> Result<(), TrackerError> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES ($1, $2)
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Claim the next id for the kind and advance the persistent counter.
async fn next_id(tx: &mut AnyTx<'_>, spec: &KindSpec) -> Result<i64, TrackerError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT value FROM settings WHERE key = $1")
        .bind(spec.next_id_key)
        .fetch_optional(&mut **tx)
        .await?;
    let id = row.map_or(1, |(v,)| v);
    write_setting(tx, spec.next_id_key, id + 1).await?;
    Ok(id)
}

pub(crate) async fn insert_entity(
    tx: &mut AnyTx<'_>,
    kind: Kind,
    entity: &Entity,
) -> Result<(), TrackerError> {
    sqlx::query(
        "INSERT INTO entities
            (kind, id, name, status, notes, rating, reason, created_at, started_at, ended_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(kind.as_str())
    .bind(entity.id)
    .bind(&entity.name)
    .bind(entity.status.as_str())
    .bind(&entity.notes)
    .bind(entity.rating.map(i64::from))
    .bind(&entity.reason)
    .bind(model::encode_ts(entity.created_at))
    .bind(entity.started_at.map(model::encode_ts))
    .bind(entity.ended_at.map(model::encode_ts))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub struct SqlEntityStore {
    pool: AnyPool,
}

impl SqlEntityStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

impl EntityRepository for SqlEntityStore {
    async fn list_all(&self, kind: Kind) -> Result<Vec<Entity>, TrackerError> {
        let query = format!(
            "SELECT {ENTITY_COLUMNS} FROM entities
             WHERE kind = $1 ORDER BY created_at DESC, id DESC"
        );
        let rows: Vec<EntityRow> = sqlx::query_as(&query)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_entity).collect()
    }

    async fn get(&self, kind: Kind, id: i64) -> Result<Option<Entity>, TrackerError> {
        let query = format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE kind = $1 AND id = $2");
        let row: Option<EntityRow> = sqlx::query_as(&query)
            .bind(kind.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_entity).transpose()
    }

    async fn create(&self, kind: Kind, req: NewEntity) -> Result<Entity, TrackerError> {
        let spec = kind.spec();
        let mut tx = self.pool.begin().await?;
        lock_kind(&mut tx, spec).await?;

        let limit = read_limit(&mut tx, spec).await?;
        let count = counting_count(&mut tx, spec, None).await?;
        let names = counting_names(&mut tx, spec, None).await?;
        let id = next_id(&mut tx, spec).await?;

        // A failed check rolls the transaction (and the claimed id) back.
        let entity = rules::build_new(spec, &req, id, count, limit, &names)?;
        insert_entity(&mut tx, kind, &entity).await?;
        tx.commit().await?;
        Ok(entity)
    }

    async fn update(
        &self,
        kind: Kind,
        id: i64,
        patch: EntityPatch,
    ) -> Result<Entity, TrackerError> {
        let spec = kind.spec();
        let mut tx = self.pool.begin().await?;
        lock_kind(&mut tx, spec).await?;

        let query = format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE kind = $1 AND id = $2");
        let row: Option<EntityRow> = sqlx::query_as(&query)
            .bind(kind.as_str())
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let current = row
            .map(row_to_entity)
            .transpose()?
            .ok_or(TrackerError::NotFound { id })?;

        let limit = read_limit(&mut tx, spec).await?;
        let count = counting_count(&mut tx, spec, Some(id)).await?;
        let names = counting_names(&mut tx, spec, Some(id)).await?;
        let updated = rules::apply_update(spec, &current, &patch, count, limit, &names)?;

        sqlx::query(
            "UPDATE entities
             SET name = $1, status = $2, notes = $3, rating = $4, reason = $5,
                 started_at = $6, ended_at = $7
             WHERE kind = $8 AND id = $9",
        )
        .bind(&updated.name)
        .bind(updated.status.as_str())
        .bind(&updated.notes)
        .bind(updated.rating.map(i64::from))
        .bind(&updated.reason)
        .bind(updated.started_at.map(model::encode_ts))
        .bind(updated.ended_at.map(model::encode_ts))
        .bind(kind.as_str())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn delete(&self, kind: Kind, id: i64) -> Result<(), TrackerError> {
        let result = sqlx::query("DELETE FROM entities WHERE kind = $1 AND id = $2")
            .bind(kind.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound { id });
        }
        Ok(())
    }

    async fn count_by_status(&self, kind: Kind, status: Status) -> Result<u64, TrackerError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM entities WHERE kind = $1 AND status = $2")
                .bind(kind.as_str())
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn count_all(&self, kind: Kind) -> Result<u64, TrackerError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entities WHERE kind = $1")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn limit_status(&self, kind: Kind) -> Result<LimitStatus, TrackerError> {
        let spec = kind.spec();
        let row: Option<(i64,)> = sqlx::query_as("SELECT value FROM settings WHERE key = $1")
            .bind(spec.limit_key)
            .fetch_optional(&self.pool)
            .await?;
        let count = self.count_by_status(kind, spec.counting).await?;
        Ok(LimitStatus {
            count,
            limit: row.map_or(spec.default_limit, |(v,)| v as u32),
        })
    }

    async fn set_limit(&self, kind: Kind, limit: u32) -> Result<LimitStatus, TrackerError> {
        rules::validate_limit(limit)?;
        let spec = kind.spec();
        let mut tx = self.pool.begin().await?;
        lock_kind(&mut tx, spec).await?;
        write_setting(&mut tx, spec.limit_key, i64::from(limit)).await?;
        let count = counting_count(&mut tx, spec, None).await?;
        tx.commit().await?;
        Ok(LimitStatus { count, limit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::sql::Database;

    fn new_req(name: &str) -> NewEntity {
        NewEntity {
            name: name.to_string(),
            ..NewEntity::default()
        }
    }

    async fn store() -> SqlEntityStore {
        let db = Database::new_in_memory().await.unwrap();
        SqlEntityStore::new(db.pool().clone())
    }

    #[tokio::test]
    async fn test_create_and_get_roundtrip() {
        let store = store().await;
        let req = NewEntity {
            name: "  Hades ".into(),
            notes: "roguelike".into(),
            rating: Some(9),
            reason: "recommended".into(),
            ..NewEntity::default()
        };
        let created = store.create(Kind::Game, req).await.unwrap();
        assert_eq!(created.id, 1);
        assert_eq!(created.name, "Hades");
        assert!(created.started_at.is_some());

        let fetched = store.get(Kind::Game, created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = store().await;
        assert!(store.get(Kind::Game, 42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_limit_enforced() {
        let store = store().await;
        for name in ["A", "B", "C"] {
            store.create(Kind::Game, new_req(name)).await.unwrap();
        }
        let err = store.create(Kind::Game, new_req("D")).await.unwrap_err();
        assert!(matches!(err, TrackerError::LimitExceeded { limit: 3 }));
        assert_eq!(store.count_all(Kind::Game).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_case_insensitively() {
        let store = store().await;
        store.create(Kind::Game, new_req("Zelda")).await.unwrap();
        let err = store
            .create(Kind::Game, new_req(" ZELDA "))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::DuplicateName { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_allowed_outside_counting_status() {
        let store = store().await;
        store.create(Kind::Book, new_req("Dune")).await.unwrap();
        let planned = NewEntity {
            name: "Dune".into(),
            status: Some(Status::Planned),
            ..NewEntity::default()
        };
        assert!(store.create(Kind::Book, planned).await.is_ok());
    }

    #[tokio::test]
    async fn test_finish_and_reactivate_bookkeeping() {
        let store = store().await;
        let created = store.create(Kind::Game, new_req("Hades")).await.unwrap();

        let finish = EntityPatch {
            status: Some(Status::Finished),
            ..EntityPatch::default()
        };
        let finished = store.update(Kind::Game, created.id, finish).await.unwrap();
        assert!(finished.ended_at.is_some());

        let reactivate = EntityPatch {
            status: Some(Status::Active),
            ..EntityPatch::default()
        };
        let active = store
            .update(Kind::Game, created.id, reactivate)
            .await
            .unwrap();
        assert!(active.ended_at.is_none());
        assert_eq!(active.started_at, created.started_at);

        // Stored row matches what update returned, timestamps included.
        let fetched = store.get(Kind::Game, created.id).await.unwrap().unwrap();
        assert_eq!(fetched, active);
    }

    #[tokio::test]
    async fn test_reactivation_respects_limit() {
        let store = store().await;
        let a = store.create(Kind::Game, new_req("A")).await.unwrap();
        let finish = EntityPatch {
            status: Some(Status::Finished),
            ..EntityPatch::default()
        };
        store.update(Kind::Game, a.id, finish).await.unwrap();

        for name in ["B", "C", "D"] {
            store.create(Kind::Game, new_req(name)).await.unwrap();
        }

        let reactivate = EntityPatch {
            status: Some(Status::Active),
            ..EntityPatch::default()
        };
        let err = store
            .update(Kind::Game, a.id, reactivate)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::LimitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_rename_into_counting_peer_rejected() {
        let store = store().await;
        store.create(Kind::Game, new_req("Hades")).await.unwrap();
        let b = store.create(Kind::Game, new_req("Celeste")).await.unwrap();
        let rename = EntityPatch {
            name: Some(" hades".into()),
            ..EntityPatch::default()
        };
        let err = store.update(Kind::Game, b.id, rename).await.unwrap_err();
        assert!(matches!(err, TrackerError::DuplicateName { .. }));
    }

    #[tokio::test]
    async fn test_update_missing_id_is_not_found() {
        let store = store().await;
        let err = store
            .update(Kind::Game, 42, EntityPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::NotFound { id: 42 }));
    }

    #[tokio::test]
    async fn test_delete_and_id_not_reused() {
        let store = store().await;
        let a = store.create(Kind::Game, new_req("A")).await.unwrap();
        store.delete(Kind::Game, a.id).await.unwrap();
        assert!(matches!(
            store.delete(Kind::Game, a.id).await.unwrap_err(),
            TrackerError::NotFound { .. }
        ));

        let b = store.create(Kind::Game, new_req("B")).await.unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn test_kinds_number_independently() {
        let store = store().await;
        let game = store.create(Kind::Game, new_req("Hades")).await.unwrap();
        let book = store.create(Kind::Book, new_req("Dune")).await.unwrap();
        assert_eq!(game.id, 1);
        assert_eq!(book.id, 1);
    }

    #[tokio::test]
    async fn test_failed_create_rolls_back_claimed_id() {
        let store = store().await;
        store.create(Kind::Game, new_req("Zelda")).await.unwrap();
        // Duplicate fails after the id was claimed inside the transaction.
        store.create(Kind::Game, new_req("zelda")).await.unwrap_err();
        let next = store.create(Kind::Game, new_req("Hades")).await.unwrap();
        assert_eq!(next.id, 2);
    }

    #[tokio::test]
    async fn test_set_limit_persists_and_validates() {
        let store = store().await;
        assert!(store.set_limit(Kind::Book, 0).await.is_err());
        assert!(store.set_limit(Kind::Book, 21).await.is_err());

        let status = store.set_limit(Kind::Book, 2).await.unwrap();
        assert_eq!(status.limit, 2);
        assert_eq!(store.limit_status(Kind::Book).await.unwrap().limit, 2);

        store.create(Kind::Book, new_req("Dune")).await.unwrap();
        store.create(Kind::Book, new_req("Piranesi")).await.unwrap();
        let err = store
            .create(Kind::Book, new_req("Hyperion"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::LimitExceeded { limit: 2 }));
    }

    #[tokio::test]
    async fn test_list_all_newest_first() {
        let store = store().await;
        store.create(Kind::Game, new_req("A")).await.unwrap();
        store.create(Kind::Game, new_req("B")).await.unwrap();
        let all = store.list_all(Kind::Game).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].id > all[1].id);
    }

    #[tokio::test]
    async fn test_book_status_validation() {
        let store = store().await;
        let req = NewEntity {
            name: "Dune".into(),
            status: Some(Status::Casual),
            ..NewEntity::default()
        };
        assert!(matches!(
            store.create(Kind::Book, req).await.unwrap_err(),
            TrackerError::Validation(_)
        ));
    }
}
