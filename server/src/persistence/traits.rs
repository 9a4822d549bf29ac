use std::future::Future;

use crate::error::TrackerError;
use crate::model::{Entity, EntityPatch, Kind, LimitStatus, NewEntity, Status};

/// Uniform storage interface implemented by both backends.
///
/// Mutating operations enforce the business invariants (limit cap,
/// duplicate names, timestamp bookkeeping) atomically: a failed check
/// leaves the store unchanged.
pub trait EntityRepository: Send + Sync {
    /// All entities of one kind, newest first.
    fn list_all(&self, kind: Kind)
        -> impl Future<Output = Result<Vec<Entity>, TrackerError>> + Send;

    fn get(
        &self,
        kind: Kind,
        id: i64,
    ) -> impl Future<Output = Result<Option<Entity>, TrackerError>> + Send;

    /// Create an entity with a freshly assigned id. Ids are never reused,
    /// even after deletions.
    fn create(
        &self,
        kind: Kind,
        req: NewEntity,
    ) -> impl Future<Output = Result<Entity, TrackerError>> + Send;

    /// Apply a partial update, revalidating invariants the patch touches.
    fn update(
        &self,
        kind: Kind,
        id: i64,
        patch: EntityPatch,
    ) -> impl Future<Output = Result<Entity, TrackerError>> + Send;

    fn delete(&self, kind: Kind, id: i64)
        -> impl Future<Output = Result<(), TrackerError>> + Send;

    fn count_by_status(
        &self,
        kind: Kind,
        status: Status,
    ) -> impl Future<Output = Result<u64, TrackerError>> + Send;

    fn count_all(&self, kind: Kind) -> impl Future<Output = Result<u64, TrackerError>> + Send;

    /// Current counting-status tally together with the configured limit.
    fn limit_status(
        &self,
        kind: Kind,
    ) -> impl Future<Output = Result<LimitStatus, TrackerError>> + Send;

    /// Update the kind's limit. Lowering it below the current count is
    /// allowed and only constrains future creations and reactivations.
    fn set_limit(
        &self,
        kind: Kind,
        limit: u32,
    ) -> impl Future<Output = Result<LimitStatus, TrackerError>> + Send;
}
