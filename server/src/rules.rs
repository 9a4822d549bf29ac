//! Business rules shared by both storage backends.
//!
//! Everything here is a pure function over in-memory values. The backends
//! call these inside their own critical section (the per-kind mutex for the
//! JSON store, the settings-row-locked transaction for the relational
//! store), so a check and the write it guards are always atomic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::TrackerError;
use crate::model::{self, Entity, EntityPatch, KindSpec, NewEntity, Status};

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_RATING: u8 = 10;
pub const MIN_LIMIT: u32 = 1;
pub const MAX_LIMIT: u32 = 20;

/// Trim the name and enforce the 1..=100 character bound.
pub fn normalize_name(raw: &str) -> Result<String, TrackerError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(TrackerError::Validation("name must not be empty".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(TrackerError::Validation(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

pub fn validate_rating(rating: Option<u8>) -> Result<(), TrackerError> {
    match rating {
        Some(r) if r > MAX_RATING => Err(TrackerError::Validation(format!(
            "rating must be between 0 and {MAX_RATING}"
        ))),
        _ => Ok(()),
    }
}

pub fn validate_limit(limit: u32) -> Result<(), TrackerError> {
    if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
        return Err(TrackerError::Validation(format!(
            "limit must be between {MIN_LIMIT} and {MAX_LIMIT}"
        )));
    }
    Ok(())
}

fn ensure_allowed(spec: &KindSpec, status: Status) -> Result<(), TrackerError> {
    if spec.allowed.contains(&status) {
        return Ok(());
    }
    Err(TrackerError::Validation(format!(
        "status '{}' is not valid for a {}",
        status.as_str(),
        spec.kind.as_str()
    )))
}

/// Case-insensitive comparison of trimmed names.
pub fn names_collide(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

pub fn check_capacity(limit: u32, counting_count: u64) -> Result<(), TrackerError> {
    if counting_count >= u64::from(limit) {
        return Err(TrackerError::LimitExceeded { limit });
    }
    Ok(())
}

/// `peers` are the names of entities currently in the counting status,
/// excluding the entity being checked.
pub fn check_unique(name: &str, peers: &[String]) -> Result<(), TrackerError> {
    if peers.iter().any(|p| names_collide(p, name)) {
        return Err(TrackerError::DuplicateName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Resolve the status a new entity is created in. Defaults to the counting
/// status; terminal statuses cannot be requested at creation.
pub fn creation_status(spec: &KindSpec, requested: Option<Status>) -> Result<Status, TrackerError> {
    let status = requested.unwrap_or(spec.counting);
    ensure_allowed(spec, status)?;
    if status.is_terminal() {
        return Err(TrackerError::Validation(format!(
            "cannot create an item in the '{}' status",
            status.as_str()
        )));
    }
    Ok(status)
}

/// Build a fully validated new entity. `counting_count`, `limit` and
/// `peer_names` must be read inside the backend's current critical section.
pub fn build_new(
    spec: &KindSpec,
    req: &NewEntity,
    id: i64,
    counting_count: u64,
    limit: u32,
    peer_names: &[String],
) -> Result<Entity, TrackerError> {
    let name = normalize_name(&req.name)?;
    validate_rating(req.rating)?;
    let status = creation_status(spec, req.status)?;
    if status == spec.counting {
        check_capacity(limit, counting_count)?;
        check_unique(&name, peer_names)?;
    }
    let now = model::now();
    Ok(Entity {
        id,
        name,
        status,
        notes: req.notes.clone(),
        rating: req.rating,
        reason: req.reason.clone(),
        created_at: now,
        started_at: (status == spec.counting).then_some(now),
        ended_at: None,
    })
}

/// Apply a partial update, revalidating the invariants the patch touches.
/// `counting_count` and `peer_names` must exclude the entity itself.
pub fn apply_update(
    spec: &KindSpec,
    current: &Entity,
    patch: &EntityPatch,
    counting_count: u64,
    limit: u32,
    peer_names: &[String],
) -> Result<Entity, TrackerError> {
    let mut updated = current.clone();

    if let Some(raw) = &patch.name {
        updated.name = normalize_name(raw)?;
    }
    if let Some(rating) = patch.rating {
        validate_rating(Some(rating))?;
        updated.rating = Some(rating);
    }
    if let Some(notes) = &patch.notes {
        updated.notes = notes.clone();
    }
    if let Some(reason) = &patch.reason {
        updated.reason = reason.clone();
    }

    let new_status = match patch.status {
        Some(status) => {
            ensure_allowed(spec, status)?;
            status
        }
        None => current.status,
    };

    let entering_counting = new_status == spec.counting && current.status != spec.counting;
    if entering_counting {
        check_capacity(limit, counting_count)?;
        check_unique(&updated.name, peer_names)?;
    } else if new_status == spec.counting && patch.name.is_some() {
        // Rename while counting still has to stay unique.
        check_unique(&updated.name, peer_names)?;
    }

    if patch.status.is_some() {
        transition(spec, &mut updated, new_status, model::now());
    }
    Ok(updated)
}

/// Timestamp bookkeeping for a status change. `entity.status` still holds
/// the pre-transition status when this is called.
fn transition(spec: &KindSpec, entity: &mut Entity, new_status: Status, now: DateTime<Utc>) {
    if new_status == spec.counting {
        if entity.started_at.is_none() {
            entity.started_at = Some(now);
        }
        entity.ended_at = None;
    } else if new_status.is_terminal() {
        if entity.status != new_status {
            entity.ended_at = Some(now);
        }
    } else if entity.status.is_terminal() {
        entity.ended_at = None;
    }
    entity.status = new_status;
}

/// Group entities by status for list responses. Group order follows the
/// kind's allowed-status order; terminal groups sort by end time, the rest
/// by creation time, newest first.
pub fn group_by_status(spec: &KindSpec, entities: Vec<Entity>) -> BTreeMap<Status, Vec<Entity>> {
    let mut groups: BTreeMap<Status, Vec<Entity>> =
        spec.allowed.iter().map(|s| (*s, Vec::new())).collect();
    for entity in entities {
        groups.entry(entity.status).or_default().push(entity);
    }
    for (status, group) in &mut groups {
        if status.is_terminal() {
            group.sort_by(|a, b| {
                (b.ended_at.unwrap_or(b.created_at), b.id)
                    .cmp(&(a.ended_at.unwrap_or(a.created_at), a.id))
            });
        } else {
            group.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Kind;

    fn new_req(name: &str) -> NewEntity {
        NewEntity {
            name: name.to_string(),
            ..NewEntity::default()
        }
    }

    fn active_entity(id: i64, name: &str) -> Entity {
        build_new(Kind::Game.spec(), &new_req(name), id, 0, 3, &[]).unwrap()
    }

    #[test]
    fn test_name_is_trimmed() {
        assert_eq!(normalize_name("  Hades  ").unwrap(), "Hades");
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(
            normalize_name("   "),
            Err(TrackerError::Validation(_))
        ));
    }

    #[test]
    fn test_name_length_bound() {
        let ok = "x".repeat(100);
        let too_long = "x".repeat(101);
        assert!(normalize_name(&ok).is_ok());
        assert!(normalize_name(&too_long).is_err());
    }

    #[test]
    fn test_rating_bounds() {
        assert!(validate_rating(None).is_ok());
        assert!(validate_rating(Some(0)).is_ok());
        assert!(validate_rating(Some(10)).is_ok());
        assert!(validate_rating(Some(11)).is_err());
    }

    #[test]
    fn test_limit_bounds() {
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(1).is_ok());
        assert!(validate_limit(20).is_ok());
        assert!(validate_limit(21).is_err());
    }

    #[test]
    fn test_create_defaults_to_counting_status() {
        let entity = active_entity(1, "Hades");
        assert_eq!(entity.status, Status::Active);
        assert!(entity.started_at.is_some());
        assert!(entity.ended_at.is_none());
    }

    #[test]
    fn test_create_planned_skips_capacity_and_start() {
        let spec = Kind::Game.spec();
        let req = NewEntity {
            name: "Backlog item".into(),
            status: Some(Status::Planned),
            ..NewEntity::default()
        };
        // At capacity and colliding with a counting peer, yet still fine.
        let entity = build_new(spec, &req, 1, 3, 3, &["backlog item".into()]).unwrap();
        assert_eq!(entity.status, Status::Planned);
        assert!(entity.started_at.is_none());
    }

    #[test]
    fn test_create_terminal_rejected() {
        let spec = Kind::Game.spec();
        let req = NewEntity {
            name: "Done already".into(),
            status: Some(Status::Finished),
            ..NewEntity::default()
        };
        assert!(matches!(
            build_new(spec, &req, 1, 0, 3, &[]),
            Err(TrackerError::Validation(_))
        ));
    }

    #[test]
    fn test_book_rejects_game_only_status() {
        let spec = Kind::Book.spec();
        let req = NewEntity {
            name: "Dune".into(),
            status: Some(Status::Casual),
            ..NewEntity::default()
        };
        assert!(matches!(
            build_new(spec, &req, 1, 0, 5, &[]),
            Err(TrackerError::Validation(_))
        ));
    }

    #[test]
    fn test_create_over_limit_rejected() {
        let spec = Kind::Game.spec();
        assert!(matches!(
            build_new(spec, &new_req("Hades"), 4, 3, 3, &[]),
            Err(TrackerError::LimitExceeded { limit: 3 })
        ));
    }

    #[test]
    fn test_duplicate_is_case_insensitive_and_trimmed() {
        let spec = Kind::Game.spec();
        let peers = vec!["Zelda".to_string()];
        assert!(matches!(
            build_new(spec, &new_req("  zelda "), 2, 1, 3, &peers),
            Err(TrackerError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_finish_stamps_ended_at() {
        let spec = Kind::Game.spec();
        let entity = active_entity(1, "Hades");
        let patch = EntityPatch {
            status: Some(Status::Finished),
            ..EntityPatch::default()
        };
        let updated = apply_update(spec, &entity, &patch, 0, 3, &[]).unwrap();
        assert_eq!(updated.status, Status::Finished);
        assert!(updated.ended_at.is_some());
        assert_eq!(updated.started_at, entity.started_at);
    }

    #[test]
    fn test_reactivation_clears_ended_at_and_revalidates() {
        let spec = Kind::Game.spec();
        let mut finished = active_entity(1, "Hades");
        finished.status = Status::Finished;
        finished.ended_at = Some(model::now());

        let patch = EntityPatch {
            status: Some(Status::Active),
            ..EntityPatch::default()
        };

        // Over the limit: reactivation is refused.
        assert!(matches!(
            apply_update(spec, &finished, &patch, 3, 3, &[]),
            Err(TrackerError::LimitExceeded { .. })
        ));

        // Name now taken by a counting peer: also refused.
        let peers = vec!["HADES".to_string()];
        assert!(matches!(
            apply_update(spec, &finished, &patch, 0, 3, &peers),
            Err(TrackerError::DuplicateName { .. })
        ));

        let updated = apply_update(spec, &finished, &patch, 0, 3, &[]).unwrap();
        assert_eq!(updated.status, Status::Active);
        assert!(updated.ended_at.is_none());
        assert_eq!(updated.started_at, finished.started_at);
    }

    #[test]
    fn test_started_at_stamped_once() {
        let spec = Kind::Game.spec();
        let req = NewEntity {
            name: "Backlog item".into(),
            status: Some(Status::Planned),
            ..NewEntity::default()
        };
        let planned = build_new(spec, &req, 1, 0, 3, &[]).unwrap();
        assert!(planned.started_at.is_none());

        let patch = EntityPatch {
            status: Some(Status::Active),
            ..EntityPatch::default()
        };
        let activated = apply_update(spec, &planned, &patch, 0, 3, &[]).unwrap();
        let first_start = activated.started_at;
        assert!(first_start.is_some());

        let paused = apply_update(
            spec,
            &activated,
            &EntityPatch {
                status: Some(Status::Paused),
                ..EntityPatch::default()
            },
            0,
            3,
            &[],
        )
        .unwrap();
        let reactivated = apply_update(spec, &paused, &patch, 0, 3, &[]).unwrap();
        assert_eq!(reactivated.started_at, first_start);
    }

    #[test]
    fn test_terminal_to_non_counting_clears_ended_at() {
        let spec = Kind::Game.spec();
        let mut finished = active_entity(1, "Hades");
        finished.status = Status::Finished;
        finished.ended_at = Some(model::now());

        let patch = EntityPatch {
            status: Some(Status::Paused),
            ..EntityPatch::default()
        };
        let updated = apply_update(spec, &finished, &patch, 3, 3, &[]).unwrap();
        assert_eq!(updated.status, Status::Paused);
        assert!(updated.ended_at.is_none());
    }

    #[test]
    fn test_switching_terminal_states_restamps_ended_at() {
        let spec = Kind::Game.spec();
        let mut finished = active_entity(1, "Hades");
        finished.status = Status::Finished;
        let old_end = model::now() - chrono::Duration::seconds(60);
        finished.ended_at = Some(old_end);

        let patch = EntityPatch {
            status: Some(Status::Dropped),
            ..EntityPatch::default()
        };
        let updated = apply_update(spec, &finished, &patch, 0, 3, &[]).unwrap();
        assert_eq!(updated.status, Status::Dropped);
        assert!(updated.ended_at.unwrap() > old_end);
    }

    #[test]
    fn test_same_status_patch_keeps_ended_at() {
        let spec = Kind::Game.spec();
        let mut finished = active_entity(1, "Hades");
        finished.status = Status::Finished;
        let end = model::now();
        finished.ended_at = Some(end);

        let patch = EntityPatch {
            status: Some(Status::Finished),
            notes: Some("loved it".into()),
            ..EntityPatch::default()
        };
        let updated = apply_update(spec, &finished, &patch, 0, 3, &[]).unwrap();
        assert_eq!(updated.ended_at, Some(end));
        assert_eq!(updated.notes, "loved it");
    }

    #[test]
    fn test_rename_while_counting_checks_peers() {
        let spec = Kind::Game.spec();
        let entity = active_entity(1, "Hades");
        let peers = vec!["Celeste".to_string()];
        let patch = EntityPatch {
            name: Some("celeste ".into()),
            ..EntityPatch::default()
        };
        assert!(matches!(
            apply_update(spec, &entity, &patch, 1, 3, &peers),
            Err(TrackerError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_rename_while_planned_ignores_peers() {
        let spec = Kind::Game.spec();
        let req = NewEntity {
            name: "Backlog item".into(),
            status: Some(Status::Planned),
            ..NewEntity::default()
        };
        let planned = build_new(spec, &req, 1, 0, 3, &[]).unwrap();
        let patch = EntityPatch {
            name: Some("Celeste".into()),
            ..EntityPatch::default()
        };
        let peers = vec!["Celeste".to_string()];
        assert!(apply_update(spec, &planned, &patch, 1, 3, &peers).is_ok());
    }

    #[test]
    fn test_partial_patch_leaves_other_fields() {
        let spec = Kind::Game.spec();
        let mut entity = active_entity(1, "Hades");
        entity.notes = "roguelike".into();
        let patch = EntityPatch {
            rating: Some(9),
            ..EntityPatch::default()
        };
        let updated = apply_update(spec, &entity, &patch, 0, 3, &[]).unwrap();
        assert_eq!(updated.rating, Some(9));
        assert_eq!(updated.notes, "roguelike");
        assert_eq!(updated.name, "Hades");
        assert_eq!(updated.status, Status::Active);
    }

    #[test]
    fn test_grouping_orders_and_sorts() {
        let spec = Kind::Game.spec();
        let mut a = active_entity(1, "A");
        let mut b = active_entity(2, "B");
        b.created_at = a.created_at + chrono::Duration::seconds(10);
        let mut done = active_entity(3, "C");
        done.status = Status::Finished;
        done.ended_at = Some(model::now());
        a.status = Status::Active;

        let groups = group_by_status(spec, vec![a.clone(), b.clone(), done.clone()]);
        assert_eq!(groups.len(), spec.allowed.len());
        let active = &groups[&Status::Active];
        assert_eq!(active.len(), 2);
        // Newest first.
        assert_eq!(active[0].id, 2);
        assert_eq!(groups[&Status::Finished].len(), 1);
        assert!(groups[&Status::Planned].is_empty());
    }
}
