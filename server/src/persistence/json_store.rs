//! JSON-file storage backend.
//!
//! One data file per kind, each guarded by its own mutex held across the
//! whole read-modify-write-serialize cycle. Writes go to a temp file and
//! rename over the target, so the file on disk always holds either the
//! pre- or post-mutation document.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;
use crate::model::{Entity, EntityPatch, Kind, KindSpec, LimitStatus, NewEntity, Status};
use crate::persistence::traits::EntityRepository;
use crate::rules;

/// On-disk document for one kind. `next_id` and `limit` are optional so
/// files written by older layouts (or hand-edited ones) still load.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct KindFileData {
    #[serde(default)]
    pub entities: BTreeMap<i64, Entity>,
    #[serde(default)]
    pub next_id: Option<i64>,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Read and parse one kind's data file. A missing file yields `None`; an
/// unparsable file is a hard error so startup fails fast instead of
/// silently shadowing data.
pub(crate) fn read_kind_file(path: &Path) -> Result<Option<KindFileData>, TrackerError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| TrackerError::CorruptFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

#[derive(Debug)]
struct KindState {
    path: PathBuf,
    entities: BTreeMap<i64, Entity>,
    next_id: i64,
    limit: u32,
}

impl KindState {
    fn open(spec: &KindSpec, data_dir: &Path) -> Result<Self, TrackerError> {
        let path = data_dir.join(spec.data_file);
        Ok(match read_kind_file(&path)? {
            Some(data) => {
                let max_id = data.entities.keys().next_back().copied().unwrap_or(0);
                KindState {
                    path,
                    next_id: data.next_id.unwrap_or(0).max(max_id + 1),
                    limit: data.limit.unwrap_or(spec.default_limit),
                    entities: data.entities,
                }
            }
            None => KindState {
                path,
                entities: BTreeMap::new(),
                next_id: 1,
                limit: spec.default_limit,
            },
        })
    }

    fn persist(&self) -> Result<(), TrackerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let doc = KindFileData {
            entities: self.entities.clone(),
            next_id: Some(self.next_id),
            limit: Some(self.limit),
        };
        let json = serde_json::to_string_pretty(&doc)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn counting_count(&self, spec: &KindSpec, exclude: Option<i64>) -> u64 {
        self.entities
            .values()
            .filter(|e| e.status == spec.counting && Some(e.id) != exclude)
            .count() as u64
    }

    fn counting_names(&self, spec: &KindSpec, exclude: Option<i64>) -> Vec<String> {
        self.entities
            .values()
            .filter(|e| e.status == spec.counting && Some(e.id) != exclude)
            .map(|e| e.name.clone())
            .collect()
    }
}

#[derive(Debug)]
pub struct JsonEntityStore {
    games: Mutex<KindState>,
    books: Mutex<KindState>,
}

impl JsonEntityStore {
    /// Load (or initialize) the per-kind data files under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, TrackerError> {
        Ok(Self {
            games: Mutex::new(KindState::open(Kind::Game.spec(), data_dir)?),
            books: Mutex::new(KindState::open(Kind::Book.spec(), data_dir)?),
        })
    }

    fn state(&self, kind: Kind) -> &Mutex<KindState> {
        match kind {
            Kind::Game => &self.games,
            Kind::Book => &self.books,
        }
    }

    fn list_all_sync(&self, kind: Kind) -> Vec<Entity> {
        let state = self.state(kind).lock();
        let mut all: Vec<Entity> = state.entities.values().cloned().collect();
        all.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        all
    }

    fn get_sync(&self, kind: Kind, id: i64) -> Option<Entity> {
        self.state(kind).lock().entities.get(&id).cloned()
    }

    fn create_sync(&self, kind: Kind, req: &NewEntity) -> Result<Entity, TrackerError> {
        let spec = kind.spec();
        let mut state = self.state(kind).lock();
        let count = state.counting_count(spec, None);
        let names = state.counting_names(spec, None);
        let entity = rules::build_new(spec, req, state.next_id, count, state.limit, &names)?;
        let id = entity.id;
        state.entities.insert(id, entity.clone());
        state.next_id += 1;
        if let Err(e) = state.persist() {
            state.entities.remove(&id);
            state.next_id -= 1;
            return Err(e);
        }
        Ok(entity)
    }

    fn update_sync(&self, kind: Kind, id: i64, patch: &EntityPatch) -> Result<Entity, TrackerError> {
        let spec = kind.spec();
        let mut state = self.state(kind).lock();
        let current = state
            .entities
            .get(&id)
            .cloned()
            .ok_or(TrackerError::NotFound { id })?;
        let count = state.counting_count(spec, Some(id));
        let names = state.counting_names(spec, Some(id));
        let updated = rules::apply_update(spec, &current, patch, count, state.limit, &names)?;
        state.entities.insert(id, updated.clone());
        if let Err(e) = state.persist() {
            state.entities.insert(id, current);
            return Err(e);
        }
        Ok(updated)
    }

    fn delete_sync(&self, kind: Kind, id: i64) -> Result<(), TrackerError> {
        let mut state = self.state(kind).lock();
        let removed = state
            .entities
            .remove(&id)
            .ok_or(TrackerError::NotFound { id })?;
        if let Err(e) = state.persist() {
            state.entities.insert(id, removed);
            return Err(e);
        }
        Ok(())
    }

    fn count_by_status_sync(&self, kind: Kind, status: Status) -> u64 {
        self.state(kind)
            .lock()
            .entities
            .values()
            .filter(|e| e.status == status)
            .count() as u64
    }

    fn count_all_sync(&self, kind: Kind) -> u64 {
        self.state(kind).lock().entities.len() as u64
    }

    fn limit_status_sync(&self, kind: Kind) -> LimitStatus {
        let spec = kind.spec();
        let state = self.state(kind).lock();
        LimitStatus {
            count: state.counting_count(spec, None),
            limit: state.limit,
        }
    }

    fn set_limit_sync(&self, kind: Kind, limit: u32) -> Result<LimitStatus, TrackerError> {
        rules::validate_limit(limit)?;
        let spec = kind.spec();
        let mut state = self.state(kind).lock();
        let previous = state.limit;
        state.limit = limit;
        if let Err(e) = state.persist() {
            state.limit = previous;
            return Err(e);
        }
        Ok(LimitStatus {
            count: state.counting_count(spec, None),
            limit,
        })
    }
}

impl EntityRepository for JsonEntityStore {
    async fn list_all(&self, kind: Kind) -> Result<Vec<Entity>, TrackerError> {
        Ok(self.list_all_sync(kind))
    }

    async fn get(&self, kind: Kind, id: i64) -> Result<Option<Entity>, TrackerError> {
        Ok(self.get_sync(kind, id))
    }

    async fn create(&self, kind: Kind, req: NewEntity) -> Result<Entity, TrackerError> {
        self.create_sync(kind, &req)
    }

    async fn update(
        &self,
        kind: Kind,
        id: i64,
        patch: EntityPatch,
    ) -> Result<Entity, TrackerError> {
        self.update_sync(kind, id, &patch)
    }

    async fn delete(&self, kind: Kind, id: i64) -> Result<(), TrackerError> {
        self.delete_sync(kind, id)
    }

    async fn count_by_status(&self, kind: Kind, status: Status) -> Result<u64, TrackerError> {
        Ok(self.count_by_status_sync(kind, status))
    }

    async fn count_all(&self, kind: Kind) -> Result<u64, TrackerError> {
        Ok(self.count_all_sync(kind))
    }

    async fn limit_status(&self, kind: Kind) -> Result<LimitStatus, TrackerError> {
        Ok(self.limit_status_sync(kind))
    }

    async fn set_limit(&self, kind: Kind, limit: u32) -> Result<LimitStatus, TrackerError> {
        self.set_limit_sync(kind, limit)
    }
}
