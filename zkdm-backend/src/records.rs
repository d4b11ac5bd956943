//! Dataset and request records.
//!
//! Requests are only ever changed through [`RecordStore::compare_and_swap_request`],
//! which bumps `version` and refuses the write when the stored record has
//! moved on since it was read.

use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    sync::{Arc, RwLock},
};

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use sled::{Db, Tree};
use uuid::Uuid;
use zkdm_common::{DatasetRecord, RequestRecord};

use crate::error::StorageError;

const DATASETS_TREE: &str = "datasets";
const REQUESTS_TREE: &str = "requests";

#[derive(Clone)]
pub struct RecordStore {
    backend: Arc<RecordBackend>,
}

enum RecordBackend {
    InMemory(RwLock<MemoryRecords>),
    Persistent { _db: Db, datasets: Tree, requests: Tree },
}

#[derive(Default)]
struct MemoryRecords {
    datasets: BTreeMap<Uuid, DatasetRecord>,
    requests: BTreeMap<Uuid, RequestRecord>,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|err| StorageError::Corrupt(err.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(bytes).map_err(|err| StorageError::Corrupt(err.to_string()))
}

fn scan<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>, StorageError> {
    tree.iter()
        .values()
        .map(|value| decode(&value?))
        .collect()
}

impl RecordStore {
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(RecordBackend::InMemory(RwLock::new(MemoryRecords::default()))),
        }
    }

    pub fn persistent(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    StorageError::Backend(format!(
                        "failed to create directory for record db at {}: {err}",
                        path_ref.display()
                    ))
                })?;
            }
        }
        let db = sled::open(path_ref).map_err(|err| {
            StorageError::Backend(format!(
                "failed to open record db at {}: {err}",
                path_ref.display()
            ))
        })?;
        let datasets = db.open_tree(DATASETS_TREE)?;
        let requests = db.open_tree(REQUESTS_TREE)?;
        Ok(Self {
            backend: Arc::new(RecordBackend::Persistent {
                _db: db,
                datasets,
                requests,
            }),
        })
    }

    pub fn insert_dataset(&self, record: DatasetRecord) -> Result<(), StorageError> {
        match &*self.backend {
            RecordBackend::InMemory(records) => {
                records
                    .write()
                    .expect("record store poisoned")
                    .datasets
                    .insert(record.id, record);
            }
            RecordBackend::Persistent { datasets, .. } => {
                datasets.insert(record.id.as_bytes(), encode(&record)?)?;
            }
        }
        Ok(())
    }

    pub fn dataset(&self, id: &Uuid) -> Result<Option<DatasetRecord>, StorageError> {
        match &*self.backend {
            RecordBackend::InMemory(records) => Ok(records
                .read()
                .expect("record store poisoned")
                .datasets
                .get(id)
                .cloned()),
            RecordBackend::Persistent { datasets, .. } => datasets
                .get(id.as_bytes())?
                .map(|bytes| decode(&bytes))
                .transpose(),
        }
    }

    pub fn datasets(&self) -> Result<Vec<DatasetRecord>, StorageError> {
        let mut all: Vec<DatasetRecord> = match &*self.backend {
            RecordBackend::InMemory(records) => records
                .read()
                .expect("record store poisoned")
                .datasets
                .values()
                .cloned()
                .collect(),
            RecordBackend::Persistent { datasets, .. } => scan(datasets)?,
        };
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    /// Inserts a new request. Fails if the id is already taken.
    pub fn insert_request(&self, record: RequestRecord) -> Result<(), StorageError> {
        match &*self.backend {
            RecordBackend::InMemory(records) => {
                let mut guard = records.write().expect("record store poisoned");
                if guard.requests.contains_key(&record.id) {
                    return Err(StorageError::Backend(format!(
                        "request {} already exists",
                        record.id
                    )));
                }
                guard.requests.insert(record.id, record);
            }
            RecordBackend::Persistent { requests, .. } => {
                let swapped = requests.compare_and_swap(
                    record.id.as_bytes(),
                    None as Option<&[u8]>,
                    Some(encode(&record)?),
                )?;
                if swapped.is_err() {
                    return Err(StorageError::Backend(format!(
                        "request {} already exists",
                        record.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn request(&self, id: &Uuid) -> Result<Option<RequestRecord>, StorageError> {
        match &*self.backend {
            RecordBackend::InMemory(records) => Ok(records
                .read()
                .expect("record store poisoned")
                .requests
                .get(id)
                .cloned()),
            RecordBackend::Persistent { requests, .. } => requests
                .get(id.as_bytes())?
                .map(|bytes| decode(&bytes))
                .transpose(),
        }
    }

    /// Requests against `dataset_id`, optionally only those by `user_id`,
    /// oldest first.
    pub fn requests_for_dataset(
        &self,
        dataset_id: &Uuid,
        user_id: Option<&str>,
    ) -> Result<Vec<RequestRecord>, StorageError> {
        let all: Vec<RequestRecord> = match &*self.backend {
            RecordBackend::InMemory(records) => records
                .read()
                .expect("record store poisoned")
                .requests
                .values()
                .cloned()
                .collect(),
            RecordBackend::Persistent { requests, .. } => scan(requests)?,
        };
        let mut matching: Vec<_> = all
            .into_iter()
            .filter(|request| request.dataset_id == *dataset_id)
            .filter(|request| user_id.map_or(true, |user| request.user_id == user))
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    /// Replaces `expected` with `updated` if the stored record still carries
    /// `expected.version`. Returns the stored record on success and `None`
    /// when another writer got there first.
    pub fn compare_and_swap_request(
        &self,
        expected: &RequestRecord,
        mut updated: RequestRecord,
    ) -> Result<Option<RequestRecord>, StorageError> {
        updated.id = expected.id;
        updated.version = expected.version + 1;
        updated.updated_at = Utc::now();

        match &*self.backend {
            RecordBackend::InMemory(records) => {
                let mut guard = records.write().expect("record store poisoned");
                let current = guard
                    .requests
                    .get_mut(&expected.id)
                    .ok_or_else(|| StorageError::NotFound(format!("request {}", expected.id)))?;
                if current.version != expected.version {
                    return Ok(None);
                }
                *current = updated.clone();
                Ok(Some(updated))
            }
            RecordBackend::Persistent { requests, .. } => {
                let key = expected.id.as_bytes();
                let current_bytes = requests
                    .get(key)?
                    .ok_or_else(|| StorageError::NotFound(format!("request {}", expected.id)))?;
                let current: RequestRecord = decode(&current_bytes)?;
                if current.version != expected.version {
                    return Ok(None);
                }
                let swapped =
                    requests.compare_and_swap(key, Some(current_bytes), Some(encode(&updated)?))?;
                Ok(swapped.ok().map(|()| updated))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkdm_common::{AgreedComputation, ComputationKind};

    fn dataset(owner: &str) -> DatasetRecord {
        let now = Utc::now();
        DatasetRecord {
            id: Uuid::new_v4(),
            title: "heights".into(),
            description: String::new(),
            owner_id: owner.into(),
            schema: None,
            rows: Some(3),
            columns: Some(2),
            created_at: now,
            updated_at: now,
        }
    }

    fn request(dataset_id: Uuid, user: &str) -> RequestRecord {
        let now = Utc::now();
        RequestRecord {
            id: Uuid::new_v4(),
            title: "sum".into(),
            description: String::new(),
            user_id: user.into(),
            dataset_id,
            code: "def f(s, x): return x".into(),
            computation: AgreedComputation::new(ComputationKind::Sum, vec!["x".into()]),
            result: None,
            is_accepted: false,
            is_completed: false,
            result_approved: false,
            created_at: now,
            updated_at: now,
            username: None,
            srs_id: None,
            version: 0,
        }
    }

    fn exercise(store: RecordStore) {
        let data = dataset("owner");
        store.insert_dataset(data.clone()).unwrap();
        assert_eq!(store.dataset(&data.id).unwrap(), Some(data.clone()));
        assert_eq!(store.datasets().unwrap().len(), 1);

        let first = request(data.id, "alice");
        let second = request(data.id, "bob");
        store.insert_request(first.clone()).unwrap();
        store.insert_request(second.clone()).unwrap();
        assert!(store.insert_request(first.clone()).is_err());
        assert_eq!(store.requests_for_dataset(&data.id, None).unwrap().len(), 2);
        assert_eq!(
            store.requests_for_dataset(&data.id, Some("bob")).unwrap(),
            vec![second]
        );

        let mut accepted = first.clone();
        accepted.is_accepted = true;
        let stored = store
            .compare_and_swap_request(&first, accepted.clone())
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, 1);
        assert!(store.request(&first.id).unwrap().unwrap().is_accepted);

        // A writer holding the stale version loses.
        assert!(store
            .compare_and_swap_request(&first, accepted)
            .unwrap()
            .is_none());
        assert_eq!(store.request(&first.id).unwrap().unwrap().version, 1);
    }

    #[test]
    fn in_memory_records() {
        exercise(RecordStore::in_memory());
    }

    #[test]
    fn sled_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        let data = dataset("owner");
        {
            let store = RecordStore::persistent(&path).unwrap();
            store.insert_dataset(data.clone()).unwrap();
        }
        let store = RecordStore::persistent(&path).unwrap();
        assert_eq!(store.dataset(&data.id).unwrap(), Some(data));
    }

    #[test]
    fn sled_records() {
        let dir = tempfile::tempdir().unwrap();
        exercise(RecordStore::persistent(dir.path().join("records.db")).unwrap());
    }
}
