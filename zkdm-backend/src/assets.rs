//! Asset Store Gateway.
//!
//! Content storage for commitments, proof bundles, reference strings and
//! notebooks, addressed by `(bucket, path)`. Writes are idempotent
//! overwrites. [`AssetStore::exists`] answers from a listing of the parent
//! prefix and reports `false` whenever that listing fails, so an unreachable
//! store never makes a bundle look complete.

use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use sled::Db;
use tracing::{debug, warn};
use zkdm_common::assets::{is_valid_path, split_path};

use crate::error::StorageError;

const REMOTE_LIST_LIMIT: usize = 1000;
const REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AssetStore {
    backend: Arc<AssetBackend>,
}

enum AssetBackend {
    InMemory(Mutex<BTreeMap<String, Vec<u8>>>),
    Persistent(Db),
    Remote(RemoteStorage),
}

fn object_key(bucket: &str, path: &str) -> String {
    format!("{bucket}/{path}")
}

fn check_path(bucket: &str, path: &str) -> Result<(), StorageError> {
    if bucket.is_empty() || bucket.contains('/') || !is_valid_path(path) {
        return Err(StorageError::InvalidPath(object_key(bucket, path)));
    }
    Ok(())
}

/// Keeps only the entries directly under `prefix` and strips the prefix.
fn direct_children<'a>(prefix: &str, keys: impl Iterator<Item = &'a str>) -> Vec<String> {
    keys.filter_map(|key| key.strip_prefix(prefix))
        .filter(|name| !name.is_empty() && !name.contains('/'))
        .map(str::to_string)
        .collect()
}

fn list_prefix(bucket: &str, prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{bucket}/")
    } else {
        format!("{bucket}/{prefix}/")
    }
}

impl AssetStore {
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(AssetBackend::InMemory(Mutex::new(BTreeMap::new()))),
        }
    }

    pub fn persistent(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    StorageError::Backend(format!(
                        "failed to create directory for asset db at {}: {err}",
                        path_ref.display()
                    ))
                })?;
            }
        }
        let db = sled::open(path_ref).map_err(|err| {
            StorageError::Backend(format!(
                "failed to open asset db at {}: {err}",
                path_ref.display()
            ))
        })?;
        Ok(Self {
            backend: Arc::new(AssetBackend::Persistent(db)),
        })
    }

    pub fn remote(base_url: impl Into<String>, service_key: Option<String>) -> Result<Self, StorageError> {
        Ok(Self {
            backend: Arc::new(AssetBackend::Remote(RemoteStorage::new(
                base_url.into(),
                service_key,
            )?)),
        })
    }

    /// Stores `bytes` at `(bucket, path)`, replacing any previous object.
    pub async fn put(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        check_path(bucket, path)?;
        let size = bytes.len();
        match &*self.backend {
            AssetBackend::InMemory(objects) => {
                objects
                    .lock()
                    .expect("asset store poisoned")
                    .insert(object_key(bucket, path), bytes);
            }
            AssetBackend::Persistent(db) => {
                db.insert(object_key(bucket, path).as_bytes(), bytes)?;
                db.flush_async().await?;
            }
            AssetBackend::Remote(remote) => remote.upload(bucket, path, bytes).await?,
        }
        debug!(bucket, path, size, "stored asset");
        Ok(())
    }

    pub async fn get(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StorageError> {
        check_path(bucket, path)?;
        let found = match &*self.backend {
            AssetBackend::InMemory(objects) => {
                let guard = objects.lock().expect("asset store poisoned");
                let value = guard.get(&object_key(bucket, path)).cloned();
                value
            }
            AssetBackend::Persistent(db) => db
                .get(object_key(bucket, path).as_bytes())?
                .map(|value| value.to_vec()),
            AssetBackend::Remote(remote) => remote.download(bucket, path).await?,
        };
        found.ok_or_else(|| StorageError::NotFound(object_key(bucket, path)))
    }

    /// Names of the objects directly under `prefix`.
    pub async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let full_prefix = list_prefix(bucket, prefix);
        match &*self.backend {
            AssetBackend::InMemory(objects) => {
                let guard = objects.lock().expect("asset store poisoned");
                let keys = guard
                    .range(full_prefix.clone()..)
                    .map(|(key, _)| key.as_str())
                    .take_while(|key| key.starts_with(&full_prefix));
                Ok(direct_children(&full_prefix, keys))
            }
            AssetBackend::Persistent(db) => {
                let mut keys = Vec::new();
                for entry in db.scan_prefix(full_prefix.as_bytes()) {
                    let (key, _) = entry?;
                    let key = String::from_utf8(key.to_vec())
                        .map_err(|err| StorageError::Corrupt(err.to_string()))?;
                    keys.push(key);
                }
                Ok(direct_children(&full_prefix, keys.iter().map(String::as_str)))
            }
            AssetBackend::Remote(remote) => remote.list(bucket, prefix.trim_matches('/')).await,
        }
    }

    /// Whether `(bucket, path)` is present, answered from a listing of the
    /// parent prefix. Any failure reads as absent.
    pub async fn exists(&self, bucket: &str, path: &str) -> bool {
        if check_path(bucket, path).is_err() {
            return false;
        }
        let (parent, name) = split_path(path);
        match self.list(bucket, parent).await {
            Ok(names) => names.iter().any(|entry| entry == name),
            Err(err) => {
                warn!(bucket, path, error = %err, "asset listing failed; treating asset as missing");
                false
            }
        }
    }
}

/// Object-storage REST client
/// (`{base}/storage/v1/object/{bucket}/{path}`).
struct RemoteStorage {
    client: reqwest::Client,
    base_url: String,
    service_key: Option<String>,
}

#[derive(Serialize)]
struct ListRequest<'a> {
    prefix: &'a str,
    limit: usize,
}

#[derive(Deserialize)]
struct ListEntry {
    name: String,
}

impl RemoteStorage {
    fn new(base_url: String, service_key: Option<String>) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .build()
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.service_key {
            Some(key) => request.bearer_auth(key).header("apikey", key),
            None => request,
        }
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{bucket}/{path}", self.base_url)
    }

    async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let response = self
            .authorize(self.client.post(self.object_url(bucket, path)))
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StorageError::Backend(format!(
                "upload of {bucket}/{path} returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let response = self
            .authorize(self.client.get(self.object_url(bucket, path)))
            .send()
            .await
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::BAD_REQUEST {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(StorageError::Backend(format!(
                "download of {bucket}/{path} returned {status}"
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        Ok(Some(bytes.to_vec()))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let url = format!("{}/storage/v1/object/list/{bucket}", self.base_url);
        let response = self
            .authorize(self.client.post(url))
            .json(&ListRequest {
                prefix,
                limit: REMOTE_LIST_LIMIT,
            })
            .send()
            .await
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StorageError::Backend(format!(
                "listing {bucket}/{prefix} returned {}",
                response.status()
            )));
        }
        let entries: Vec<ListEntry> = response
            .json()
            .await
            .map_err(|err| StorageError::Corrupt(err.to_string()))?;
        Ok(entries.into_iter().map(|entry| entry.name).collect())
    }
}
