//! InstanceStore - durable instance catalog with remote fallback
//!
//! Every known instance lives in an in-memory map and, once persisted, in a
//! backing file `<config_dir>/instance-<uuid>.conf` holding the JSON record.
//!
//! ## Lookup Flow
//!
//! ```text
//! get(id) → valid id? → in map? ──yes──→ copy
//!                          │
//!                          no
//!                          ↓
//!            GET <instances-link>/<id> → 200 → add(persist) → copy
//! ```
//!
//! ## Locking
//!
//! One readers-writer lock guards the map. It is held across the file and
//! network I/O of each operation, which keeps the map and the file set equal
//! at every point another caller can observe.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, trace, warn};

use super::{InstanceRecord, valid_id};
use crate::control_plane::{ControlPlaneClient, INSTANCES_LINK};
use crate::error::{InstanceError, InstanceResult};

const FILE_PREFIX: &str = "instance-";
const FILE_EXTENSION: &str = "conf";

/// Durable, concurrency-safe catalog of instance records
pub struct InstanceStore {
    /// Directory holding the backing files
    config_dir: PathBuf,

    /// Control-plane used to resolve instances missing locally
    api: ControlPlaneClient,

    /// Records keyed by UUID
    instances: RwLock<HashMap<String, InstanceRecord>>,
}

impl InstanceStore {
    pub fn new(config_dir: impl Into<PathBuf>, api: ControlPlaneClient) -> Self {
        Self {
            config_dir: config_dir.into(),
            api,
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Path of the backing file for an instance
    pub fn file_path(&self, id: &str) -> PathBuf {
        self.config_dir
            .join(format!("{FILE_PREFIX}{id}.{FILE_EXTENSION}"))
    }

    /// Load every backing file in the config directory
    ///
    /// Stops at the first malformed file name, invalid id, unreadable or
    /// undecodable file, or duplicate id. On failure nothing is loaded.
    /// Callers should treat an error here as fatal.
    #[instrument(skip(self), fields(dir = %self.config_dir.display()))]
    pub async fn init(&self) -> InstanceResult<()> {
        let files = self.backing_files().await?;

        let mut instances = self.instances.write().await;

        // staged so a failing file leaves the registry as it was
        let mut loaded = HashMap::new();
        for file in files {
            debug!("reading {}", file.display());

            let id = id_from_file_name(&file)?;

            let data = tokio::fs::read(&file)
                .await
                .map_err(|e| InstanceError::io(&file, e))?;

            let record: InstanceRecord = serde_json::from_slice(&data).map_err(|e| {
                InstanceError::json(format!("could not decode {}", file.display()), e)
            })?;

            // a record already loaded from another file is reported as duplicate
            if record.uuid != id && !loaded.contains_key(&record.uuid) {
                warn!(
                    "{} holds instance {}, expected {id}",
                    file.display(),
                    record.uuid
                );
                return Err(InstanceError::InvalidFileName(file));
            }

            if instances.contains_key(&record.uuid) {
                return Err(InstanceError::Duplicate(record.uuid));
            }

            self.add_locked(&mut loaded, record, false).await?;
            info!("loaded {}", file.display());
        }

        instances.extend(loaded);
        Ok(())
    }

    /// Add a record, writing its backing file first when `persist` is set
    ///
    /// On a write failure neither the file nor the map entry is left behind.
    #[instrument(skip(self, record), fields(uuid = %record.uuid))]
    pub async fn add(&self, record: InstanceRecord, persist: bool) -> InstanceResult<()> {
        let mut instances = self.instances.write().await;
        self.add_locked(&mut instances, record, persist).await
    }

    /// Get a copy of a record, fetching and caching it from the control-plane
    /// if it is not known locally
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> InstanceResult<InstanceRecord> {
        if !valid_id(id) {
            return Err(InstanceError::InvalidId(id.to_string()));
        }

        if let Some(record) = self.instances.read().await.get(id) {
            return Ok(record.clone());
        }

        let mut instances = self.instances.write().await;

        // another caller may have fetched it while we waited for the write lock
        if !instances.contains_key(id) {
            let record = self.fetch_remote(id).await?;
            self.add_locked(&mut instances, record, true)
                .await
                .map_err(|e| InstanceError::Remote {
                    url: self.api.instance_url(id).unwrap_or_default(),
                    message: format!("failed to add new instance: {e}"),
                })?;
        }

        instances
            .get(id)
            .cloned()
            .ok_or_else(|| InstanceError::UnknownInstance(id.to_string()))
    }

    /// Copy of a locally known record, never asking the control-plane
    pub async fn peek(&self, id: &str) -> Option<InstanceRecord> {
        self.instances.read().await.get(id).cloned()
    }

    /// Delete the backing file and then the map entry
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> InstanceResult<()> {
        if !valid_id(id) {
            return Err(InstanceError::InvalidId(id.to_string()));
        }

        let mut instances = self.instances.write().await;

        if !instances.contains_key(id) {
            return Err(InstanceError::UnknownInstance(id.to_string()));
        }

        let file = self.file_path(id);
        info!("removing {}", file.display());
        tokio::fs::remove_file(&file)
            .await
            .map_err(|e| InstanceError::io(&file, e))?;

        instances.remove(id);
        info!("removed {id}");
        Ok(())
    }

    /// Snapshot of every known record, in no particular order
    pub async fn list(&self) -> Vec<InstanceRecord> {
        self.instances.read().await.values().cloned().collect()
    }

    /// Ids of every known record, in no particular order
    pub async fn ids(&self) -> Vec<String> {
        self.instances.read().await.keys().cloned().collect()
    }

    async fn add_locked(
        &self,
        instances: &mut HashMap<String, InstanceRecord>,
        record: InstanceRecord,
        persist: bool,
    ) -> InstanceResult<()> {
        trace!("add {} (persist: {persist})", record.uuid);

        if !valid_id(&record.uuid) {
            return Err(InstanceError::InvalidId(record.uuid));
        }

        if instances.contains_key(&record.uuid) {
            return Err(InstanceError::Duplicate(record.uuid));
        }

        if persist {
            self.write_file(&record).await?;
            info!("added {}", record.uuid);
        }

        instances.insert(record.uuid.clone(), record);
        Ok(())
    }

    /// Write the record through a synced temp file and rename it into place
    ///
    /// A failed write leaves no partial backing file, and a crash right after
    /// an add leaves either no file or the complete one.
    async fn write_file(&self, record: &InstanceRecord) -> InstanceResult<()> {
        let data = serde_json::to_vec(record).map_err(|e| {
            InstanceError::json(format!("could not encode instance {}", record.uuid), e)
        })?;

        tokio::fs::create_dir_all(&self.config_dir)
            .await
            .map_err(|e| InstanceError::io(&self.config_dir, e))?;

        let file = self.file_path(&record.uuid);
        let temp = file.with_extension(format!("{FILE_EXTENSION}.tmp"));

        if let Err(e) = write_synced(&temp, &data).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(InstanceError::io(&temp, e));
        }

        if let Err(e) = tokio::fs::rename(&temp, &file).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(InstanceError::io(&file, e));
        }

        sync_dir(&self.config_dir).await;
        Ok(())
    }

    async fn fetch_remote(&self, id: &str) -> InstanceResult<InstanceRecord> {
        let Some(link) = self.api.entry_link(INSTANCES_LINK) else {
            warn!("no '{INSTANCES_LINK}' API link");
            return Err(InstanceError::UnknownInstance(id.to_string()));
        };
        let url = format!("{link}/{id}");

        info!("GET {url}");
        let (status, data) = self.api.get(&url).await?;

        // the control-plane cannot resolve it either
        if status != StatusCode::OK {
            warn!("GET {url} returned {status}, expected 200");
            return Err(InstanceError::UnknownInstance(id.to_string()));
        }

        if data.is_empty() {
            return Err(InstanceError::Remote {
                url,
                message: "no data returned".to_string(),
            });
        }

        let record: InstanceRecord = serde_json::from_slice(&data).map_err(|e| {
            InstanceError::json(format!("failed to decode instance data from {url}"), e)
        })?;

        if record.uuid != id {
            return Err(InstanceError::Remote {
                url,
                message: format!("returned instance {} instead of {id}", record.uuid),
            });
        }

        Ok(record)
    }

    /// Backing files in the config directory, sorted by name
    async fn backing_files(&self) -> InstanceResult<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.config_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("config dir does not exist yet");
                return Ok(vec![]);
            }
            Err(e) => return Err(InstanceError::io(&self.config_dir, e)),
        };

        let mut files = vec![];
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| InstanceError::io(&self.config_dir, e))?
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if name.starts_with(FILE_PREFIX) && name.ends_with(&format!(".{FILE_EXTENSION}")) {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }
}

/// Write `data` to a new file and flush it to disk
async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

/// Flush directory entries so a completed rename survives a crash
///
/// The record is already in place when this runs, so failures are only logged.
#[cfg(unix)]
async fn sync_dir(dir: &Path) {
    let result = match tokio::fs::File::open(dir).await {
        Ok(handle) => handle.sync_all().await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!("failed to sync {}: {e}", dir.display());
    }
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) {}

/// Recover the instance id from `instance-<uuid>.conf`
fn id_from_file_name(file: &Path) -> InstanceResult<String> {
    let invalid = || InstanceError::InvalidFileName(file.to_path_buf());

    let stem = file
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_suffix(&format!(".{FILE_EXTENSION}")))
        .ok_or_else(invalid)?;

    let parts: Vec<&str> = stem.split('-').collect();
    let [_, id] = parts.as_slice() else {
        return Err(invalid());
    };

    if !valid_id(id) {
        return Err(InstanceError::InvalidId(id.to_string()));
    }

    Ok(id.to_string())
}
