use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use fl_core::{RoundRecord, TrainMetadata, WeightSnapshot};

use crate::weights::encode_snapshot;
use crate::{BlobStore, StoreError};

const GLOBAL_MODEL_FILE: &str = "global_model_manual.pt";
const METADATA_FILE: &str = "_train_metadata.json";
const DIVERGENCE_FILE: &str = "_divergence_metrics.json";
const REMOTE_PREFIX: &str = "saved_models";

/// Client count assumed when a run's metadata cannot be read during
/// deletion. Only used to enumerate candidate keys to delete.
const FALLBACK_NUM_CLIENTS: usize = 5;

/// Mints a fresh timestamp-derived run identifier.
pub fn mint_run_id() -> String {
    Local::now().format("run_%Y%m%d_%H%M%S").to_string()
}

/// Outcome of a run deletion. Deletion never propagates an error to the
/// caller; failures are folded into the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteStatus {
    Deleted,
    Error(String),
}

fn client_model_file(client_id: usize) -> String {
    format!("client_{client_id}_model.pt")
}

/// Versioned persistence for run artifacts.
///
/// Every file is written under the local root (run-scoped subdirectory
/// when a run id is present) and mirrored to the optional remote store
/// under the same relative key. Remote unavailability never fails a
/// local commit.
pub struct RunStore {
    root: PathBuf,
    remote: Option<Arc<dyn BlobStore>>,
}

impl RunStore {
    /// Creates a local-only store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            remote: None,
        }
    }

    /// Creates a store that mirrors every artifact to `remote`.
    pub fn with_remote(root: impl Into<PathBuf>, remote: Arc<dyn BlobStore>) -> Self {
        Self {
            root: root.into(),
            remote: Some(remote),
        }
    }

    fn run_dir(&self, run_id: Option<&str>) -> PathBuf {
        match run_id {
            Some(id) => self.root.join(id),
            None => self.root.clone(),
        }
    }

    fn remote_key(run_id: Option<&str>, file: &str) -> String {
        match run_id {
            Some(id) => format!("{REMOTE_PREFIX}/{id}/{file}"),
            None => format!("{REMOTE_PREFIX}/{file}"),
        }
    }

    fn io_err(path: &Path, source: io::Error) -> StoreError {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Writes a file locally, then mirrors it. A remote failure is logged
    /// per key and swallowed; the local copy is authoritative.
    fn write_and_mirror(&self, path: &Path, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        fs::write(path, bytes).map_err(|e| Self::io_err(path, e))?;
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.put(key, bytes) {
                log::warn!("failed to mirror {key} to the remote store: {e}");
            }
        }
        Ok(())
    }

    /// Commits a completed run: global weights, each retained client
    /// model, the metadata document, and the divergence history.
    ///
    /// `client_models` has one slot per client; `None` marks a client
    /// that never trained and therefore has no model file. Client files
    /// are numbered by the true 1-based client id.
    ///
    /// # Errors
    /// Returns `StoreError` on local write or encoding failures. Remote
    /// mirroring failures are logged, not returned.
    pub fn commit(
        &self,
        run_id: Option<&str>,
        global: &WeightSnapshot,
        client_models: &[Option<WeightSnapshot>],
        num_rounds: usize,
        history: &[RoundRecord],
    ) -> Result<(), StoreError> {
        let dir = self.run_dir(run_id);
        fs::create_dir_all(&dir).map_err(|e| Self::io_err(&dir, e))?;

        let global_bytes = encode_snapshot(global)?;
        let global_path = dir.join(GLOBAL_MODEL_FILE);
        self.write_and_mirror(
            &global_path,
            &Self::remote_key(run_id, GLOBAL_MODEL_FILE),
            &global_bytes,
        )?;
        log::info!("saved final global model to {}", global_path.display());

        for (idx, model) in client_models.iter().enumerate() {
            let Some(model) = model else { continue };
            let file = client_model_file(idx + 1);
            let bytes = encode_snapshot(model)?;
            self.write_and_mirror(&dir.join(&file), &Self::remote_key(run_id, &file), &bytes)?;
            log::info!("saved client {} model", idx + 1);
        }

        let metadata = TrainMetadata {
            num_clients: client_models.len(),
            num_rounds,
            last_training_time: Local::now().to_rfc3339(),
            run_id: run_id.map(str::to_string),
        };
        let metadata_bytes = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| StoreError::Malformed {
                path: METADATA_FILE.to_string(),
                source: e,
            })?;
        self.write_and_mirror(
            &dir.join(METADATA_FILE),
            &Self::remote_key(run_id, METADATA_FILE),
            &metadata_bytes,
        )?;

        let history_bytes = serde_json::to_vec_pretty(history)
            .map_err(|e| StoreError::Malformed {
                path: DIVERGENCE_FILE.to_string(),
                source: e,
            })?;
        self.write_and_mirror(
            &dir.join(DIVERGENCE_FILE),
            &Self::remote_key(run_id, DIVERGENCE_FILE),
            &history_bytes,
        )?;
        log::info!("saved divergence metrics to {}", dir.join(DIVERGENCE_FILE).display());

        Ok(())
    }

    /// True when the run's local directory exists and holds at least one
    /// entry. A cheap existence probe, not an artifact validation.
    pub fn is_ready(&self, run_id: &str) -> bool {
        let dir = self.run_dir(Some(run_id));
        match fs::read_dir(&dir) {
            Ok(mut entries) => entries.next().is_some(),
            Err(_) => false,
        }
    }

    /// Ensures `path` exists locally, fetching and caching it from the
    /// remote store when missing.
    fn fetch_if_needed(&self, path: &Path, key: &str) -> Result<(), StoreError> {
        if path.exists() {
            return Ok(());
        }
        let remote = self.remote.as_ref().ok_or(StoreError::NoRemote)?;
        log::info!("file {} not found locally, downloading {key}", path.display());
        let bytes = remote.get(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Self::io_err(parent, e))?;
        }
        fs::write(path, bytes).map_err(|e| Self::io_err(path, e))
    }

    /// Loads the run's metadata document, local-first.
    ///
    /// # Errors
    /// Returns `StoreError::Malformed` for unreadable JSON and propagates
    /// fetch failures.
    pub fn load_metadata(&self, run_id: Option<&str>) -> Result<TrainMetadata, StoreError> {
        let path = self.run_dir(run_id).join(METADATA_FILE);
        self.fetch_if_needed(&path, &Self::remote_key(run_id, METADATA_FILE))?;
        let bytes = fs::read(&path).map_err(|e| Self::io_err(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Malformed {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Loads the run's divergence history, local-first.
    ///
    /// # Errors
    /// Same taxonomy as [`RunStore::load_metadata`].
    pub fn load_divergence(&self, run_id: Option<&str>) -> Result<Vec<RoundRecord>, StoreError> {
        let path = self.run_dir(run_id).join(DIVERGENCE_FILE);
        self.fetch_if_needed(&path, &Self::remote_key(run_id, DIVERGENCE_FILE))?;
        let bytes = fs::read(&path).map_err(|e| Self::io_err(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Malformed {
            path: path.display().to_string(),
            source: e,
        })
    }

    fn lookup_num_clients(&self, run_id: &str) -> usize {
        match self.load_metadata(Some(run_id)) {
            Ok(metadata) => metadata.num_clients,
            Err(e) => {
                log::warn!(
                    "could not fetch metadata for run {run_id}: {e}; \
                     assuming {FALLBACK_NUM_CLIENTS} clients for deletion"
                );
                FALLBACK_NUM_CLIENTS
            }
        }
    }

    /// Removes every artifact of `run_id`, locally and remotely.
    ///
    /// Remote keys are deleted best-effort with per-key warnings; a
    /// missing file anywhere counts as success. Never panics or returns
    /// an error; failures are reported through the status.
    pub fn delete_run(&self, run_id: &str) -> DeleteStatus {
        let num_clients = self.lookup_num_clients(run_id);

        if let Some(remote) = &self.remote {
            let mut files = vec![
                GLOBAL_MODEL_FILE.to_string(),
                METADATA_FILE.to_string(),
                DIVERGENCE_FILE.to_string(),
            ];
            files.extend((1..=num_clients).map(client_model_file));

            for file in &files {
                let key = Self::remote_key(Some(run_id), file);
                if let Err(e) = remote.delete(&key) {
                    log::warn!("failed to delete remote key {key}: {e}");
                }
            }
        }

        let dir = self.run_dir(Some(run_id));
        if dir.exists() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                return DeleteStatus::Error(format!(
                    "failed to delete local folder {}: {e}",
                    dir.display()
                ));
            }
        }
        log::info!("deleted run {run_id}");
        DeleteStatus::Deleted
    }
}
