use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::{multipart, Client};

use crate::StoreError;

/// A remote key/value artifact store.
///
/// Keys are relative paths (`saved_models/<run_id>/<file>`); values are
/// opaque bytes. Implementations must be safe to call sequentially from
/// the commit path and best-effort from the deletion path.
pub trait BlobStore: Send + Sync {
    /// Uploads `bytes` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// Returns `StoreError::Remote` with the failing key.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Downloads the value stored under `key`.
    ///
    /// # Errors
    /// Returns `StoreError::Remote` when the key is absent or unreachable.
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Deletes `key`. Deleting an absent key is not an error.
    ///
    /// # Errors
    /// Returns `StoreError::Remote` on transport failures.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Bearer-token HTTP blob client.
///
/// Matches the hosted store's protocol: multipart POST for uploads, GET
/// under a download base URL, POST with a `{"key": ...}` body for
/// deletion.
pub struct HttpBlobStore {
    client: Client,
    upload_url: String,
    download_url: String,
    delete_url: String,
    token: String,
}

impl HttpBlobStore {
    /// # Errors
    /// Returns `StoreError::Client` when the underlying HTTP client cannot
    /// be constructed.
    pub fn new(
        upload_url: impl Into<String>,
        download_url: impl Into<String>,
        delete_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(StoreError::Client)?;
        Ok(Self {
            client,
            upload_url: upload_url.into(),
            download_url: download_url.into(),
            delete_url: delete_url.into(),
            token: token.into(),
        })
    }

    /// Builds a store from `BLOB_READ_WRITE_TOKEN` and `BLOB_STORE_BASE_URL`.
    ///
    /// Returns `None` when either variable is unset, or when the HTTP
    /// client cannot be constructed, leaving the engine in local-only
    /// mode. A construction failure is logged before falling back.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("BLOB_READ_WRITE_TOKEN").ok()?;
        let base = std::env::var("BLOB_STORE_BASE_URL").ok()?;
        let base = base.trim_end_matches('/');
        match Self::new(
            format!("{base}/upload"),
            format!("{base}/download"),
            format!("{base}/delete"),
            token,
        ) {
            Ok(store) => Some(store),
            Err(e) => {
                log::error!("remote blob store unavailable: {e}");
                None
            }
        }
    }

    fn remote_err(key: &str, msg: impl Into<String>) -> StoreError {
        StoreError::Remote {
            key: key.to_string(),
            msg: msg.into(),
        }
    }
}

impl BlobStore for HttpBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let part = multipart::Part::bytes(bytes.to_vec()).file_name(key.to_string());
        let form = multipart::Form::new()
            .part("file", part)
            .text("key", key.to_string());

        let response = self
            .client
            .post(&self.upload_url)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .map_err(|e| Self::remote_err(key, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::remote_err(
                key,
                format!("upload failed with status {}", response.status()),
            ));
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let url = format!("{}/{key}", self.download_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .map_err(|e| Self::remote_err(key, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::remote_err(
                key,
                format!("download failed with status {}", response.status()),
            ));
        }
        let bytes = response
            .bytes()
            .map_err(|e| Self::remote_err(key, e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .post(&self.delete_url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "key": key }))
            .send()
            .map_err(|e| Self::remote_err(key, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::remote_err(
                key,
                format!("delete failed with status {}", response.status()),
            ));
        }
        Ok(())
    }
}

/// In-memory blob store for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.blobs.lock().expect("blob lock").keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.lock().expect("blob lock").contains_key(key)
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.blobs
            .lock()
            .expect("blob lock")
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .lock()
            .expect("blob lock")
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::Remote {
                key: key.to_string(),
                msg: "key not found".to_string(),
            })
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.blobs.lock().expect("blob lock").remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_store_construction_reports_errors() {
        let store = HttpBlobStore::new(
            "http://localhost/upload",
            "http://localhost/download",
            "http://localhost/delete",
            "token",
        );
        assert!(store.is_ok());
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryBlobStore::new();
        store.put("saved_models/run_x/_train_metadata.json", b"{}").unwrap();

        assert!(store.contains("saved_models/run_x/_train_metadata.json"));
        assert_eq!(store.get("saved_models/run_x/_train_metadata.json").unwrap(), b"{}");

        store.delete("saved_models/run_x/_train_metadata.json").unwrap();
        assert!(!store.contains("saved_models/run_x/_train_metadata.json"));
    }

    #[test]
    fn test_memory_store_delete_is_idempotent() {
        let store = MemoryBlobStore::new();
        assert!(store.delete("never-written").is_ok());
    }

    #[test]
    fn test_memory_store_get_missing_key_is_remote_error() {
        let store = MemoryBlobStore::new();
        assert!(matches!(
            store.get("absent"),
            Err(StoreError::Remote { .. })
        ));
    }
}
