//! Video object storage: a local directory in development, GCS in production.
//!
//! Objects are addressed by a relative storage location such as
//! `videos/user_12/2025-06-01/1748736000000_9f3c2a1b.mp4`. Platforms fetch
//! videos by URL, so every object also has a read URL: `/media/{location}` on
//! this API for local storage, or a short-lived signed GCS URL.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use google_cloud_storage::client::Storage;
use rand::Rng;
use thiserror::Error;

use crate::config::StorageConfig;
use crate::constants::SIGNED_URL_EXPIRY_SECS;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("gcs error: {0}")]
    Gcs(String),
    #[error("invalid storage path: {0}")]
    InvalidPath(String),
    #[error("local media is not served when storing in GCS")]
    NotLocal,
}

/// Resolves a storage location into a URL a platform can download from.
#[async_trait]
pub trait VideoUrls: Send + Sync {
    async fn read_url(&self, storage_location: &str) -> Result<String, StorageError>;
}

#[derive(Clone)]
enum Backend {
    Local(PathBuf),
    Gcs(Storage),
}

#[derive(Clone)]
pub struct VideoStorage {
    backend: Backend,
    bucket: String,
    public_base_url: String,
}

impl VideoStorage {
    /// Local directory when `LOCAL_STORAGE_PATH` is set, otherwise GCS
    /// (credentials from `GOOGLE_APPLICATION_CREDENTIALS`).
    pub async fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let backend = match &config.local_path {
            Some(path) => {
                tokio::fs::create_dir_all(path).await?;
                Backend::Local(path.clone())
            }
            None => Backend::Gcs(
                Storage::builder()
                    .build()
                    .await
                    .map_err(|e| StorageError::Gcs(e.to_string()))?,
            ),
        };

        Ok(Self {
            backend,
            bucket: config.bucket.clone(),
            public_base_url: config.public_base_url.clone(),
        })
    }

    pub fn local(root: PathBuf, public_base_url: &str) -> Self {
        Self {
            backend: Backend::Local(root),
            bucket: String::new(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.backend, Backend::Local(_))
    }

    pub async fn put(&self, location: &str, data: Bytes) -> Result<(), StorageError> {
        match &self.backend {
            Backend::Local(root) => {
                let full_path = root.join(relative_path(location)?);
                if let Some(parent) = full_path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&full_path, &data).await?;
            }
            Backend::Gcs(gcs) => {
                let bucket = format!("projects/_/buckets/{}", self.bucket);
                gcs.write_object(&bucket, location, data)
                    .send_buffered()
                    .await
                    .map_err(|e| StorageError::Gcs(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Read a locally stored object (backs `GET /media/{*path}`).
    /// Returns `Ok(None)` when the file does not exist.
    pub async fn read_local(&self, location: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let Backend::Local(root) = &self.backend else {
            return Err(StorageError::NotLocal);
        };
        let full_path = root.join(relative_path(location)?);
        match tokio::fs::read(&full_path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl VideoUrls for VideoStorage {
    async fn read_url(&self, storage_location: &str) -> Result<String, StorageError> {
        match &self.backend {
            Backend::Local(_) => {
                relative_path(storage_location)?;
                Ok(format!("{}/media/{}", self.public_base_url, storage_location))
            }
            Backend::Gcs(_) => {
                // Signed URLs come from the cloud-storage crate
                let client = cloud_storage::Client::default();
                let object = client
                    .object()
                    .read(&self.bucket, storage_location)
                    .await
                    .map_err(|e| StorageError::Gcs(e.to_string()))?;
                object
                    .download_url(SIGNED_URL_EXPIRY_SECS)
                    .map_err(|e| StorageError::Gcs(e.to_string()))
            }
        }
    }
}

/// Only plain relative paths; no `..`, no absolute paths, no prefixes.
fn relative_path(location: &str) -> Result<&Path, StorageError> {
    let path = Path::new(location);
    let plain = !location.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if plain {
        Ok(path)
    } else {
        Err(StorageError::InvalidPath(location.to_string()))
    }
}

pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "video/x-matroska" => "mkv",
        "video/x-msvideo" => "avi",
        "video/mpeg" => "mpeg",
        _ => "bin",
    }
}

pub fn content_type_for(location: &str) -> &'static str {
    match Path::new(location).extension().and_then(|e| e.to_str()) {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("mpeg") => "video/mpeg",
        _ => "application/octet-stream",
    }
}

/// Path: videos/user_123/2025-12-06/1733500000000_0a1b2c3d.mp4
pub fn video_location(user_id: i64, now: DateTime<Utc>, content_type: &str) -> String {
    let suffix: [u8; 4] = rand::rng().random();
    format!(
        "videos/user_{}/{}/{}_{}.{}",
        user_id,
        now.format("%Y-%m-%d"),
        now.timestamp_millis(),
        hex::encode(suffix),
        extension_for(content_type)
    )
}
