//! Object storage for uploaded documents.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::Signer;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("object `{0}` not found")]
    Missing(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// How a browser should present a downloaded object.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    #[default]
    Inline,
    Attachment,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Inline => "inline",
            Disposition::Attachment => "attachment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredObject {
    pub url: String,
    pub key: String,
}

/// Object storage port. The workflows only ever handle opaque keys.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Write `bytes` under `key`, replacing any previous object.
    async fn put(&self, bytes: Bytes, key: &str, content_type: &str) -> Result<StoredObject, StorageError>;

    /// Remove an object. Removing a missing object is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Time-limited read link.
    fn presigned_get_url(
        &self,
        key: &str,
        ttl: Duration,
        disposition: Disposition,
        now: DateTime<Utc>,
    ) -> Result<String, StorageError>;

    /// Read an object back, checking a link produced by
    /// [`ObjectStorage::presigned_get_url`].
    async fn get_signed(&self, key: &str, link: &SignedLink, now: DateTime<Utc>) -> Result<Bytes, StorageError>;
}

/// Query parameters carried by a presigned link.
#[derive(Debug, Clone, Deserialize)]
pub struct SignedLink {
    pub expires: i64,
    #[serde(default)]
    pub disposition: Disposition,
    pub signature: String,
}

/// Content type inferred from a key extension.
pub fn content_type_of(key: &str) -> &'static str {
    match key.rsplit('.').next().map(|ext| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "pdf" => "application/pdf",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Files on local disk, served back through signed `/files/{key}` links.
pub struct LocalStorage {
    root: PathBuf,
    public_url: String,
    signer: Signer,
}

impl LocalStorage {
    /// Create a new [`LocalStorage`].
    pub fn new(root: impl Into<PathBuf>, public_url: &str, signer: Signer) -> Self {
        Self {
            root: root.into(),
            public_url: public_url.trim_end_matches('/').to_owned(),
            signer,
        }
    }

    /// Resolve a key under the root, refusing anything escaping it.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let clean = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !clean {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }

        Ok(self.root.join(relative))
    }

    fn payload(key: &str, expires: i64, disposition: Disposition) -> String {
        format!("{key}\n{expires}\n{}", disposition.as_str())
    }

    fn public_link(&self, key: &str) -> String {
        format!("{}/files/{}", self.public_url, key)
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put(&self, bytes: Bytes, key: &str, content_type: &str) -> Result<StoredObject, StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;

        tracing::debug!(key, content_type, size = bytes.len(), "object stored");

        Ok(StoredObject {
            url: self.public_link(key),
            key: key.to_owned(),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(key, "object removed");
                Ok(())
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn presigned_get_url(
        &self,
        key: &str,
        ttl: Duration,
        disposition: Disposition,
        now: DateTime<Utc>,
    ) -> Result<String, StorageError> {
        self.resolve(key)?;
        let expires = now.timestamp() + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let signature = self.signer.sign(&Self::payload(key, expires, disposition));

        Ok(format!(
            "{}?expires={}&disposition={}&signature={}",
            self.public_link(key),
            expires,
            disposition.as_str(),
            signature
        ))
    }

    async fn get_signed(&self, key: &str, link: &SignedLink, now: DateTime<Utc>) -> Result<Bytes, StorageError> {
        let path = self.resolve(key)?;
        let valid = link.expires > now.timestamp()
            && self
                .signer
                .verify(&Self::payload(key, link.expires, link.disposition), &link.signature);
        if !valid {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::Missing(key.to_owned()))
            },
            Err(err) => Err(err.into()),
        }
    }
}
