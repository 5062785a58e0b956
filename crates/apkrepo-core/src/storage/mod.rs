//! Storage drivers.
//!
//! A driver is where package files and index archives live between
//! requests. The engine itself only works on local directories; the gateway
//! uses the driver to move files in and out of that working directory.

mod local;
mod remote;

pub use local::LocalStorage;
pub use remote::RemoteStorage;

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote rejected {key} with status {status}")]
    Remote { key: String, status: u16 },
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Backing store for a repository. Keys are `/`-separated relative paths
/// such as `x86_64/APKINDEX.tar.gz`.
#[async_trait]
pub trait StorageDriver: Send + Sync + std::fmt::Debug {
    /// Short name used in logs and the health endpoint.
    fn name(&self) -> &'static str;

    /// Read the whole object at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if there is no such object.
    async fn fetch(&self, key: &str) -> StorageResult<Bytes>;

    /// Store `data` at `key`, replacing any previous object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object could not be written.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Root directory when the repository lives on this host, so the engine
    /// can work on it in place.
    fn local_root(&self) -> Option<&Path> {
        None
    }
}

/// Build the key of `name` inside the partition of `arch`.
pub fn object_key(arch: apkrepo_schema::Arch, name: &str) -> String {
    format!("{arch}/{name}")
}
