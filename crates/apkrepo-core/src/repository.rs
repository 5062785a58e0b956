//! Repository gateway.
//!
//! Turns uploads into package files inside an architecture partition and
//! drives the engine over them. Local repositories are indexed in place;
//! remote ones are indexed in a private working directory and pushed back.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use apkrepo_schema::{Arch, FileNameError, INDEX_ARCHIVE_NAME, PackageFileName};
use bytes::Bytes;
use futures::future::try_join_all;
use tempfile::{TempDir, TempPath};
use thiserror::Error;
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use crate::context::{DEFAULT_COMMAND_TIMEOUT, OpContext};
use crate::engine::{IndexEngine, IndexSummary};
use crate::error::IndexError;
use crate::lock::LOCK_FILE_NAME;
use crate::reporter::TracingReporter;
use crate::storage::{StorageDriver, StorageError, object_key};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("unsupported file {0:?}: only .apk packages are accepted")]
    UnsupportedFile(String),

    #[error("{operation} is not supported by the {driver} driver")]
    UnsupportedInMode {
        operation: &'static str,
        driver: &'static str,
    },

    #[error("no signing key configured")]
    NoSigningKey,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<FileNameError> for RepositoryError {
    fn from(err: FileNameError) -> Self {
        match err {
            FileNameError::Empty(raw) => Self::InvalidFileName(raw),
            FileNameError::NotAPackage(name) => Self::UnsupportedFile(name),
        }
    }
}

impl RepositoryError {
    fn io(context: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            context: context.to_string(),
            source,
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug, Clone, Copy)]
pub struct RepositoryConfig {
    /// Partition used when a request names none.
    pub default_arch: Arch,
    /// Upper bound for each external program run.
    pub command_timeout: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_arch: Arch::default(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// State of the index after an upload was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    Signed,
    /// No signing key is configured.
    Unsigned,
    /// The index covers the upload but signing it failed.
    SigningFailed(String),
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub arch: Arch,
    pub packages: Vec<PackageFileName>,
    /// Records in the index, also when it was left unsigned.
    pub records: Option<usize>,
    pub index: IndexState,
}

/// A package file written for the current request.
struct SavedPackage {
    path: PathBuf,
    /// Previous file of the same name, moved aside until the index is
    /// committed.
    backup: Option<TempPath>,
}

/// Where the engine runs for one request.
enum WorkDir {
    Local(PathBuf),
    Remote { _dir: TempDir, partition: PathBuf },
}

impl WorkDir {
    fn partition(&self) -> &Path {
        match self {
            Self::Local(partition) | Self::Remote { partition, .. } => partition,
        }
    }
}

#[derive(Debug)]
pub struct Repository {
    storage: Arc<dyn StorageDriver>,
    engine: Arc<IndexEngine>,
    config: RepositoryConfig,
    /// Serializes fetch, index and push of one partition of a remote
    /// repository within this process.
    remote_locks: HashMap<Arch, tokio::sync::Mutex<()>>,
}

impl Repository {
    pub fn new(
        storage: Arc<dyn StorageDriver>,
        engine: Arc<IndexEngine>,
        config: RepositoryConfig,
    ) -> Self {
        let remote_locks = Arch::ALL
            .iter()
            .map(|arch| (*arch, tokio::sync::Mutex::new(())))
            .collect();
        Self {
            storage,
            engine,
            config,
            remote_locks,
        }
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn driver_name(&self) -> &'static str {
        self.storage.name()
    }

    pub fn engine(&self) -> &Arc<IndexEngine> {
        &self.engine
    }

    /// Partition directory of `arch` for a local repository.
    pub fn partition_path(&self, arch: Arch) -> Option<PathBuf> {
        self.storage.local_root().map(|root| root.join(arch.as_str()))
    }

    /// Store one package and index it.
    ///
    /// # Errors
    ///
    /// See [`add_packages`](Self::add_packages).
    pub async fn add_package(
        &self,
        arch: Arch,
        filename: &str,
        data: Bytes,
    ) -> RepositoryResult<UploadOutcome> {
        self.add_packages(arch, vec![(filename.to_string(), data)])
            .await
    }

    /// Store `files` in the partition of `arch` and add them to its index.
    ///
    /// Either every package ends up in the index or none of the files stay
    /// behind. A signing failure keeps the packages and is reported through
    /// [`UploadOutcome::index`].
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidFileName`] or
    /// [`RepositoryError::UnsupportedFile`] before anything is written, and
    /// [`RepositoryError::Index`] when indexing failed and the files were
    /// rolled back.
    #[instrument(skip(self, files), fields(driver = self.storage.name(), count = files.len()))]
    pub async fn add_packages(
        &self,
        arch: Arch,
        files: Vec<(String, Bytes)>,
    ) -> RepositoryResult<UploadOutcome> {
        let files = sanitize_all(files)?;

        let _remote_guard = match self.storage.local_root() {
            Some(_) => None,
            None => Some(self.remote_lock(arch).lock().await),
        };

        let workdir = self.workdir(arch).await?;
        let partition = workdir.partition().to_path_buf();

        let engine = Arc::clone(&self.engine);
        let timeout = self.config.command_timeout;
        let names: Vec<PackageFileName> = files.iter().map(|(name, _)| name.clone()).collect();
        let uploads = files.clone();
        let result = tokio::task::spawn_blocking(move || {
            store_and_index(&engine, &partition, arch, &uploads, timeout)
        })
        .await
        .map_err(|e| RepositoryError::io("index task", std::io::Error::other(e)))?;

        let (records, index) = match result {
            Ok(summary) => {
                let state = if summary.signed {
                    IndexState::Signed
                } else {
                    IndexState::Unsigned
                };
                (Some(summary.records), state)
            }
            Err(IndexError::Signing { source, records }) => {
                warn!(%arch, "packages indexed but the index is unsigned: {source}");
                (records, IndexState::SigningFailed(source.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        if let WorkDir::Remote { partition, .. } = &workdir {
            self.push(arch, partition, &files).await?;
        }

        info!(%arch, packages = names.len(), "upload indexed");
        Ok(UploadOutcome {
            arch,
            packages: names,
            records,
            index,
        })
    }

    /// Rebuild the index of `arch` from the package files present.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::UnsupportedInMode`] for remote repositories
    /// and [`RepositoryError::Index`] if the build fails.
    pub async fn rebuild_index(&self, arch: Arch) -> RepositoryResult<IndexSummary> {
        let partition = self.local_partition(arch, "rebuild")?;
        let engine = Arc::clone(&self.engine);
        let timeout = self.config.command_timeout;
        let summary = tokio::task::spawn_blocking(move || {
            let reporter = TracingReporter::new(arch.as_str());
            engine.build_index(&partition, arch, &OpContext::new(&reporter, timeout))
        })
        .await
        .map_err(|e| RepositoryError::io("rebuild task", std::io::Error::other(e)))??;
        Ok(summary)
    }

    /// Re-sign the current index of `arch` with the configured key.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NoSigningKey`] without a configured key,
    /// [`RepositoryError::UnsupportedInMode`] for remote repositories and
    /// [`RepositoryError::Index`] if signing fails.
    pub async fn sign(&self, arch: Arch) -> RepositoryResult<()> {
        let partition = self.local_partition(arch, "sign")?;
        let engine = Arc::clone(&self.engine);
        let timeout = self.config.command_timeout;
        tokio::task::spawn_blocking(move || {
            let Some(key) = engine.signing_key() else {
                return Err(RepositoryError::NoSigningKey);
            };
            let reporter = TracingReporter::new(arch.as_str());
            engine
                .sign_index(&partition, arch, key.path(), &OpContext::new(&reporter, timeout))
                .map_err(RepositoryError::from)
        })
        .await
        .map_err(|e| RepositoryError::io("sign task", std::io::Error::other(e)))?
    }

    /// Delete everything inside every architecture partition. Returns the
    /// number of files removed.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::UnsupportedInMode`] for remote repositories
    /// and [`RepositoryError::Io`] if a file cannot be removed.
    pub async fn clean_repository(&self) -> RepositoryResult<usize> {
        let Some(root) = self.storage.local_root().map(Path::to_path_buf) else {
            return Err(RepositoryError::UnsupportedInMode {
                operation: "clean",
                driver: self.storage.name(),
            });
        };
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || -> RepositoryResult<usize> {
            let mut removed = 0;
            for arch in Arch::ALL {
                let partition = root.join(arch.as_str());
                if !partition.is_dir() {
                    continue;
                }
                info!(%arch, "cleaning up repository");
                let _guard = engine.lock_partition(&partition, arch)?;
                removed += clear_dir(&partition)?;
            }
            Ok(removed)
        })
        .await
        .map_err(|e| RepositoryError::io("clean task", std::io::Error::other(e)))?
    }

    fn remote_lock(&self, arch: Arch) -> &tokio::sync::Mutex<()> {
        &self.remote_locks[&arch]
    }

    fn local_partition(&self, arch: Arch, operation: &'static str) -> RepositoryResult<PathBuf> {
        self.partition_path(arch)
            .ok_or(RepositoryError::UnsupportedInMode {
                operation,
                driver: self.storage.name(),
            })
    }

    async fn workdir(&self, arch: Arch) -> RepositoryResult<WorkDir> {
        if let Some(partition) = self.partition_path(arch) {
            tokio::fs::create_dir_all(&partition)
                .await
                .map_err(|e| RepositoryError::io(format!("create {}", partition.display()), e))?;
            return Ok(WorkDir::Local(partition));
        }

        let dir = tempfile::Builder::new()
            .prefix("apkrepo-remote-")
            .tempdir()
            .map_err(|e| RepositoryError::io("create working directory", e))?;
        let partition = dir.path().join(arch.as_str());
        tokio::fs::create_dir_all(&partition)
            .await
            .map_err(|e| RepositoryError::io(format!("create {}", partition.display()), e))?;

        match self.storage.fetch(&object_key(arch, INDEX_ARCHIVE_NAME)).await {
            Ok(index) => {
                let path = IndexEngine::index_path(&partition);
                tokio::fs::write(&path, &index)
                    .await
                    .map_err(|e| RepositoryError::io(format!("write {}", path.display()), e))?;
            }
            Err(StorageError::NotFound(_)) => {
                info!(%arch, "remote has no index yet");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(WorkDir::Remote {
            _dir: dir,
            partition,
        })
    }

    /// Upload the packages of this request and the new index.
    async fn push(
        &self,
        arch: Arch,
        partition: &Path,
        files: &[(PackageFileName, Bytes)],
    ) -> RepositoryResult<()> {
        try_join_all(files.iter().map(|(name, data)| async move {
            let key = object_key(arch, name.as_str());
            self.storage.put(&key, data.clone()).await
        }))
        .await?;

        // Packages are already remote; without the new index nothing points
        // at them and there is no delete to take them back.
        let pushed = || -> Vec<String> {
            files
                .iter()
                .map(|(name, _)| object_key(arch, name.as_str()))
                .collect()
        };

        let path = IndexEngine::index_path(partition);
        let index = match tokio::fs::read(&path).await {
            Ok(index) => index,
            Err(e) => {
                warn!(%arch, orphaned = ?pushed(), "index not pushed, packages left unindexed");
                return Err(RepositoryError::io(format!("read {}", path.display()), e));
            }
        };
        if let Err(e) = self
            .storage
            .put(&object_key(arch, INDEX_ARCHIVE_NAME), Bytes::from(index))
            .await
        {
            warn!(%arch, orphaned = ?pushed(), "index not pushed, packages left unindexed");
            return Err(e.into());
        }
        Ok(())
    }
}

/// Sanitize every name up front. A name given twice keeps its first
/// position and its last content.
fn sanitize_all(files: Vec<(String, Bytes)>) -> RepositoryResult<Vec<(PackageFileName, Bytes)>> {
    let mut sanitized: Vec<(PackageFileName, Bytes)> = Vec::with_capacity(files.len());
    for (raw, data) in files {
        let name = PackageFileName::sanitize(&raw)?;
        match sanitized.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = data,
            None => sanitized.push((name, data)),
        }
    }
    Ok(sanitized)
}

/// Save the uploads and index them while holding the partition lock, rolling
/// the files back when the index could not be updated.
fn store_and_index(
    engine: &IndexEngine,
    partition: &Path,
    arch: Arch,
    files: &[(PackageFileName, Bytes)],
    timeout: Duration,
) -> Result<IndexSummary, IndexError> {
    let reporter = TracingReporter::new(arch.as_str());
    let ctx = OpContext::new(&reporter, timeout);
    let guard = engine.lock_partition(partition, arch)?;

    let mut saved = Vec::with_capacity(files.len());
    for (name, data) in files {
        ctx.reporter
            .info(&format!("add package {name} to {arch} repository"));
        match save_package(guard.partition(), name, data) {
            Ok(package) => saved.push(package),
            Err(e) => {
                rollback(saved, &ctx);
                return Err(e);
            }
        }
    }

    let paths: Vec<PathBuf> = saved.iter().map(|p| p.path.clone()).collect();
    // Falls back to a full build when the partition has no index yet.
    let result = engine.update_held(&guard, &paths, &ctx);
    match &result {
        Err(e) if e.requires_rollback() => rollback(saved, &ctx),
        // Dropping the backups deletes the replaced files.
        _ => drop(saved),
    }
    result
}

fn save_package(
    partition: &Path,
    name: &PackageFileName,
    data: &[u8],
) -> Result<SavedPackage, IndexError> {
    let path = partition.join(name);

    let backup = if path.exists() {
        let backup = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".bak")
            .make_in(partition, |candidate| fs::rename(&path, candidate))
            .map_err(|e| IndexError::io(format!("move aside {}", path.display()), e))?;
        Some(backup.into_temp_path())
    } else {
        None
    };

    let write = || -> std::io::Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(partition)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    };

    match write() {
        Ok(()) => Ok(SavedPackage { path, backup }),
        Err(e) => {
            if let Some(backup) = backup {
                let _ = backup.persist(&path);
            }
            Err(IndexError::io(format!("save {}", path.display()), e))
        }
    }
}

/// Delete the files saved for this request and put back what they replaced.
fn rollback(saved: Vec<SavedPackage>, ctx: &OpContext<'_>) {
    for package in saved.into_iter().rev() {
        ctx.reporter
            .warning(&format!("rolling back {}", package.path.display()));
        match fs::remove_file(&package.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => ctx
                .reporter
                .error(&format!("cannot remove {}: {e}", package.path.display())),
            _ => {}
        }
        if let Some(backup) = package.backup {
            if let Err(e) = backup.persist(&package.path) {
                ctx.reporter
                    .error(&format!("cannot restore {}: {}", package.path.display(), e.error));
            }
        }
    }
}

/// Remove everything below `dir`, keeping `dir` itself and its lock file.
fn clear_dir(dir: &Path) -> RepositoryResult<usize> {
    let mut removed = 0;
    for entry in WalkDir::new(dir).min_depth(1).contents_first(true) {
        let entry = entry.map_err(|e| RepositoryError::io(format!("list {}", dir.display()), e.into()))?;
        // Other processes may be queued on this very file.
        if entry.depth() == 1 && entry.file_name() == LOCK_FILE_NAME {
            continue;
        }
        let path = entry.path();
        info!("unlink {}", path.display());
        let result = if entry.file_type().is_dir() {
            fs::remove_dir(path)
        } else {
            removed += 1;
            fs::remove_file(path)
        };
        result.map_err(|e| RepositoryError::io(format!("remove {}", path.display()), e))?;
    }
    Ok(removed)
}
