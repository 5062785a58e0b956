//! Index maintenance engine.
//!
//! Builds, updates and signs the `APKINDEX.tar.gz` of one architecture
//! partition. Every entry point holds the partition lock for its whole
//! sequence, and a failed build or update leaves the archive on disk exactly
//! as it was.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use apkrepo_schema::{Arch, INDEX_ARCHIVE_NAME, is_package_file};
use walkdir::WalkDir;

use crate::archive;
use crate::context::OpContext;
use crate::error::{IndexError, IndexResult};
use crate::lock::{LockRegistry, PartitionGuard};
use crate::merge;
use crate::signing::SigningKey;
use crate::tool::IndexTool;

/// Result of a successful build or update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    /// Records in the index after the call.
    pub records: usize,
    /// Whether this call signed the archive.
    pub signed: bool,
}

pub struct IndexEngine {
    tool: Arc<dyn IndexTool>,
    signing_key: Option<SigningKey>,
    locks: LockRegistry,
    lock_wait: Option<Duration>,
}

impl std::fmt::Debug for IndexEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexEngine")
            .field("signing_key", &self.signing_key.as_ref().map(SigningKey::path))
            .field("lock_wait", &self.lock_wait)
            .finish_non_exhaustive()
    }
}

impl IndexEngine {
    pub fn new(tool: Arc<dyn IndexTool>) -> Self {
        Self {
            tool,
            signing_key: None,
            locks: LockRegistry::new(),
            lock_wait: None,
        }
    }

    /// Sign every archive this engine writes with `key`.
    pub fn with_signing_key(mut self, key: SigningKey) -> Self {
        self.signing_key = Some(key);
        self
    }

    /// Give up on a busy partition after `wait` instead of blocking.
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = Some(wait);
        self
    }

    pub fn signing_key(&self) -> Option<&SigningKey> {
        self.signing_key.as_ref()
    }

    /// Location of the index archive inside `partition`.
    pub fn index_path(partition: &Path) -> PathBuf {
        partition.join(INDEX_ARCHIVE_NAME)
    }

    pub fn index_exists(partition: &Path) -> bool {
        Self::index_path(partition).is_file()
    }

    /// Take the partition lock used by every engine operation.
    ///
    /// The lock also excludes other engines and processes working on the
    /// same directory.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::LockTimeout`] if a lock wait is configured and
    /// the partition stayed busy, and [`IndexError::Io`] if the lock file
    /// cannot be opened.
    pub fn lock_partition(&self, partition: &Path, arch: Arch) -> IndexResult<PartitionGuard> {
        self.locks.acquire(partition, arch, self.lock_wait)
    }

    /// Index every package file in `partition` from scratch and replace the
    /// archive.
    ///
    /// # Errors
    ///
    /// Build failures leave the previous archive in place. A
    /// [`IndexError::Signing`] error means the new archive was written but is
    /// unsigned.
    pub fn build_index(
        &self,
        partition: &Path,
        arch: Arch,
        ctx: &OpContext<'_>,
    ) -> IndexResult<IndexSummary> {
        let guard = self.lock_partition(partition, arch)?;
        self.build_held(&guard, ctx)
    }

    /// [`build_index`](Self::build_index) for a caller that already holds the
    /// partition lock.
    ///
    /// # Errors
    ///
    /// Same as [`build_index`](Self::build_index).
    pub fn build_held(
        &self,
        guard: &PartitionGuard,
        ctx: &OpContext<'_>,
    ) -> IndexResult<IndexSummary> {
        self.build_locked(guard.partition(), guard.arch(), ctx)
    }

    /// Append records for `packages` to the partition's index.
    ///
    /// Packages are indexed one by one in the given order. Without an
    /// existing archive this falls back to a full build of the partition.
    ///
    /// # Errors
    ///
    /// The first failing package aborts the update with the archive left as
    /// it was. A [`IndexError::Signing`] error means the merged archive was
    /// written but is unsigned.
    pub fn update_index(
        &self,
        partition: &Path,
        arch: Arch,
        packages: &[PathBuf],
        ctx: &OpContext<'_>,
    ) -> IndexResult<IndexSummary> {
        let guard = self.lock_partition(partition, arch)?;
        self.update_held(&guard, packages, ctx)
    }

    /// [`update_index`](Self::update_index) for a caller that already holds
    /// the partition lock, e.g. while it saves the package files.
    ///
    /// # Errors
    ///
    /// Same as [`update_index`](Self::update_index).
    pub fn update_held(
        &self,
        guard: &PartitionGuard,
        packages: &[PathBuf],
        ctx: &OpContext<'_>,
    ) -> IndexResult<IndexSummary> {
        let (partition, arch) = (guard.partition(), guard.arch());
        let path = Self::index_path(partition);
        if !path.is_file() {
            ctx.reporter
                .info(&format!("no index in {}, building one", partition.display()));
            return self.build_locked(partition, arch, ctx);
        }

        ctx.reporter.section(&format!(
            "Updating {arch} index with {} package(s)",
            packages.len()
        ));
        let existing = archive::extract_text(&path)?;
        if packages.is_empty() {
            return Ok(IndexSummary {
                records: merge::count_records(&existing),
                signed: false,
            });
        }

        let merged = merge::accumulate(&existing, packages, arch, self.tool.as_ref(), ctx)?;
        self.commit(&path, &merged, ctx)
    }

    /// Sign the partition's current archive in place with `private_key`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Io`] if there is no archive to sign and
    /// [`IndexError::Signing`] if signing fails.
    pub fn sign_index(
        &self,
        partition: &Path,
        arch: Arch,
        private_key: &Path,
        ctx: &OpContext<'_>,
    ) -> IndexResult<()> {
        let _guard = self.lock_partition(partition, arch)?;

        let path = Self::index_path(partition);
        if !path.is_file() {
            return Err(IndexError::io(
                format!("sign {}", path.display()),
                std::io::Error::new(std::io::ErrorKind::NotFound, "no index archive"),
            ));
        }

        ctx.reporter.section(&format!("Signing {arch} index"));
        self.tool.sign(&path, private_key, ctx)?;
        Ok(())
    }

    fn build_locked(
        &self,
        partition: &Path,
        arch: Arch,
        ctx: &OpContext<'_>,
    ) -> IndexResult<IndexSummary> {
        fs::create_dir_all(partition)
            .map_err(|e| IndexError::io(format!("create {}", partition.display()), e))?;

        let packages = list_packages(partition)?;
        ctx.reporter.section(&format!(
            "Building {arch} index from {} package(s)",
            packages.len()
        ));

        let text = merge::build_from_scratch(&packages, arch, self.tool.as_ref(), ctx)?;
        self.commit(&Self::index_path(partition), &text, ctx)
    }

    /// Replace the archive with `text` and sign it when a key is configured.
    fn commit(&self, path: &Path, text: &str, ctx: &OpContext<'_>) -> IndexResult<IndexSummary> {
        archive::write_text(path, text)?;
        let records = merge::count_records(text);
        ctx.reporter
            .info(&format!("wrote {} ({records} records)", path.display()));

        let Some(key) = &self.signing_key else {
            return Ok(IndexSummary {
                records,
                signed: false,
            });
        };

        if let Err(source) = self.tool.sign(path, key.path(), ctx) {
            ctx.reporter.error(&format!("index left unsigned: {source}"));
            return Err(IndexError::Signing {
                source,
                records: Some(records),
            });
        }
        ctx.reporter.info("index signed");
        Ok(IndexSummary {
            records,
            signed: true,
        })
    }
}

/// Package files directly inside `partition`, sorted by name.
fn list_packages(partition: &Path) -> IndexResult<Vec<PathBuf>> {
    let mut packages = Vec::new();
    for entry in WalkDir::new(partition)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            IndexError::io(format!("list {}", partition.display()), e.into())
        })?;
        if entry.file_type().is_file() && entry.file_name().to_str().is_some_and(is_package_file)
        {
            packages.push(entry.into_path());
        }
    }
    Ok(packages)
}
