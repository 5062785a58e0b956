//! Index maintenance for Alpine package repositories.
//!
//! The [`engine`] keeps each architecture's `APKINDEX.tar.gz` consistent with
//! the package files next to it; the [`repository`] gateway feeds it uploads
//! from a local or remote [`storage`] driver.

pub mod archive;
pub mod context;
pub mod engine;
pub mod error;
pub mod lock;
pub mod merge;
pub mod reporter;
pub mod repository;
pub mod signing;
pub mod storage;
pub mod tool;

pub use context::{DEFAULT_COMMAND_TIMEOUT, OpContext};
pub use engine::{IndexEngine, IndexSummary};
pub use error::{IndexError, IndexResult, SigningError, ToolFailure};
pub use reporter::{MemoryReporter, NullReporter, Reporter, TracingReporter};
pub use repository::{
    IndexState, Repository, RepositoryConfig, RepositoryError, RepositoryResult, UploadOutcome,
};
pub use signing::SigningKey;
pub use storage::{LocalStorage, RemoteStorage, StorageDriver, StorageError};
pub use tool::{ApkTool, IndexTool};

/// User Agent string for requests to remote repositories
pub const USER_AGENT: &str = concat!("apkrepo/", env!("CARGO_PKG_VERSION"));
