//! Shared vocabulary for the apkrepo workspace: supported architectures,
//! well-known repository file names and sanitized package filenames.

pub mod arch;
pub mod filename;

// Re-exports
pub use arch::*;
pub use filename::{FileNameError, PackageFileName, is_package_file};

/// File name of the index archive inside every architecture partition.
pub const INDEX_ARCHIVE_NAME: &str = "APKINDEX.tar.gz";

/// Name of the single text member inside the index archive.
pub const INDEX_MEMBER_NAME: &str = "APKINDEX";

/// Extension (without the dot) of the package files the repository accepts.
pub const PACKAGE_EXTENSION: &str = "apk";
