//! Subcommand implementations

pub mod build;
pub mod serve;
pub mod show;
pub mod sign;
pub mod update;

use std::path::PathBuf;

use anyhow::{Context, Result};
use apkrepo_core::SigningKey;

/// Load an optional key file given on the command line.
pub(crate) fn signing_key(path: Option<PathBuf>) -> Result<Option<SigningKey>> {
    path.map(|path| {
        SigningKey::from_file(&path)
            .with_context(|| format!("Failed to load private key {}", path.display()))
    })
    .transpose()
}

/// Describe how an engine call ended for terminal output.
pub(crate) fn describe(summary: apkrepo_core::IndexSummary) -> String {
    let signed = if summary.signed { "signed" } else { "unsigned" };
    format!("{} records, {signed}", summary.records)
}
