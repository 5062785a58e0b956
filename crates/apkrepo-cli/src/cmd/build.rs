//! Build command

use std::path::PathBuf;

use anyhow::{Context, Result};
use apkrepo_core::{OpContext, TracingReporter};

use crate::{PartitionArgs, ToolArgs};

/// Rebuild the index of one partition from scratch
pub async fn build(
    partition: &PartitionArgs,
    priv_key_file: Option<PathBuf>,
    tools: &ToolArgs,
) -> Result<()> {
    let engine = tools.engine(super::signing_key(priv_key_file)?);
    let path = partition.partition();
    let arch = partition.arch;
    let timeout = tools.timeout();

    let summary = tokio::task::spawn_blocking(move || {
        let reporter = TracingReporter::new(arch.as_str());
        engine
            .build_index(&path, arch, &OpContext::new(&reporter, timeout))
            .with_context(|| format!("Failed to build index in {}", path.display()))
    })
    .await??;

    println!("{arch}: {}", super::describe(summary));
    Ok(())
}
