//! Sign command

use std::path::Path;

use anyhow::{Context, Result};
use apkrepo_core::{OpContext, TracingReporter};

use crate::{PartitionArgs, ToolArgs};

/// Sign the current index of one partition in place
pub async fn sign(partition: &PartitionArgs, priv_key_file: &Path, tools: &ToolArgs) -> Result<()> {
    let engine = tools.engine(None);
    let path = partition.partition();
    let key = priv_key_file.to_path_buf();
    let arch = partition.arch;
    let timeout = tools.timeout();

    tokio::task::spawn_blocking(move || {
        let reporter = TracingReporter::new(arch.as_str());
        engine
            .sign_index(&path, arch, &key, &OpContext::new(&reporter, timeout))
            .with_context(|| format!("Failed to sign index in {}", path.display()))
    })
    .await??;

    println!("{arch}: index signed");
    Ok(())
}
