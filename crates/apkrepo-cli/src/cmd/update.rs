//! Update command

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use apkrepo_core::{IndexState, LocalStorage, Repository, RepositoryConfig};
use bytes::Bytes;

use crate::{PartitionArgs, ToolArgs};

/// Copy packages into the partition and append them to its index
pub async fn update(
    partition: &PartitionArgs,
    packages: &[PathBuf],
    priv_key_file: Option<PathBuf>,
    tools: &ToolArgs,
) -> Result<()> {
    let engine = tools.engine(super::signing_key(priv_key_file)?);
    let storage = LocalStorage::new(&partition.repo_path)
        .await
        .with_context(|| format!("Failed to open {}", partition.repo_path.display()))?;
    let repo = Repository::new(
        Arc::new(storage),
        Arc::new(engine),
        RepositoryConfig {
            default_arch: partition.arch,
            command_timeout: tools.timeout(),
        },
    );

    let mut files = Vec::with_capacity(packages.len());
    for path in packages {
        files.push((file_name(path)?, read(path).await?));
    }

    let outcome = repo.add_packages(partition.arch, files).await?;
    for name in &outcome.packages {
        println!("added {name}");
    }
    match (&outcome.index, outcome.records) {
        (IndexState::SigningFailed(reason), _) => {
            println!("{}: index updated but unsigned: {reason}", outcome.arch);
        }
        (state, Some(records)) => {
            let signed = matches!(state, IndexState::Signed);
            println!(
                "{}: {}",
                outcome.arch,
                super::describe(apkrepo_core::IndexSummary { records, signed })
            );
        }
        (_, None) => println!("{}: index updated", outcome.arch),
    }
    Ok(())
}

fn file_name(path: &Path) -> Result<String> {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => Ok(name.to_string()),
        None => bail!("Not a file name: {}", path.display()),
    }
}

async fn read(path: &Path) -> Result<Bytes> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Bytes::from(data))
}
