//! Show command

use std::path::Path;

use anyhow::{Context, Result};
use apkrepo_core::{archive, merge};

/// Print the index text of an archive followed by its record count
pub fn show(path: &Path) -> Result<()> {
    let text = archive::extract_text(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    print!("{text}");
    if !text.is_empty() && !text.ends_with('\n') {
        println!();
    }
    println!("{} records", merge::count_records(&text));
    Ok(())
}
