//! Index text merging.
//!
//! Records are opaque blocks of `key:value` lines separated by one blank
//! line. Merging only ever appends whole records; nothing here parses them.

use std::path::PathBuf;

use apkrepo_schema::Arch;

use crate::context::OpContext;
use crate::error::IndexResult;
use crate::tool::IndexTool;

/// Append `fragments` to `existing`, one blank line between records.
///
/// With no (non-blank) fragments `existing` is returned unchanged. Otherwise
/// trailing newlines of `existing` are folded into a single separator, and
/// the result ends with a blank line the way `apk index` terminates its
/// output. Records already present are never deduplicated.
pub fn merge<S: AsRef<str>>(existing: &str, fragments: &[S]) -> String {
    let mut fragments = fragments
        .iter()
        .map(|f| f.as_ref().trim_matches('\n'))
        .filter(|f| !f.trim().is_empty())
        .peekable();

    if fragments.peek().is_none() {
        return existing.to_string();
    }

    let mut merged = existing.trim_end_matches('\n').to_string();
    for fragment in fragments {
        if !merged.is_empty() {
            merged.push_str("\n\n");
        }
        merged.push_str(fragment);
    }
    merged.push_str("\n\n");
    merged
}

/// Index `packages` in a single tool run and return the complete text.
///
/// An empty package set produces an empty index without running the tool.
///
/// # Errors
///
/// Propagates the tool's failure.
pub fn build_from_scratch(
    packages: &[PathBuf],
    arch: Arch,
    tool: &dyn IndexTool,
    ctx: &OpContext<'_>,
) -> IndexResult<String> {
    if packages.is_empty() {
        ctx.reporter.info("no packages in partition, writing an empty index");
        return Ok(String::new());
    }
    tool.index_packages(packages, arch, ctx)
}

/// Index each package on its own, in order, and append the records to
/// `existing`.
///
/// Nothing is returned unless every package was indexed.
///
/// # Errors
///
/// Returns the first tool failure; later packages are not attempted.
pub fn accumulate(
    existing: &str,
    packages: &[PathBuf],
    arch: Arch,
    tool: &dyn IndexTool,
    ctx: &OpContext<'_>,
) -> IndexResult<String> {
    let mut fragments = Vec::with_capacity(packages.len());
    for package in packages {
        ctx.reporter.debug(&format!("indexing {}", package.display()));
        fragments.push(tool.index_packages(std::slice::from_ref(package), arch, ctx)?);
    }
    Ok(merge(existing, &fragments))
}

/// Iterate the non-empty records of an index text.
pub fn records(text: &str) -> impl Iterator<Item = &str> {
    text.split("\n\n")
        .map(|r| r.trim_matches('\n'))
        .filter(|r| !r.trim().is_empty())
}

/// Number of records in an index text.
pub fn count_records(text: &str) -> usize {
    records(text).count()
}
