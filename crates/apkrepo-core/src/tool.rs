//! Adapter for the external programs that do the package specific work.
//!
//! `apk index` turns package files into index records and `abuild-sign`
//! signs an index archive in place. Both are run with a hard timeout and their
//! output captured into private temporary files, which are gone again by the
//! time the adapter returns, whatever the outcome.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use apkrepo_schema::{Arch, INDEX_ARCHIVE_NAME};
use wait_timeout::ChildExt;

use crate::archive;
use crate::context::OpContext;
use crate::error::{IndexError, IndexResult, SigningError, ToolFailure};
use crate::reporter::Reporter;

/// The operations the engine needs from the outside world.
///
/// [`ApkTool`] is the production implementation; tests substitute their own.
pub trait IndexTool: Send + Sync {
    /// Produce the index text covering `packages`, with every record's
    /// architecture rewritten to `arch`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ExternalTool`] if the program cannot be run, fails
    /// or exceeds `ctx.timeout`.
    fn index_packages(
        &self,
        packages: &[PathBuf],
        arch: Arch,
        ctx: &OpContext<'_>,
    ) -> IndexResult<String>;

    /// Sign the index archive at `archive` in place with `private_key`.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::KeyNotFound`] if `private_key` is not a file
    /// and [`SigningError::Tool`] if the signing program fails.
    fn sign(
        &self,
        archive: &Path,
        private_key: &Path,
        ctx: &OpContext<'_>,
    ) -> Result<(), SigningError>;
}

/// Runs the Alpine tooling (`apk`, `abuild-sign`) as child processes.
#[derive(Debug, Clone)]
pub struct ApkTool {
    apk: PathBuf,
    abuild_sign: PathBuf,
}

impl Default for ApkTool {
    fn default() -> Self {
        Self {
            apk: PathBuf::from("apk"),
            abuild_sign: PathBuf::from("abuild-sign"),
        }
    }
}

impl ApkTool {
    /// Use explicit program paths instead of resolving through `PATH`.
    pub fn new(apk: impl Into<PathBuf>, abuild_sign: impl Into<PathBuf>) -> Self {
        Self {
            apk: apk.into(),
            abuild_sign: abuild_sign.into(),
        }
    }
}

impl IndexTool for ApkTool {
    fn index_packages(
        &self,
        packages: &[PathBuf],
        arch: Arch,
        ctx: &OpContext<'_>,
    ) -> IndexResult<String> {
        let program = self.apk.display().to_string();
        let workdir = tempfile::Builder::new()
            .prefix("apkrepo-index-")
            .tempdir()
            .map_err(|e| IndexError::io("create index work directory", e))?;
        let output = workdir.path().join(INDEX_ARCHIVE_NAME);

        let mut cmd = Command::new(&self.apk);
        cmd.arg("index")
            .arg("-o")
            .arg(&output)
            .args(packages)
            .arg("--rewrite-arch")
            .arg(arch.as_str());

        run_command(cmd, ctx.timeout, ctx.reporter).map_err(|failure| {
            IndexError::ExternalTool {
                program: program.clone(),
                failure,
            }
        })?;

        archive::extract_text(&output).map_err(|e| IndexError::ExternalTool {
            program,
            failure: ToolFailure::Output(e.to_string()),
        })
    }

    fn sign(
        &self,
        archive: &Path,
        private_key: &Path,
        ctx: &OpContext<'_>,
    ) -> Result<(), SigningError> {
        if !private_key.is_file() {
            return Err(SigningError::KeyNotFound(private_key.to_path_buf()));
        }

        let mut cmd = Command::new(&self.abuild_sign);
        cmd.arg("-k").arg(private_key).arg(archive);

        run_command(cmd, ctx.timeout, ctx.reporter)
            .map(|_| ())
            .map_err(|failure| SigningError::Tool {
                program: self.abuild_sign.display().to_string(),
                failure,
            })
    }
}

/// Captured output of a finished child process.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `cmd` to completion, killing it if it outlives `timeout`.
///
/// Output goes to anonymous temporary files rather than pipes so a chatty
/// child can never block on a full pipe while we wait for it.
///
/// # Errors
///
/// Returns [`ToolFailure::Spawn`] if the child cannot be started,
/// [`ToolFailure::Timeout`] if it was killed and [`ToolFailure::Exit`] if it
/// exited unsuccessfully.
pub fn run_command(
    mut cmd: Command,
    timeout: Duration,
    reporter: &dyn Reporter,
) -> Result<CommandOutput, ToolFailure> {
    reporter.debug(&format!("run subprocess: {cmd:?}"));

    let mut stdout = tempfile::tempfile().map_err(ToolFailure::Spawn)?;
    let mut stderr = tempfile::tempfile().map_err(ToolFailure::Spawn)?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(stdout.try_clone().map_err(ToolFailure::Spawn)?))
        .stderr(Stdio::from(stderr.try_clone().map_err(ToolFailure::Spawn)?));

    let mut child = cmd.spawn().map_err(ToolFailure::Spawn)?;
    // Drop our copies of the child's stdio handles held by `cmd`.
    drop(cmd);

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            reporter.warning(&format!("subprocess killed after {timeout:?}"));
            return Err(ToolFailure::Timeout(timeout));
        }
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ToolFailure::Spawn(e));
        }
    };

    let output = CommandOutput {
        stdout: read_capture(&mut stdout)?,
        stderr: read_capture(&mut stderr)?,
    };
    if !output.stdout.is_empty() {
        reporter.debug(&format!("stdout: {}", output.stdout.trim_end()));
    }

    if !status.success() {
        return Err(ToolFailure::Exit {
            status: status.to_string(),
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

fn read_capture(file: &mut File) -> Result<String, ToolFailure> {
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut buf))
        .map_err(|e| ToolFailure::Output(format!("cannot read captured output: {e}")))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
