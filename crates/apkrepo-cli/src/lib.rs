//! apkrepo - Alpine package repository service
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Accepts `.apk` uploads over HTTP and keeps each architecture's
//! `APKINDEX.tar.gz` in step with the packages on disk. The same index
//! operations are available offline as subcommands.
//!
//! # Repository Layout
//!
//! ```text
//! <repo>/
//! ├── x86_64/
//! │   ├── APKINDEX.tar.gz   # signed when a private key is configured
//! │   └── *.apk
//! └── aarch64/
//!     └── ...
//! ```

pub mod cmd;
pub mod server;

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use apkrepo_core::{ApkTool, IndexEngine, SigningKey};
use apkrepo_schema::Arch;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "apkrepo")]
#[command(author, version, about = "apkrepo - Alpine package repository service")]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set (e.g. info, debug, apkrepo_core=trace)
    #[arg(long, global = true, env = "APKREPO_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Serve the upload API
    Serve(ServeArgs),
    /// Rebuild a partition index from the packages it contains
    Build {
        #[command(flatten)]
        partition: PartitionArgs,
        /// Private key to sign the new index with
        #[arg(long, env = "APKREPO_PRIV_KEY_FILE")]
        priv_key_file: Option<PathBuf>,
        #[command(flatten)]
        tools: ToolArgs,
    },
    /// Copy packages into a partition and add them to its index
    Update {
        #[command(flatten)]
        partition: PartitionArgs,
        /// Package files to add
        #[arg(required = true)]
        packages: Vec<PathBuf>,
        /// Private key to sign the new index with
        #[arg(long, env = "APKREPO_PRIV_KEY_FILE")]
        priv_key_file: Option<PathBuf>,
        #[command(flatten)]
        tools: ToolArgs,
    },
    /// Sign the current index of a partition
    Sign {
        #[command(flatten)]
        partition: PartitionArgs,
        /// Private key file
        #[arg(long, env = "APKREPO_PRIV_KEY_FILE")]
        priv_key_file: PathBuf,
        #[command(flatten)]
        tools: ToolArgs,
    },
    /// Print the records of an index archive
    Show {
        /// Path to an APKINDEX.tar.gz
        archive: PathBuf,
    },
}

/// Selects one architecture partition of a local repository.
#[derive(Debug, Args)]
pub struct PartitionArgs {
    /// Repository root directory
    #[arg(long, env = "APKREPO_REPO_PATH")]
    pub repo_path: PathBuf,
    /// Architecture partition
    #[arg(long, default_value_t = Arch::default())]
    pub arch: Arch,
}

impl PartitionArgs {
    pub fn partition(&self) -> PathBuf {
        self.repo_path.join(self.arch.as_str())
    }
}

/// External programs and their time limit.
#[derive(Debug, Args)]
pub struct ToolArgs {
    /// Program used to index packages
    #[arg(long, env = "APKREPO_APK_PROGRAM", default_value = "apk")]
    pub apk_program: PathBuf,
    /// Program used to sign indexes
    #[arg(long, env = "APKREPO_SIGN_PROGRAM", default_value = "abuild-sign")]
    pub sign_program: PathBuf,
    /// Seconds each external program may run
    #[arg(long, env = "APKREPO_COMMAND_TIMEOUT", default_value_t = 10)]
    pub command_timeout: u64,
}

impl ToolArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }

    /// Engine driving the configured programs.
    pub fn engine(&self, signing_key: Option<SigningKey>) -> IndexEngine {
        let tool = ApkTool::new(&self.apk_program, &self.sign_program);
        let engine = IndexEngine::new(std::sync::Arc::new(tool));
        match signing_key {
            Some(key) => engine.with_signing_key(key),
            None => engine,
        }
    }
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Local repository root
    #[arg(
        long,
        env = "APKREPO_REPO_PATH",
        required_unless_present = "remote_repo_url",
        conflicts_with = "remote_repo_url"
    )]
    pub repo_path: Option<PathBuf>,

    /// Remote file store the repository is proxied to
    #[arg(long, env = "APKREPO_REMOTE_URL")]
    pub remote_repo_url: Option<String>,

    /// User for the remote file store
    #[arg(long, env = "APKREPO_REMOTE_USERNAME", requires = "remote_repo_url")]
    pub remote_username: Option<String>,

    /// Password for the remote file store
    #[arg(
        long,
        env = "APKREPO_REMOTE_PASSWORD",
        requires = "remote_username",
        hide_env_values = true
    )]
    pub remote_password: Option<String>,

    /// Architecture used when a request names none
    #[arg(long, env = "APKREPO_DEFAULT_ARCH", default_value_t = Arch::default())]
    pub default_arch: Arch,

    /// Seconds to wait for a busy partition before answering 409
    #[arg(long, env = "APKREPO_LOCK_TIMEOUT")]
    pub lock_timeout: Option<u64>,

    /// Largest accepted request body in bytes
    #[arg(long, env = "APKREPO_MAX_CONTENT_LENGTH")]
    pub max_content_length: Option<usize>,

    /// Private key (PEM text) to sign indexes with
    #[arg(
        long,
        env = "APKREPO_PRIV_KEY",
        conflicts_with = "priv_key_file",
        hide_env_values = true
    )]
    pub priv_key: Option<String>,

    /// Private key file to sign indexes with
    #[arg(long, env = "APKREPO_PRIV_KEY_FILE")]
    pub priv_key_file: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "APKREPO_PORT", default_value_t = 80)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "APKREPO_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Delete every package and index in the local repository before serving
    #[arg(long, env = "APKREPO_CLEAN")]
    pub clean: bool,

    #[command(flatten)]
    pub tools: ToolArgs,
}

impl ServeArgs {
    pub fn lock_wait(&self) -> Option<Duration> {
        self.lock_timeout.map(Duration::from_secs)
    }
}
