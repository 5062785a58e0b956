//! apkrepo - Alpine package repository service

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use apkrepo_cli::cmd;
use apkrepo_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve(args) => cmd::serve::serve(args).await,
        Commands::Build {
            partition,
            priv_key_file,
            tools,
        } => cmd::build::build(&partition, priv_key_file, &tools).await,
        Commands::Update {
            partition,
            packages,
            priv_key_file,
            tools,
        } => cmd::update::update(&partition, &packages, priv_key_file, &tools).await,
        Commands::Sign {
            partition,
            priv_key_file,
            tools,
        } => cmd::sign::sign(&partition, &priv_key_file, &tools).await,
        Commands::Show { archive } => cmd::show::show(&archive),
    }
}
