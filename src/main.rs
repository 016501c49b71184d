use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use darknode_deploy::cli::{Cli, Command};
use darknode_deploy::commands;

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_target(false)
		.init();

	let cli = Cli::parse();

	match &cli.command {
		Command::Migrate {
			revision,
			strict,
			simulate,
		} => commands::migrate::run(&cli, revision.as_deref(), *strict, *simulate).await,
		Command::Registry { command } => commands::registry::run(&cli, command).await,
		Command::Balances { command } => commands::balances::run(&cli, command).await,
		Command::Tx { command } => commands::tx::run(&cli, command).await,
	}
}
