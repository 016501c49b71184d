use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::chain::Chain;
use crate::cli::Cli;
use crate::commands::{load_network, resolve_sender, rpc_client};
use crate::config::Config;
use crate::migrate::{self, MigrationReport, Migrator, OwnershipLink};
use crate::networks::AddressBook;
use crate::sim::SimChain;

pub async fn run(cli: &Cli, revision: Option<&str>, strict: bool, simulate: bool) -> Result<()> {
	let config = Config::load()?;
	let mut network = load_network(cli, &config)?;
	let revision = match revision {
		Some(r) => r.to_owned(),
		None => migrate::source_revision()?,
	};
	let version = migrate::version_string(&network.name, &revision);

	let report = if simulate {
		// Recorded addresses do not exist on an empty chain.
		network.addresses = AddressBook::default();
		let sim = SimChain::new();
		let owner = sim
			.accounts()
			.await?
			.first()
			.copied()
			.context("simulated chain has no accounts")?;
		info!("Simulating {} migration in memory", network.name);
		Migrator::new(&sim, network, owner, version).run().await?
	} else {
		let rpc = rpc_client(cli, &config)?;
		let owner = resolve_sender(cli, &config, &rpc).await?;
		info!("Using {} as {owner}", rpc.url());
		Migrator::new(&rpc, network, owner, version).run().await?
	};

	print_report(&report);

	if strict && !report.unresolved.is_empty() {
		anyhow::bail!(
			"{} reference(s) need manual attention: {}",
			report.unresolved.len(),
			report
				.unresolved
				.iter()
				.map(|u| u.contract.to_string())
				.collect::<Vec<_>>()
				.join(", ")
		);
	}
	Ok(())
}

fn print_report(report: &MigrationReport) {
	for (store, link) in &report.links {
		if let OwnershipLink::ClaimFailed { reason } = link {
			warn!("{store} was handed over without a separate claim ({reason})");
		}
	}
	for u in &report.unresolved {
		warn!("Unresolved: {}: {}", u.contract, u.message);
	}
	println!();
	println!("{}", report.summary());
}
