pub mod balances;
pub mod migrate;
pub mod registry;
pub mod tx;

use anyhow::{Context, Result};
use alloy::primitives::U256;

use crate::chain::Chain;
use crate::cli::Cli;
use crate::config::Config;
use crate::contracts::ContractKind;
use crate::crypto::Address;
use crate::networks::{NetworkTable, ResolvedNetwork};
use crate::rpc::RpcClient;

/// Network name from CLI flag or config.
pub fn resolve_network(cli: &Cli, config: &Config) -> String {
	cli.network
		.clone()
		.unwrap_or_else(|| config.network.default.clone())
}

/// Resolve the RPC URL from CLI flag or config.
pub fn resolve_rpc(cli: &Cli, config: &Config) -> String {
	cli.rpc_url
		.clone()
		.unwrap_or_else(|| config.rpc_url(&resolve_network(cli, config)).to_owned())
}

pub fn rpc_client(cli: &Cli, config: &Config) -> Result<RpcClient> {
	let artifacts = cli
		.artifacts
		.clone()
		.unwrap_or_else(|| config.paths.artifacts.clone());
	Ok(RpcClient::new(&resolve_rpc(cli, config), artifacts)?)
}

/// Load the address table and resolve the selected network.
pub fn load_network(cli: &Cli, config: &Config) -> Result<ResolvedNetwork> {
	let path = cli
		.networks
		.clone()
		.unwrap_or_else(|| config.paths.networks.clone());
	let table = NetworkTable::load(&path)?;
	Ok(table.resolve(&resolve_network(cli, config))?)
}

/// The sending account: `--from`, then config, then the node's first
/// account.
pub async fn resolve_sender(cli: &Cli, config: &Config, chain: &dyn Chain) -> Result<Address> {
	if let Some(from) = cli.from.as_deref().or(config.sender.from.as_deref()) {
		return from
			.trim()
			.parse::<Address>()
			.map_err(|e| anyhow::anyhow!("invalid sender {from}: {e}"));
	}
	chain
		.accounts()
		.await?
		.first()
		.copied()
		.context("the node has no accounts to send from")
}

/// A deployed contract's address, failing if the table has none.
pub fn deployed(network: &ResolvedNetwork, kind: ContractKind) -> Result<Address> {
	network
		.addresses
		.get(kind)
		.with_context(|| format!("{kind} is not deployed on {}. Run: darknode-deploy migrate", network.name))
}

/// Parse a decimal or 0x-prefixed hexadecimal amount.
pub fn parse_amount(s: &str) -> Result<U256> {
	let s = s.trim();
	let parsed = match s.strip_prefix("0x") {
		Some(hex) => U256::from_str_radix(hex, 16),
		None => U256::from_str_radix(s, 10),
	};
	parsed.map_err(|e| anyhow::anyhow!("invalid amount {s}: {e}"))
}
