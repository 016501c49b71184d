use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::networks::canonical_network;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	pub network: NetworkConfig,
	pub paths: PathsConfig,
	#[serde(default)]
	pub sender: SenderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
	pub default: String,
	pub devnet_rpc: String,
	pub testnet_rpc: String,
	pub mainnet_rpc: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
	/// The per-network address table.
	pub networks: PathBuf,
	/// Directory of compiled contract artifacts.
	pub artifacts: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderConfig {
	/// Account transactions are sent from. Defaults to the node's first.
	pub from: Option<String>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			network: NetworkConfig {
				default: "devnet".into(),
				devnet_rpc: "http://127.0.0.1:8545".into(),
				testnet_rpc: "http://127.0.0.1:8545".into(),
				mainnet_rpc: "http://127.0.0.1:8545".into(),
			},
			paths: PathsConfig {
				networks: "networks.toml".into(),
				artifacts: "build/contracts".into(),
			},
			sender: SenderConfig::default(),
		}
	}
}

impl Config {
	/// Directory where CLI state is stored (~/.darknode-deploy/).
	pub fn dir() -> anyhow::Result<PathBuf> {
		Ok(dirs::home_dir()
			.context("could not determine home directory")?
			.join(".darknode-deploy"))
	}

	/// Path to the config file.
	pub fn path() -> anyhow::Result<PathBuf> {
		Ok(Self::dir()?.join("config.toml"))
	}

	/// Load config from disk, falling back to defaults if no file exists.
	pub fn load() -> anyhow::Result<Self> {
		let path = Self::path()?;
		if path.exists() {
			let content = std::fs::read_to_string(&path)
				.with_context(|| format!("reading {}", path.display()))?;
			Ok(toml::from_str(&content)?)
		} else {
			Ok(Self::default())
		}
	}

	/// Return the RPC URL for the given network name. `-fork` networks run
	/// against a local fork, so they use the devnet endpoint.
	pub fn rpc_url(&self, network: &str) -> &str {
		if network.ends_with("-fork") {
			return &self.network.devnet_rpc;
		}
		match canonical_network(network) {
			"mainnet" => &self.network.mainnet_rpc,
			"testnet" => &self.network.testnet_rpc,
			_ => &self.network.devnet_rpc,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_sensible() {
		let c = Config::default();
		assert_eq!(c.network.default, "devnet");
		assert_eq!(c.paths.networks, PathBuf::from("networks.toml"));
		assert_eq!(c.paths.artifacts, PathBuf::from("build/contracts"));
		assert!(c.sender.from.is_none());
	}

	#[test]
	fn toml_roundtrip() {
		let mut c = Config::default();
		c.network.testnet_rpc = "https://testnet.example/rpc".into();
		c.sender.from = Some("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".into());

		let serialized = toml::to_string_pretty(&c).unwrap();
		let parsed: Config = toml::from_str(&serialized).unwrap();

		assert_eq!(parsed.network.testnet_rpc, "https://testnet.example/rpc");
		assert_eq!(parsed.sender.from, c.sender.from);
	}

	#[test]
	fn sender_section_is_optional() {
		let parsed: Config = toml::from_str(
			r#"
[network]
default = "testnet"
devnet_rpc = "http://localhost:8545"
testnet_rpc = "http://testnet:8545"
mainnet_rpc = "http://mainnet:8545"

[paths]
networks = "deploy/networks.toml"
artifacts = "out"
"#,
		)
		.unwrap();
		assert!(parsed.sender.from.is_none());
		assert_eq!(parsed.paths.artifacts, PathBuf::from("out"));
	}

	#[test]
	fn rpc_url_selection() {
		let mut c = Config::default();
		c.network.devnet_rpc = "http://local".into();
		c.network.testnet_rpc = "http://testnet".into();
		c.network.mainnet_rpc = "http://mainnet".into();
		assert_eq!(c.rpc_url("testnet"), "http://testnet");
		assert_eq!(c.rpc_url("mainnet"), "http://mainnet");
		// Forks and unknown networks use the local endpoint.
		assert_eq!(c.rpc_url("mainnet-fork"), "http://local");
		assert_eq!(c.rpc_url("devnet"), "http://local");
	}
}
