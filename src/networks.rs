//! The per-network address table: which contracts are already deployed
//! where, which tokens the payment contract should know about, and the
//! numeric parameters new deployments are created with.
//!
//! The file is the operator's record of the chain. The tool only reads it;
//! after a migration the printed summary is pasted back in by hand.

use std::collections::BTreeMap;
use std::path::Path;

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contracts::ContractKind;
use crate::crypto::{self, Address};

#[derive(Debug, Error)]
pub enum NetworkError {
	#[error("could not read {path}: {source}")]
	Read {
		path: String,
		source: std::io::Error,
	},
	#[error("invalid network table: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("{field}: {reason}")]
	Invalid { field: String, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkTable {
	/// Parameters used by networks without their own `config` section.
	#[serde(default)]
	pub config: NetworkParams,
	#[serde(default)]
	pub networks: BTreeMap<String, NetworkEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkEntry {
	/// Contract addresses; a missing or empty entry means "deploy it".
	#[serde(default)]
	pub addresses: BTreeMap<String, String>,
	/// Token symbol to address, registered with the payment contract.
	#[serde(default)]
	pub tokens: BTreeMap<String, String>,
	pub config: Option<NetworkParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkParams {
	/// Decimal string, in the token's base units.
	pub minimum_bond: String,
	pub minimum_pod_size: u64,
	pub minimum_epoch_interval_seconds: u64,
	pub blacklist_slash_percent: u64,
	pub malicious_slash_percent: u64,
	pub secret_reveal_slash_percent: u64,
	pub darknode_payout_percent: u64,
	/// Receives the community share of rewards; defaults to the deployer.
	pub community_fund: Option<String>,
	pub community_fund_numerator: Option<u64>,
}

pub const DEFAULT_COMMUNITY_FUND_NUMERATOR: u64 = 50_000;

impl Default for NetworkParams {
	fn default() -> Self {
		Self {
			// 100,000 REN with 18 decimals.
			minimum_bond: "100000000000000000000000".into(),
			minimum_pod_size: 3,
			minimum_epoch_interval_seconds: 30,
			blacklist_slash_percent: 0,
			malicious_slash_percent: 50,
			secret_reveal_slash_percent: 100,
			darknode_payout_percent: 50,
			community_fund: None,
			community_fund_numerator: None,
		}
	}
}

impl NetworkParams {
	pub fn minimum_bond(&self) -> Result<U256, NetworkError> {
		U256::from_str_radix(self.minimum_bond.trim(), 10).map_err(|e| NetworkError::Invalid {
			field: "minimum_bond".into(),
			reason: e.to_string(),
		})
	}

	pub fn community_fund(&self) -> Result<Option<Address>, NetworkError> {
		match &self.community_fund {
			Some(s) => crypto::parse_optional_address(s).map_err(|reason| NetworkError::Invalid {
				field: "community_fund".into(),
				reason,
			}),
			None => Ok(None),
		}
	}

	pub fn community_fund_numerator(&self) -> u64 {
		self.community_fund_numerator
			.unwrap_or(DEFAULT_COMMUNITY_FUND_NUMERATOR)
	}
}

impl NetworkTable {
	pub fn load(path: &Path) -> Result<Self, NetworkError> {
		let content = std::fs::read_to_string(path).map_err(|source| NetworkError::Read {
			path: path.display().to_string(),
			source,
		})?;
		Self::parse(&content)
	}

	pub fn parse(content: &str) -> Result<Self, NetworkError> {
		Ok(toml::from_str(content)?)
	}

	/// Resolve a network by name. Unknown networks get no addresses (so
	/// everything is deployed) and the fallback parameters.
	pub fn resolve(&self, network: &str) -> Result<ResolvedNetwork, NetworkError> {
		let name = canonical_network(network);
		let entry = self.networks.get(name).cloned().unwrap_or_default();

		let mut addresses = AddressBook::default();
		for (contract, raw) in &entry.addresses {
			let field = format!("networks.{name}.addresses.{contract}");
			let kind = ContractKind::from_artifact(contract).ok_or_else(|| NetworkError::Invalid {
				field: field.clone(),
				reason: "unknown contract".into(),
			})?;
			let parsed = crypto::parse_optional_address(raw)
				.map_err(|reason| NetworkError::Invalid { field, reason })?;
			if let Some(addr) = parsed {
				addresses.set(kind, addr);
			}
		}

		let mut tokens = Vec::with_capacity(entry.tokens.len());
		for (symbol, raw) in &entry.tokens {
			let addr = raw.trim().parse::<Address>().map_err(|e| NetworkError::Invalid {
				field: format!("networks.{name}.tokens.{symbol}"),
				reason: format!("invalid address {raw:?}: {e}"),
			})?;
			tokens.push((symbol.clone(), addr));
		}

		Ok(ResolvedNetwork {
			name: name.to_owned(),
			addresses,
			tokens,
			params: entry.config.unwrap_or_else(|| self.config.clone()),
		})
	}
}

/// Strip the `-fork` suffix used when migrating against a local fork.
pub fn canonical_network(network: &str) -> &str {
	network.strip_suffix("-fork").unwrap_or(network)
}

/// A network entry with every address parsed.
#[derive(Debug, Clone)]
pub struct ResolvedNetwork {
	pub name: String,
	pub addresses: AddressBook,
	pub tokens: Vec<(String, Address)>,
	pub params: NetworkParams,
}

/// Known contract addresses for one network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressBook(BTreeMap<ContractKind, Address>);

impl AddressBook {
	pub fn get(&self, kind: ContractKind) -> Option<Address> {
		self.0.get(&kind).copied()
	}

	pub fn set(&mut self, kind: ContractKind, address: Address) {
		self.0.insert(kind, address);
	}

	pub fn iter(&self) -> impl Iterator<Item = (ContractKind, Address)> + '_ {
		self.0.iter().map(|(k, a)| (*k, *a))
	}

	/// Render as a `[networks.<name>.addresses]` table, in deployment
	/// order, ready to paste into the network file.
	pub fn to_toml_section(&self, network: &str) -> String {
		let mut out = format!("[networks.{network}.addresses]\n");
		for kind in ContractKind::MIGRATED {
			let addr = self.get(kind).map(|a| a.to_checksum(None)).unwrap_or_default();
			out.push_str(&format!("{kind} = \"{addr}\"\n"));
		}
		out
	}
}
