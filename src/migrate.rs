//! Idempotent deployment of the darknode contract set.
//!
//! Each step reads the current on-chain state, compares it with the
//! desired state, and only sends a transaction on mismatch. Running the
//! migration twice against the same chain performs no actions the second
//! time. There is no rollback: any failed call aborts the run, and the
//! next run resumes from whatever was already done.

use alloy::primitives::{Bytes, U256};
use alloy::sol_types::{SolCall, SolType};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::chain::{Chain, ContractHandle};
use crate::contracts::{
	ClaimlessRewardsArgs, ContractKind, IClaimable, IDarknodePayment as Dnp, IDarknodeRegistry as Dnr,
	IDarknodeSlasher as Slasher, IProtocol, IProxy, IRenProxyAdmin, PaymentArgs, PaymentStoreArgs, RegistryStoreArgs,
	SlasherArgs,
};
use crate::crypto::Address;
use crate::networks::{AddressBook, ResolvedNetwork};

/// Outcome of moving a store contract under a new parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipLink {
	/// The parent already owned the store; nothing was sent.
	AlreadyOwned,
	/// Ownership was transferred and claimed by the parent.
	Claimed,
	/// The previous parent handed the store over, but the explicit claim
	/// afterwards failed. Newer parents claim as part of the handover, so
	/// this is expected and the link is in place.
	ClaimFailed { reason: String },
}

/// A reference that does not match the intended graph and that the
/// migration cannot repair on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
	pub contract: ContractKind,
	pub message: String,
}

#[derive(Debug, Clone)]
pub struct MigrationReport {
	pub network: String,
	pub actions: u32,
	pub addresses: AddressBook,
	pub links: Vec<(ContractKind, OwnershipLink)>,
	pub unresolved: Vec<Unresolved>,
	pub finished_at: DateTime<Utc>,
}

impl MigrationReport {
	/// The block operators paste back into the network table.
	pub fn summary(&self) -> String {
		format!(
			"# {} migration finished {}\n{}",
			self.network,
			self.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
			self.addresses.to_toml_section(&self.network),
		)
	}
}

/// Version string baked into new stores and payment contracts.
pub fn version_string(network: &str, revision: &str) -> String {
	format!("{network}-{revision}")
}

/// `git describe --always --long` of the working tree.
pub fn source_revision() -> Result<String> {
	let out = std::process::Command::new("git")
		.args(["describe", "--always", "--long"])
		.output()
		.context("failed to run git describe")?;
	if !out.status.success() {
		anyhow::bail!(
			"git describe failed: {}",
			String::from_utf8_lossy(&out.stderr).trim()
		);
	}
	Ok(String::from_utf8_lossy(&out.stdout).trim().to_owned())
}

pub struct Migrator<'a> {
	chain: &'a dyn Chain,
	network: ResolvedNetwork,
	/// Deployer and owner of everything the migration creates.
	owner: Address,
	version: String,
	addresses: AddressBook,
	actions: u32,
	links: Vec<(ContractKind, OwnershipLink)>,
	unresolved: Vec<Unresolved>,
}

impl<'a> Migrator<'a> {
	pub fn new(chain: &'a dyn Chain, network: ResolvedNetwork, owner: Address, version: String) -> Self {
		let addresses = network.addresses.clone();
		Self {
			chain,
			network,
			owner,
			version,
			addresses,
			actions: 0,
			links: Vec::new(),
			unresolved: Vec::new(),
		}
	}

	pub async fn run(mut self) -> Result<MigrationReport> {
		info!("Deploying to {}...", self.network.name);

		let proxy_admin = self.ensure_deployed(ContractKind::RenProxyAdmin, Bytes::new(), true).await?;
		let protocol = self.ensure_deployed(ContractKind::Protocol, Bytes::new(), true).await?;
		self.ensure_protocol_initialized(protocol).await?;
		let token = self.ensure_deployed(ContractKind::RenToken, Bytes::new(), true).await?;
		self.ensure_deployed(ContractKind::ClaimRewards, Bytes::new(), true).await?;

		let registry = self.migrate_registry(proxy_admin, protocol, token).await?;
		self.migrate_slasher(registry).await?;
		self.migrate_payment(registry).await?;

		info!("Performed {} updates.", self.actions);

		Ok(MigrationReport {
			network: self.network.name,
			actions: self.actions,
			addresses: self.addresses,
			links: self.links,
			unresolved: self.unresolved,
			finished_at: Utc::now(),
		})
	}

	// -- Registry --

	async fn migrate_registry(&mut self, proxy_admin: Address, protocol: Address, token: Address) -> Result<Address> {
		let params = self.network.params.clone();

		let store_args = RegistryStoreArgs::abi_encode_params(&(self.version.clone(), token));
		let store = self
			.ensure_deployed(ContractKind::DarknodeRegistryStore, store_args.into(), true)
			.await?;

		// Deploying the bare logic contract is not counted: it only matters
		// once the proxy points at it, and that is counted below.
		let logic = self
			.ensure_deployed(ContractKind::DarknodeRegistryLogicV1, Bytes::new(), false)
			.await?;

		// Initialize the logic contract itself so nobody else can.
		let logic_owner = self.handle(logic).call(IClaimable::ownerCall {}).await?;
		if logic_owner == Address::ZERO {
			self.action("Ensuring DarknodeRegistryLogic is initialized");
			self.handle(logic)
				.send(Dnr::initializeCall {
					version: String::new(),
					ren: Address::ZERO,
					store: Address::ZERO,
					minimum_bond: U256::ZERO,
					minimum_pod_size: U256::ZERO,
					minimum_epoch_interval_seconds: U256::ZERO,
					deregistration_interval: U256::ZERO,
				})
				.await
				.context("initializing DarknodeRegistryLogicV1")?;
		}

		let registry = match self.addresses.get(ContractKind::DarknodeRegistryProxy) {
			Some(addr) => addr,
			None => {
				self.action("Deploying DarknodeRegistry");
				let proxy = self
					.deploy(ContractKind::DarknodeRegistryProxy, Bytes::new())
					.await?;
				let init = Dnr::initializeCall {
					version: self.version.clone(),
					ren: token,
					store,
					minimum_bond: params.minimum_bond()?,
					minimum_pod_size: U256::from(params.minimum_pod_size),
					minimum_epoch_interval_seconds: U256::from(params.minimum_epoch_interval_seconds),
					deregistration_interval: U256::ZERO,
				};
				self.handle(proxy)
					.send(IProxy::initializeCall {
						logic,
						admin: proxy_admin,
						data: init.abi_encode().into(),
					})
					.await
					.context("initializing DarknodeRegistryProxy")?;
				proxy
			}
		};

		let current_logic = self
			.handle(proxy_admin)
			.call(IRenProxyAdmin::getProxyImplementationCall { proxy: registry })
			.await?;
		if current_logic != logic {
			self.action(&format!(
				"DarknodeRegistryProxy is pointing to out-dated logic. Was {current_logic}, now is {logic}"
			));
			self.handle(proxy_admin)
				.send(IRenProxyAdmin::upgradeCall {
					proxy: registry,
					implementation: logic,
				})
				.await
				.context("upgrading DarknodeRegistryProxy")?;
		}

		let link = self
			.link_store(store, registry, "DarknodeRegistryStore", "DarknodeRegistry")
			.await?;
		self.links.push((ContractKind::DarknodeRegistryStore, link));

		let in_protocol = self
			.handle(protocol)
			.call(IProtocol::getContractCall {
				name: "DarknodeRegistry".into(),
			})
			.await?;
		if in_protocol != registry {
			self.action(&format!(
				"Updating DarknodeRegistry in Protocol contract. Was {in_protocol}, now is {registry}"
			));
			self.handle(protocol)
				.send(IProtocol::updateContractCall {
					name: "DarknodeRegistry".into(),
					target: registry,
				})
				.await
				.context("updating Protocol")?;
		}

		for (kind, label, at) in [
			(ContractKind::DarknodeRegistryProxy, "DNR", registry),
			(ContractKind::DarknodeRegistryStore, "DNRS", store),
		] {
			let ren = self.handle(at).call(Dnr::renCall {}).await?;
			if ren != token {
				self.unresolved(kind, format!(
					"{label} is pointing to wrong REN token - {ren} instead of {token} - {label} should be updated or redeployed."
				));
			}
		}

		Ok(registry)
	}

	/// A fresh Protocol has no owner until initialized. This is logged but
	/// not counted as an update.
	async fn ensure_protocol_initialized(&mut self, protocol: Address) -> Result<()> {
		let owner = self.handle(protocol).call(IClaimable::ownerCall {}).await?;
		if owner == Address::ZERO {
			info!("Initializing Protocol");
			self.handle(protocol)
				.send(IProtocol::__Protocol_initCall { admin: self.owner })
				.await
				.context("initializing Protocol")?;
		}
		Ok(())
	}

	// -- Slasher --

	async fn migrate_slasher(&mut self, registry: Address) -> Result<()> {
		let slasher = self
			.ensure_deployed(
				ContractKind::DarknodeSlasher,
				SlasherArgs::abi_encode_params(&(registry,)).into(),
				true,
			)
			.await?;

		let in_slasher = self
			.handle(slasher)
			.call(Slasher::darknodeRegistryCall {})
			.await?;
		if in_slasher != registry {
			self.action("Updating DNR in Slasher");
			self.handle(slasher)
				.send(Slasher::updateDarknodeRegistryCall { registry })
				.await
				.context("updating DarknodeSlasher registry")?;
		}

		let params = self.network.params.clone();
		let wanted = U256::from(params.blacklist_slash_percent);
		if self.handle(slasher).call(Slasher::blacklistSlashPercentCall {}).await? != wanted {
			self.action("Setting blacklist slash percent");
			self.handle(slasher)
				.send(Slasher::setBlacklistSlashPercentCall { percentage: wanted })
				.await
				.context("setting blacklist slash percent")?;
		}
		let wanted = U256::from(params.malicious_slash_percent);
		if self.handle(slasher).call(Slasher::maliciousSlashPercentCall {}).await? != wanted {
			self.action("Setting malicious slash percent");
			self.handle(slasher)
				.send(Slasher::setMaliciousSlashPercentCall { percentage: wanted })
				.await
				.context("setting malicious slash percent")?;
		}
		let wanted = U256::from(params.secret_reveal_slash_percent);
		if self.handle(slasher).call(Slasher::secretRevealSlashPercentCall {}).await? != wanted {
			self.action("Setting secret reveal slash percent");
			self.handle(slasher)
				.send(Slasher::setSecretRevealSlashPercentCall { percentage: wanted })
				.await
				.context("setting secret reveal slash percent")?;
		}

		let dnr = self.handle(registry);
		let current = dnr.call(Dnr::slasherCall {}).await?;
		let next = dnr.call(Dnr::nextSlasherCall {}).await?;
		if current != slasher && next != slasher {
			self.action("Linking DarknodeSlasher and DarknodeRegistry");
			self.handle(registry)
				.send(Dnr::updateSlasherCall { next_slasher: slasher })
				.await
				.context("updating DarknodeRegistry slasher")?;
		}

		Ok(())
	}

	// -- Payment and rewards --

	async fn migrate_payment(&mut self, registry: Address) -> Result<()> {
		let params = self.network.params.clone();

		let store = self
			.ensure_deployed(
				ContractKind::DarknodePaymentStore,
				PaymentStoreArgs::abi_encode_params(&(self.version.clone(),)).into(),
				true,
			)
			.await?;

		let payment_args = PaymentArgs::abi_encode_params(&(
			self.version.clone(),
			registry,
			store,
			U256::from(params.darknode_payout_percent),
		));
		let payment = self
			.ensure_deployed(ContractKind::DarknodePayment, payment_args.into(), true)
			.await?;

		let community_fund = params.community_fund()?.unwrap_or(self.owner);
		let rewards_args = ClaimlessRewardsArgs::abi_encode_params(&(
			registry,
			store,
			community_fund,
			U256::from(params.community_fund_numerator()),
		));
		self.ensure_deployed(ContractKind::ClaimlessRewards, rewards_args.into(), true)
			.await?;

		let in_registry = self.handle(registry).call(Dnr::darknodePaymentCall {}).await?;
		if in_registry != payment {
			self.action("Updating DarknodeRegistry's darknode payment");
			self.handle(registry)
				.send(Dnr::updateDarknodePaymentCall { payment })
				.await
				.context("updating DarknodeRegistry payment")?;
		}

		for (symbol, token) in self.network.tokens.clone() {
			self.ensure_token_registered(payment, &symbol, token).await?;
		}

		let dnr_in_payment = self.handle(payment).call(Dnp::darknodeRegistryCall {}).await?;
		if dnr_in_payment != registry {
			self.unresolved(ContractKind::DarknodePayment, format!(
				"DNP is pointing to {dnr_in_payment} instead of {registry} - DNP may be behind a forwarder, or should be redeployed."
			));
		}

		let link = self
			.link_store(store, payment, "DarknodePaymentStore", "DarknodePayment")
			.await?;
		self.links.push((ContractKind::DarknodePaymentStore, link));

		let changer = self.handle(payment).call(Dnp::cycleChangerCall {}).await?;
		if changer != registry {
			self.action("Setting the DarknodePayment's cycle changer");
			self.handle(payment)
				.send(Dnp::updateCycleChangerCall { changer: registry })
				.await
				.context("updating DarknodePayment cycle changer")?;
		}

		Ok(())
	}

	/// Register `token` with the payment contract unless it is already
	/// registered or awaiting registration at the next cycle.
	async fn ensure_token_registered(&mut self, payment: Address, symbol: &str, token: Address) -> Result<()> {
		let dnp = self.handle(payment);
		let index = dnp.call(Dnp::registeredTokenIndexCall { token }).await?;
		let pending = dnp.call(Dnp::tokenPendingRegistrationCall { token }).await?;
		if index.is_zero() && !pending {
			self.action(&format!("Registering token {symbol} in DarknodePayment"));
			self.handle(payment)
				.send(Dnp::registerTokenCall { token })
				.await
				.with_context(|| format!("registering token {symbol}"))?;
		}
		Ok(())
	}

	// -- Shared steps --

	/// Make `parent` the owner of `store`.
	///
	/// If the deployer still owns the store, it starts the transfer (unless
	/// already pending) and the parent claims. Otherwise the store belongs to
	/// a previous parent, which is asked to hand it over; its explicit claim
	/// afterwards is allowed to fail.
	async fn link_store(
		&mut self,
		store: Address,
		parent: Address,
		store_name: &str,
		parent_name: &str,
	) -> Result<OwnershipLink> {
		let current = self.handle(store).call(IClaimable::ownerCall {}).await?;
		if current == parent {
			return Ok(OwnershipLink::AlreadyOwned);
		}
		self.action(&format!("Linking {store_name} and {parent_name}"));

		if current == self.owner {
			let pending = self.handle(store).call(IClaimable::pendingOwnerCall {}).await?;
			if pending != parent {
				info!("Transferring {store_name} ownership");
				self.handle(store)
					.send(IClaimable::transferOwnershipCall { new_owner: parent })
					.await
					.with_context(|| format!("transferring {store_name} ownership"))?;
			}
			info!("Claiming {store_name} ownership in {parent_name}");
			self.handle(parent)
				.send(Dnr::claimStoreOwnershipCall {})
				.await
				.with_context(|| format!("claiming {store_name} ownership"))?;
			return Ok(OwnershipLink::Claimed);
		}

		info!("Transferring {store_name} ownership from {current} to new {parent_name}");
		self.handle(current)
			.send(Dnr::transferStoreOwnershipCall { next_registry: parent })
			.await
			.with_context(|| format!("handing {store_name} over from {current}"))?;

		match self.handle(parent).send(Dnr::claimStoreOwnershipCall {}).await {
			Ok(_) => Ok(OwnershipLink::Claimed),
			Err(e) => {
				info!("{parent_name} claim skipped: {e}");
				Ok(OwnershipLink::ClaimFailed { reason: e.to_string() })
			}
		}
	}

	async fn ensure_deployed(&mut self, kind: ContractKind, args: Bytes, counted: bool) -> Result<Address> {
		if let Some(addr) = self.addresses.get(kind) {
			return Ok(addr);
		}
		if counted {
			self.action(&format!("Deploying {kind}"));
		} else {
			info!("Deploying {kind}");
		}
		self.deploy(kind, args).await
	}

	async fn deploy(&mut self, kind: ContractKind, args: Bytes) -> Result<Address> {
		let addr = self
			.chain
			.deploy(self.owner, kind, args)
			.await
			.with_context(|| format!("deploying {kind}"))?;
		info!("{kind} deployed at {addr}");
		self.addresses.set(kind, addr);
		Ok(addr)
	}

	fn handle(&self, to: Address) -> ContractHandle<'a> {
		ContractHandle::new(self.chain, self.owner, to)
	}

	fn action(&mut self, message: &str) {
		info!("{message}");
		self.actions += 1;
	}

	fn unresolved(&mut self, contract: ContractKind, message: String) {
		error!("ERROR! {message}");
		self.unresolved.push(Unresolved { contract, message });
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn version_string_joins_network_and_revision() {
		assert_eq!(version_string("testnet", "v1.0.0-3-gabc1234"), "testnet-v1.0.0-3-gabc1234");
	}

	#[test]
	fn summary_lists_every_contract() {
		let mut addresses = AddressBook::default();
		addresses.set(ContractKind::RenToken, Address::repeat_byte(1));
		let report = MigrationReport {
			network: "devnet".into(),
			actions: 0,
			addresses,
			links: vec![],
			unresolved: vec![],
			finished_at: Utc::now(),
		};
		let summary = report.summary();
		assert!(summary.starts_with("# devnet migration finished"));
		for kind in ContractKind::MIGRATED {
			assert!(summary.contains(&format!("{kind} = ")), "missing {kind}");
		}
		assert!(summary.contains("DarknodeSlasher = \"\""));
	}
}
