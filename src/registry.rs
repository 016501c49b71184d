//! Named operations against a deployed darknode registry, used to walk
//! darknodes through registration, bonding and epoch transitions.
//!
//! Every operation is a single call or transaction (plus any token
//! approval it needs). Failures propagate unchanged; the only loop is
//! [`RegistryDriver::wait_for_epoch`].

use std::time::Duration;

use alloy::primitives::U256;
use thiserror::Error;
use tracing::{debug, info};

use crate::accounts::{self, Account};
use crate::chain::{Chain, ChainError, ContractHandle, Receipt};
use crate::contracts::{IDarknodeRegistry as Dnr, IERC20};
use crate::crypto::{self, Address, MinerId, B256};

/// Page size for `getCurrentMiners`.
pub const MINER_BATCH: u64 = 50;

/// Shortest pause between `epoch()` attempts, whatever the interval.
pub const MIN_EPOCH_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum DriverError {
	#[error(transparent)]
	Chain(#[from] ChainError),
	#[error("bond must be greater than zero")]
	ZeroBond,
}

/// The registry's full darknode list split by state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MinerList {
	pub deregistered: Vec<MinerId>,
	pub to_deregister: Vec<MinerId>,
	pub registered: Vec<MinerId>,
	pub to_register: Vec<MinerId>,
}

pub struct RegistryDriver<'a> {
	chain: &'a dyn Chain,
	registry: Address,
	token: Address,
	epoch_interval: Duration,
}

impl<'a> RegistryDriver<'a> {
	pub fn new(chain: &'a dyn Chain, registry: Address, token: Address, epoch_interval: Duration) -> Self {
		Self {
			chain,
			registry,
			token,
			epoch_interval,
		}
	}

	fn dnr(&self, from: Address) -> ContractHandle<'a> {
		ContractHandle::new(self.chain, from, self.registry)
	}

	fn ren(&self, from: Address) -> ContractHandle<'a> {
		ContractHandle::new(self.chain, from, self.token)
	}

	// -- Epochs --

	/// Call `epoch()` until a transaction crosses an epoch boundary.
	///
	/// `epoch()` is a transaction, not a read, so each attempt also moves the
	/// chain forward. Between attempts this sleeps a tenth of the epoch
	/// interval, never less than [`MIN_EPOCH_POLL`]. There is no timeout.
	pub async fn wait_for_epoch(&self, from: Address) -> Result<Receipt, ChainError> {
		let pause = poll_pause(self.epoch_interval);
		loop {
			let receipt = self.dnr(from).send(Dnr::epochCall {}).await?;
			if receipt.ends_with::<Dnr::LogNewEpoch>() {
				info!("New epoch at block {}", receipt.block_number);
				return Ok(receipt);
			}
			debug!("Epoch not over yet, sleeping {:?}", pause);
			tokio::time::sleep(pause).await;
		}
	}

	pub async fn epoch_blockhash(&self) -> Result<B256, ChainError> {
		let epoch = self.dnr(self.registry).call(Dnr::getCurrentEpochCall {}).await?;
		Ok(B256::from(epoch.epochhash.to_be_bytes::<32>()))
	}

	// -- Queries --

	pub async fn miner_count(&self) -> Result<u64, ChainError> {
		let count = self.dnr(self.registry).call(Dnr::getNumberOfMinersCall {}).await?;
		to_u64(count, "getNumberOfMiners")
	}

	pub async fn mnetwork_size(&self) -> Result<u64, ChainError> {
		let size = self.dnr(self.registry).call(Dnr::getMNetworkSizeCall {}).await?;
		to_u64(size, "getMNetworkSize")
	}

	/// Darknodes active in the current epoch, fetched `MINER_BATCH` at a time.
	pub async fn registered_miners(&self) -> Result<Vec<MinerId>, ChainError> {
		let count = self.miner_count().await?;
		let mut miners = Vec::new();
		for (start, end) in batches(count, MINER_BATCH) {
			let page = self
				.dnr(self.registry)
				.call(Dnr::getCurrentMinersCall {
					start: U256::from(start),
					end: U256::from(end),
				})
				.await?;
			miners.extend(page);
		}
		Ok(miners)
	}

	pub async fn all_miners(&self) -> Result<MinerList, ChainError> {
		let all = self.dnr(self.registry).call(Dnr::getAllMinersCall {}).await?;
		let counts = [
			to_u64(all.deregistered, "getAllMiners deregistered count")?,
			to_u64(all.to_deregister, "getAllMiners to-deregister count")?,
			to_u64(all.registered, "getAllMiners registered count")?,
			to_u64(all.to_register, "getAllMiners to-register count")?,
		];
		Ok(split_miner_list(&all.list, counts))
	}

	pub async fn bond(&self, id: &MinerId) -> Result<U256, ChainError> {
		self.dnr(self.registry)
			.call(Dnr::getBondCall { darknode_id: *id })
			.await
	}

	pub async fn bond_pending_withdrawal(&self, id: &MinerId) -> Result<U256, ChainError> {
		self.dnr(self.registry)
			.call(Dnr::getBondPendingWithdrawalCall { darknode_id: *id })
			.await
	}

	pub async fn miner_id(&self, operator: Address) -> Result<MinerId, ChainError> {
		self.dnr(self.registry)
			.call(Dnr::getMinerIDCall { operator })
			.await
	}

	pub async fn seed(&self, id: &MinerId) -> Result<B256, ChainError> {
		self.dnr(self.registry)
			.call(Dnr::getSeedCall { darknode_id: *id })
			.await
	}

	pub async fn public_key(&self, id: &MinerId) -> Result<Vec<u8>, ChainError> {
		let key = self
			.dnr(self.registry)
			.call(Dnr::getPublicKeyCall { darknode_id: *id })
			.await?;
		Ok(key.to_vec())
	}

	pub async fn token_balance(&self, holder: Address) -> Result<U256, ChainError> {
		self.ren(holder).call(IERC20::balanceOfCall { holder }).await
	}

	/// What `holder` still lets the registry pull.
	pub async fn allowance(&self, holder: Address) -> Result<U256, ChainError> {
		self.ren(holder)
			.call(IERC20::allowanceCall {
				holder,
				spender: self.registry,
			})
			.await
	}

	// -- Transactions --

	/// Let the registry pull `amount` tokens from `from`.
	pub async fn approve(&self, from: Address, amount: U256) -> Result<Receipt, ChainError> {
		self.ren(from)
			.send(IERC20::approveCall {
				spender: self.registry,
				value: amount,
			})
			.await
	}

	/// Register `account` with a total bond of `bond`. A bond still pending
	/// withdrawal from an earlier registration counts towards it, so only
	/// the difference is approved.
	pub async fn register(&self, account: &Account, bond: U256) -> Result<Receipt, DriverError> {
		if bond.is_zero() {
			return Err(DriverError::ZeroBond);
		}
		let pending = self.bond_pending_withdrawal(&account.republic).await?;
		if bond > pending {
			self.approve(account.address, bond - pending).await?;
		}
		let receipt = self
			.dnr(account.address)
			.send(Dnr::registerCall {
				darknode_id: account.republic,
				public_key: account.public_key.clone().into(),
			})
			.await?;
		info!("Registered {}", account.republic);
		Ok(receipt)
	}

	pub async fn deregister(&self, account: &Account) -> Result<Receipt, ChainError> {
		self.dnr(account.address)
			.send(Dnr::deregisterCall {
				darknode_id: account.republic,
			})
			.await
	}

	/// Change the bond to `new_bond`, approving any increase first.
	pub async fn update_bond(&self, account: &Account, new_bond: U256) -> Result<Receipt, ChainError> {
		let current = self.bond(&account.republic).await?;
		if new_bond > current {
			self.approve(account.address, new_bond - current).await?;
		}
		self.dnr(account.address)
			.send(Dnr::updateBondCall {
				darknode_id: account.republic,
				bond: new_bond,
			})
			.await
	}

	pub async fn withdraw_bond(&self, account: &Account) -> Result<Receipt, ChainError> {
		self.dnr(account.address)
			.send(Dnr::withdrawBondCall {
				darknode_id: account.republic,
			})
			.await
	}

	// -- Batches, one account at a time --

	pub async fn register_all(&self, accounts: &[Account], bond: U256) -> Result<Vec<Receipt>, DriverError> {
		let mut receipts = Vec::with_capacity(accounts.len());
		for account in accounts {
			receipts.push(self.register(account, bond).await?);
		}
		Ok(receipts)
	}

	pub async fn deregister_all(&self, accounts: &[Account]) -> Result<Vec<Receipt>, ChainError> {
		let mut receipts = Vec::with_capacity(accounts.len());
		for account in accounts {
			receipts.push(self.deregister(account).await?);
		}
		Ok(receipts)
	}

	pub async fn withdraw_all(&self, accounts: &[Account]) -> Result<Vec<Receipt>, ChainError> {
		let mut receipts = Vec::with_capacity(accounts.len());
		for account in accounts {
			receipts.push(self.withdraw_bond(account).await?);
		}
		Ok(receipts)
	}

	// -- MNetworks --

	/// Group the registered darknodes into mnetworks for the current epoch.
	pub async fn mnetworks(&self) -> Result<Vec<Vec<MinerId>>, ChainError> {
		let epoch = self.epoch_blockhash().await?;
		let size = self.mnetwork_size().await?;
		let miners = self.registered_miners().await?;

		let mut keyed = Vec::with_capacity(miners.len());
		for id in miners {
			let seed = self.seed(&id).await?;
			keyed.push((crypto::mnetwork_sort_key(&seed, &epoch), id));
		}
		Ok(assign_mnetworks(keyed, size))
	}
}

/// A count read from the registry. Values past `u64` are malformed.
fn to_u64(value: U256, what: &str) -> Result<u64, ChainError> {
	u64::try_from(value).map_err(|_| ChainError::Decode(format!("{what} out of range: {value}")))
}

/// Pause between `epoch()` attempts: a tenth of the interval, at least
/// [`MIN_EPOCH_POLL`].
pub fn poll_pause(epoch_interval: Duration) -> Duration {
	(epoch_interval / 10).max(MIN_EPOCH_POLL)
}

/// `[start, end)` pages covering `0..count`.
pub fn batches(count: u64, size: u64) -> Vec<(u64, u64)> {
	let size = size.max(1);
	let mut pages = Vec::new();
	let mut start = 0;
	while start < count {
		let end = start.saturating_add(size).min(count);
		pages.push((start, end));
		start = end;
	}
	pages
}

/// Split `getAllMiners` output into its four states. Entry 0 is a sentinel;
/// the groups follow it back to back in the order deregistered,
/// to-deregister, registered, to-register. Bounds past the end of the list
/// are clamped, however large the counts.
pub fn split_miner_list(list: &[MinerId], counts: [u64; 4]) -> MinerList {
	let mut offset = 1usize.min(list.len());
	let mut slices = counts.iter().map(|count| {
		let start = offset;
		let len = usize::try_from(*count).unwrap_or(usize::MAX);
		let end = start.saturating_add(len).min(list.len());
		offset = end;
		list[start..end].to_vec()
	});
	MinerList {
		deregistered: slices.next().unwrap_or_default(),
		to_deregister: slices.next().unwrap_or_default(),
		registered: slices.next().unwrap_or_default(),
		to_register: slices.next().unwrap_or_default(),
	}
}

/// Sort by key, then deal the darknodes round-robin into
/// `ceil(count / size)` groups: sorted position `i` joins group `i mod p`.
/// A size of zero is treated as one.
pub fn assign_mnetworks(mut keyed: Vec<(B256, MinerId)>, size: u64) -> Vec<Vec<MinerId>> {
	if keyed.is_empty() {
		return Vec::new();
	}
	keyed.sort();
	let size = usize::try_from(size.max(1)).unwrap_or(usize::MAX);
	let p = keyed.len().div_ceil(size);
	let mut groups = vec![Vec::new(); p];
	for (i, (_, id)) in keyed.into_iter().enumerate() {
		groups[i % p].push(id);
	}
	groups
}

/// Replace ids with the accounts that registered them, dropping ids no
/// account knows about.
pub fn accounts_for(groups: &[Vec<MinerId>], known: &[Account]) -> Vec<Vec<Account>> {
	groups
		.iter()
		.map(|group| {
			group
				.iter()
				.filter_map(|id| accounts::by_republic(known, id).cloned())
				.collect()
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::migrate::Migrator;
	use crate::networks::NetworkTable;
	use crate::sim::SimChain;
	use crate::contracts::ContractKind;

	fn id(n: u8) -> MinerId {
		MinerId::repeat_byte(n)
	}

	#[test]
	fn batches_cover_the_range() {
		assert_eq!(batches(0, 50), vec![]);
		assert_eq!(batches(50, 50), vec![(0, 50)]);
		assert_eq!(batches(120, 50), vec![(0, 50), (50, 100), (100, 120)]);
	}

	#[test]
	fn miner_list_offsets_start_after_sentinel() {
		let list: Vec<MinerId> = (0..=10).map(id).collect();
		let split = split_miner_list(&list, [2, 3, 4, 1]);
		assert_eq!(split.deregistered, vec![id(1), id(2)]);
		assert_eq!(split.to_deregister, vec![id(3), id(4), id(5)]);
		assert_eq!(split.registered, vec![id(6), id(7), id(8), id(9)]);
		assert_eq!(split.to_register, vec![id(10)]);
	}

	#[test]
	fn miner_list_bounds_are_clamped() {
		let list: Vec<MinerId> = (0..9).map(id).collect();
		let split = split_miner_list(&list, [2, 3, 4, 1]);
		assert_eq!(split.registered.len(), 3);
		assert!(split.to_register.is_empty());

		assert_eq!(split_miner_list(&[], [1, 1, 1, 1]), MinerList::default());
	}

	#[test]
	fn huge_miner_counts_do_not_overflow() {
		let list: Vec<MinerId> = (0..5).map(id).collect();
		let split = split_miner_list(&list, [u64::MAX, 0, 0, 0]);
		assert_eq!(split.deregistered, vec![id(1), id(2), id(3), id(4)]);
		assert!(split.registered.is_empty());

		let split = split_miner_list(&list, [1, u64::MAX, u64::MAX, 1]);
		assert_eq!(split.deregistered, vec![id(1)]);
		assert_eq!(split.to_deregister, vec![id(2), id(3), id(4)]);
		assert!(split.to_register.is_empty());
	}

	#[test]
	fn counts_past_u64_are_malformed() {
		assert_eq!(to_u64(U256::from(7), "count").unwrap(), 7);
		assert!(matches!(to_u64(U256::MAX, "count"), Err(ChainError::Decode(_))));
	}

	#[test]
	fn epoch_pause_has_a_floor() {
		assert_eq!(poll_pause(Duration::from_secs(10)), Duration::from_secs(1));
		assert_eq!(poll_pause(Duration::ZERO), MIN_EPOCH_POLL);
		assert_eq!(poll_pause(Duration::from_millis(50)), MIN_EPOCH_POLL);
	}

	#[test]
	fn mnetworks_are_dealt_round_robin() {
		let keyed: Vec<(B256, MinerId)> = (0..10u8)
			.map(|i| (B256::repeat_byte(i), id(i + 1)))
			.rev()
			.collect();
		let groups = assign_mnetworks(keyed, 3);
		assert_eq!(groups.len(), 4);
		assert_eq!(groups[0], vec![id(1), id(5), id(9)]);
		assert_eq!(groups[1], vec![id(2), id(6), id(10)]);
		assert_eq!(groups[3], vec![id(4), id(8)]);
	}

	#[test]
	fn mnetworks_edge_sizes() {
		assert!(assign_mnetworks(vec![], 3).is_empty());
		let one = assign_mnetworks(vec![(B256::ZERO, id(1))], 0);
		assert_eq!(one, vec![vec![id(1)]]);
	}

	#[test]
	fn accounts_are_matched_by_republic_id() {
		let known: Vec<Account> = (1..=3).map(|i| Account::derive(Address::repeat_byte(i))).collect();
		let groups = vec![vec![known[2].republic, id(0xee)], vec![known[0].republic]];
		let mapped = accounts_for(&groups, &known);
		assert_eq!(mapped[0], vec![known[2].clone()]);
		assert_eq!(mapped[1], vec![known[0].clone()]);
	}

	const BOND: u64 = 1_000;

	/// Migrate onto a fresh simulated chain and hand every non-deployer
	/// account enough REN for two bonds.
	async fn deployed(sim: &SimChain) -> (Address, Address, Vec<Account>) {
		let mut network = NetworkTable::default().resolve("devnet").unwrap();
		network.params.minimum_bond = BOND.to_string();
		network.params.minimum_epoch_interval_seconds = 10;

		let chain_accounts = sim.accounts().await.unwrap();
		let owner = chain_accounts[0];
		let report = Migrator::new(sim, network, owner, "devnet-test".into())
			.run()
			.await
			.unwrap();
		let registry = report.addresses.get(ContractKind::DarknodeRegistryProxy).unwrap();
		let token = report.addresses.get(ContractKind::RenToken).unwrap();

		let ren = ContractHandle::new(sim, owner, token);
		let mut operators = Vec::new();
		for addr in &chain_accounts[1..] {
			ren.send(IERC20::transferCall {
				recipient: *addr,
				value: U256::from(2 * BOND),
			})
			.await
			.unwrap();
			operators.push(Account::derive(*addr));
		}
		(registry, token, operators)
	}

	#[tokio::test(start_paused = true)]
	async fn wait_for_epoch_polls_until_boundary() {
		let sim = SimChain::new();
		let (registry, token, operators) = deployed(&sim).await;
		let driver = RegistryDriver::new(&sim, registry, token, Duration::from_secs(10));

		let before = sim.sent_count("epoch");
		let receipt = driver.wait_for_epoch(operators[0].address).await.unwrap();
		assert!(receipt.ends_with::<Dnr::LogNewEpoch>());
		// The first attempt lands before the interval is up.
		assert!(sim.sent_count("epoch") - before > 1);
	}

	#[tokio::test(start_paused = true)]
	async fn registration_lifecycle() {
		let sim = SimChain::with_accounts(11);
		let (registry, token, operators) = deployed(&sim).await;
		let driver = RegistryDriver::new(&sim, registry, token, Duration::from_secs(10));
		let keeper = operators[0].address;

		driver.register_all(&operators, U256::from(BOND)).await.unwrap();
		let pending = driver.all_miners().await.unwrap();
		assert_eq!(pending.to_register.len(), 10);
		assert_eq!(driver.miner_count().await.unwrap(), 0);

		driver.wait_for_epoch(keeper).await.unwrap();
		let registered = driver.registered_miners().await.unwrap();
		assert_eq!(registered.len(), 10);
		assert_eq!(driver.all_miners().await.unwrap().registered, registered);
		assert_eq!(driver.miner_id(operators[4].address).await.unwrap(), operators[4].republic);
		assert_eq!(driver.public_key(&operators[4].republic).await.unwrap(), operators[4].public_key);

		let groups = driver.mnetworks().await.unwrap();
		assert_eq!(groups.len(), 4);
		let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
		assert_eq!(sizes, vec![3, 3, 2, 2]);
		let mapped = accounts_for(&groups, &operators);
		assert_eq!(mapped.iter().map(Vec::len).sum::<usize>(), 10);

		let leaving = &operators[9..];
		driver.deregister_all(leaving).await.unwrap();
		assert_eq!(driver.all_miners().await.unwrap().to_deregister, vec![leaving[0].republic]);
		driver.wait_for_epoch(keeper).await.unwrap();
		assert_eq!(
			driver.bond_pending_withdrawal(&leaving[0].republic).await.unwrap(),
			U256::from(BOND)
		);

		driver.withdraw_all(leaving).await.unwrap();
		assert_eq!(driver.token_balance(leaving[0].address).await.unwrap(), U256::from(2 * BOND));
		assert_eq!(driver.miner_count().await.unwrap(), 9);
	}

	#[tokio::test(start_paused = true)]
	async fn bond_updates_approve_the_increase() {
		let sim = SimChain::new();
		let (registry, token, operators) = deployed(&sim).await;
		let driver = RegistryDriver::new(&sim, registry, token, Duration::from_secs(10));
		let op = &operators[0];

		driver.register(op, U256::from(BOND)).await.unwrap();
		driver.update_bond(op, U256::from(2 * BOND)).await.unwrap();
		assert_eq!(driver.bond(&op.republic).await.unwrap(), U256::from(2 * BOND));
		assert_eq!(driver.token_balance(op.address).await.unwrap(), U256::ZERO);
		assert_eq!(driver.allowance(op.address).await.unwrap(), U256::ZERO);

		// Below the minimum bond.
		assert!(driver.update_bond(op, U256::from(BOND - 1)).await.is_err());
	}

	#[tokio::test]
	async fn zero_bond_is_rejected_before_sending() {
		let sim = SimChain::new();
		let driver = RegistryDriver::new(&sim, Address::ZERO, Address::ZERO, Duration::from_secs(1));
		let account = Account::derive(Address::repeat_byte(1));
		assert!(matches!(
			driver.register(&account, U256::ZERO).await,
			Err(DriverError::ZeroBond)
		));
		assert!(sim.history().is_empty());
	}
}
