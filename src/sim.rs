//! An in-memory chain for rehearsing migrations and exercising the
//! drivers without a node.
//!
//! `SimChain` models only what the tool can observe from outside: owners
//! and pending owners, the pointers between contracts, slash percentages,
//! token balances and allowances, darknode registration states across
//! epochs, payment cycles, and the deposit/withdraw ledger of the balances
//! contract. Each transaction is atomic: a revert leaves the state
//! untouched.
//!
//! Contracts receive raw calldata and answer with ABI-encoded return data,
//! so a malformed call fails here the same way it would against a node.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use alloy::primitives::{keccak256, Bytes, Log, U256};
use alloy::sol_types::{SolCall, SolEvent, SolInterface, SolType};
use tokio::time::Instant;

use crate::chain::{CallRequest, Chain, ChainError, Receipt};
use crate::contracts::{
	ClaimlessRewardsArgs, ContractKind, IClaimable, IDarknodePayment, IDarknodeRegistry, IDarknodeSlasher, IERC20,
	IProtocol, IProxy, IRenExBalances, IRenProxyAdmin, PaymentArgs, RegistryStoreArgs, SlasherArgs,
};
use crate::crypto::{Address, MinerId, B256};

use IClaimable::IClaimableCalls;
use IDarknodePayment::IDarknodePaymentCalls;
use IDarknodeRegistry::IDarknodeRegistryCalls;
use IDarknodeSlasher::IDarknodeSlasherCalls;
use IERC20::IERC20Calls;
use IProtocol::IProtocolCalls;
use IProxy::IProxyCalls;
use IRenExBalances::IRenExBalancesCalls;
use IRenProxyAdmin::IRenProxyAdminCalls;

/// Native balance every simulated account starts with (1,000 ether).
const INITIAL_NATIVE: u128 = 1_000 * 1_000_000_000_000_000_000;
/// RenToken supply minted to the deployer (1 billion, 18 decimals).
const TOKEN_SUPPLY: u128 = 1_000_000_000 * 1_000_000_000_000_000_000;

pub struct SimChain {
	state: Mutex<State>,
}

#[derive(Debug, Clone)]
struct State {
	accounts: Vec<Address>,
	nonce: u64,
	block: u64,
	native: HashMap<Address, U256>,
	contracts: HashMap<Address, Contract>,
	receipts: HashMap<B256, Receipt>,
	/// Signatures of mined transactions, deployments as `new <Name>`.
	history: Vec<String>,
	logs: Vec<Log>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
	PendingRegistration,
	Registered,
	PendingDeregistration,
	Deregistered,
}

#[derive(Debug, Clone)]
struct Darknode {
	id: MinerId,
	operator: Address,
	public_key: Vec<u8>,
	bond: U256,
	seed: B256,
	status: Status,
}

#[derive(Debug, Clone)]
struct Epoch {
	number: u64,
	hash: B256,
	block: u64,
	started: Instant,
}

#[derive(Debug, Clone)]
struct Contract {
	kind: ContractKind,
	owner: Address,
	pending_owner: Address,
	pointers: HashMap<&'static str, Address>,
	numbers: HashMap<&'static str, U256>,
	/// Protocol's name → address registry.
	named: BTreeMap<String, Address>,
	/// ERC-20 ledger.
	balances: HashMap<Address, U256>,
	allowances: HashMap<(Address, Address), U256>,
	/// Payment contract token lists. Pending tokens move over at the next
	/// cycle.
	registered_tokens: Vec<Address>,
	pending_tokens: Vec<Address>,
	darknodes: Vec<Darknode>,
	epoch: Epoch,
	/// Balances contract: (trader, token) → amount, plus per-trader token
	/// order of first deposit.
	deposits: HashMap<(Address, Address), U256>,
	trader_tokens: HashMap<Address, Vec<Address>>,
}

impl Contract {
	fn new(kind: ContractKind, block: u64) -> Self {
		Self {
			kind,
			owner: Address::ZERO,
			pending_owner: Address::ZERO,
			pointers: HashMap::new(),
			numbers: HashMap::new(),
			named: BTreeMap::new(),
			balances: HashMap::new(),
			allowances: HashMap::new(),
			registered_tokens: Vec::new(),
			pending_tokens: Vec::new(),
			darknodes: Vec::new(),
			epoch: Epoch {
				number: 0,
				hash: B256::ZERO,
				block,
				started: Instant::now(),
			},
			deposits: HashMap::new(),
			trader_tokens: HashMap::new(),
		}
	}

	fn pointer(&self, name: &str) -> Address {
		self.pointers.get(name).copied().unwrap_or(Address::ZERO)
	}

	fn number(&self, name: &str) -> U256 {
		self.numbers.get(name).copied().unwrap_or_default()
	}

	fn darknode(&self, id: &MinerId) -> Option<&Darknode> {
		self.darknodes.iter().find(|d| &d.id == id)
	}

	fn darknode_mut(&mut self, id: &MinerId) -> Option<&mut Darknode> {
		self.darknodes.iter_mut().find(|d| &d.id == id)
	}

	fn ids_with(&self, status: Status) -> Vec<MinerId> {
		self.darknodes
			.iter()
			.filter(|d| d.status == status)
			.map(|d| d.id)
			.collect()
	}

	/// Darknodes active in the current epoch.
	fn current(&self) -> Vec<MinerId> {
		self.darknodes
			.iter()
			.filter(|d| matches!(d.status, Status::Registered | Status::PendingDeregistration))
			.map(|d| d.id)
			.collect()
	}
}

/// Sender and attached value of the call being executed.
#[derive(Debug, Clone, Copy)]
struct Msg {
	sender: Address,
	value: U256,
}

impl Msg {
	/// A call made by the contract at `sender` itself.
	fn internal(sender: Address) -> Self {
		Self {
			sender,
			value: U256::ZERO,
		}
	}
}

/// ABI-encoded return data, or a revert reason.
type Exec = Result<Vec<u8>, String>;

impl Default for SimChain {
	fn default() -> Self {
		Self::new()
	}
}

impl SimChain {
	/// A chain with ten funded accounts.
	pub fn new() -> Self {
		Self::with_accounts(10)
	}

	pub fn with_accounts(n: usize) -> Self {
		let accounts: Vec<Address> = (0..n as u64).map(|i| Address::ZERO.create(i)).collect();
		let native = accounts
			.iter()
			.map(|a| (*a, U256::from(INITIAL_NATIVE)))
			.collect();
		Self {
			state: Mutex::new(State {
				accounts,
				nonce: 0,
				block: 1,
				native,
				contracts: HashMap::new(),
				receipts: HashMap::new(),
				history: Vec::new(),
				logs: Vec::new(),
			}),
		}
	}

	fn lock(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Every mined transaction so far, oldest first.
	pub fn history(&self) -> Vec<String> {
		self.lock().history.clone()
	}

	/// Number of mined transactions calling the named function.
	pub fn sent_count(&self, function: &str) -> usize {
		let prefix = format!("{function}(");
		self.lock()
			.history
			.iter()
			.filter(|h| h.starts_with(&prefix))
			.count()
	}

	pub fn native_balance(&self, account: &Address) -> U256 {
		self.lock().native.get(account).copied().unwrap_or_default()
	}
}

#[async_trait::async_trait]
impl Chain for SimChain {
	async fn accounts(&self) -> Result<Vec<Address>, ChainError> {
		Ok(self.lock().accounts.clone())
	}

	async fn deploy(&self, from: Address, kind: ContractKind, args: Bytes) -> Result<Address, ChainError> {
		let mut state = self.lock();
		let mut contract = Contract::new(kind, state.block + 1);
		construct(&mut contract, from, &args)?;

		let address = from.create(state.nonce);
		state.nonce += 1;
		state.block += 1;
		state.contracts.insert(address, contract);
		state.history.push(format!("new {kind}"));
		Ok(address)
	}

	async fn call(&self, request: CallRequest) -> Result<Bytes, ChainError> {
		let mut scratch = self.lock().clone();
		let msg = Msg {
			sender: request.from,
			value: request.value,
		};
		let out = scratch
			.exec(msg, request.to, &request.input)
			.map_err(|reason| reverted(request.signature, reason))?;
		Ok(out.into())
	}

	async fn send(&self, request: CallRequest) -> Result<Receipt, ChainError> {
		let mut state = self.lock();
		let snapshot = state.clone();

		let msg = Msg {
			sender: request.from,
			value: request.value,
		};
		let result = state
			.move_native(request.from, request.to, request.value)
			.and_then(|_| state.exec(msg, request.to, &request.input));
		if let Err(reason) = result {
			*state = snapshot;
			return Err(reverted(request.signature, reason));
		}

		state.block += 1;
		state.nonce += 1;
		let mut seed = state.block.to_be_bytes().to_vec();
		seed.extend_from_slice(request.from.as_slice());
		seed.extend_from_slice(&state.nonce.to_be_bytes());

		let receipt = Receipt {
			tx_hash: keccak256(&seed),
			block_number: state.block,
			contract_address: None,
			status: true,
			logs: std::mem::take(&mut state.logs),
		};
		state.receipts.insert(receipt.tx_hash, receipt.clone());
		state.history.push(request.signature.to_owned());
		Ok(receipt)
	}

	async fn receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, ChainError> {
		Ok(self.lock().receipts.get(&tx_hash).cloned())
	}
}

fn reverted(signature: &str, reason: String) -> ChainError {
	ChainError::Reverted {
		function: signature.to_owned(),
		reason,
	}
}

/// Decode constructor arguments the way the deployed bytecode would and
/// set up the initial storage.
fn construct(contract: &mut Contract, from: Address, args: &[u8]) -> Result<(), alloy::sol_types::Error> {
	use ContractKind::*;
	match contract.kind {
		RenToken => {
			contract.balances.insert(from, U256::from(TOKEN_SUPPLY));
		}
		// Initialized later, the owner stays zero until then.
		Protocol | DarknodeRegistryLogicV1 | DarknodeRegistryProxy => {}
		DarknodeRegistryStore => {
			let (_version, ren) = RegistryStoreArgs::abi_decode_params(args)?;
			contract.owner = from;
			contract.pointers.insert("ren", ren);
		}
		DarknodeSlasher => {
			let (registry,) = SlasherArgs::abi_decode_params(args)?;
			contract.owner = from;
			contract.pointers.insert("darknodeRegistry", registry);
		}
		DarknodePayment => {
			let (_version, registry, store, payout) = PaymentArgs::abi_decode_params(args)?;
			contract.owner = from;
			contract.pointers.insert("darknodeRegistry", registry);
			contract.pointers.insert("store", store);
			contract.numbers.insert("payoutPercent", payout);
		}
		ClaimlessRewards => {
			let (registry, store, fund, numerator) = ClaimlessRewardsArgs::abi_decode_params(args)?;
			contract.owner = from;
			contract.pointers.insert("darknodeRegistry", registry);
			contract.pointers.insert("store", store);
			contract.pointers.insert("communityFund", fund);
			contract.numbers.insert("communityFundNumerator", numerator);
		}
		RenProxyAdmin | ClaimRewards | DarknodePaymentStore | RenExBalances => {
			contract.owner = from;
		}
	}
	Ok(())
}

impl State {
	fn contract(&self, at: Address) -> Result<&Contract, String> {
		self.contracts
			.get(&at)
			.ok_or_else(|| format!("no contract at {at}"))
	}

	fn contract_mut(&mut self, at: Address) -> Result<&mut Contract, String> {
		self.contracts
			.get_mut(&at)
			.ok_or_else(|| format!("no contract at {at}"))
	}

	fn move_native(&mut self, from: Address, to: Address, value: U256) -> Result<(), String> {
		if value.is_zero() {
			return Ok(());
		}
		let balance = self.native.get(&from).copied().unwrap_or_default();
		let left = balance
			.checked_sub(value)
			.ok_or("insufficient native balance")?;
		self.native.insert(from, left);
		*self.native.entry(to).or_default() += value;
		Ok(())
	}

	fn exec(&mut self, msg: Msg, to: Address, input: &[u8]) -> Exec {
		match self.contract(to)?.kind {
			ContractKind::DarknodeRegistryProxy => self.exec_proxy(msg, to, input),
			kind => self.exec_as(kind, msg, to, input),
		}
	}

	/// Run `input` with the behaviour of `kind` against the storage at `at`.
	fn exec_as(&mut self, kind: ContractKind, msg: Msg, at: Address, input: &[u8]) -> Exec {
		if let Some(out) = self.exec_claimable(kind, msg, at, input)? {
			return Ok(out);
		}
		use ContractKind::*;
		match kind {
			RenProxyAdmin => self.exec_proxy_admin(msg, at, input),
			Protocol => self.exec_protocol(msg, at, input),
			RenToken => self.exec_token(msg, at, input),
			DarknodeRegistryStore => match decode::<IDarknodeRegistryCalls>(input)? {
				Some(IDarknodeRegistryCalls::ren(_)) => {
					Ok(ret::<IDarknodeRegistry::renCall>(self.contract(at)?.pointer("ren")))
				}
				_ => unknown(kind, input),
			},
			DarknodeRegistryLogicV1 => self.exec_registry(msg, at, input),
			DarknodeSlasher => self.exec_slasher(msg, at, input),
			DarknodePayment => self.exec_payment(msg, at, input),
			RenExBalances => self.exec_balances(msg, at, input),
			ClaimRewards | DarknodePaymentStore | ClaimlessRewards | DarknodeRegistryProxy => unknown(kind, input),
		}
	}

	fn exec_claimable(&mut self, kind: ContractKind, msg: Msg, at: Address, input: &[u8]) -> Result<Option<Vec<u8>>, String> {
		if matches!(kind, ContractKind::RenToken | ContractKind::RenExBalances) {
			return Ok(None);
		}
		let Some(call) = decode::<IClaimableCalls>(input)? else {
			return Ok(None);
		};
		let contract = self.contract_mut(at)?;
		let out = match call {
			IClaimableCalls::owner(_) => ret::<IClaimable::ownerCall>(contract.owner),
			IClaimableCalls::pendingOwner(_) => ret::<IClaimable::pendingOwnerCall>(contract.pending_owner),
			IClaimableCalls::transferOwnership(call) => {
				only_owner(contract, msg)?;
				contract.pending_owner = call.new_owner;
				Vec::new()
			}
			IClaimableCalls::claimOwnership(_) => {
				if contract.pending_owner == Address::ZERO || msg.sender != contract.pending_owner {
					return Err("caller is not the pending owner".into());
				}
				contract.owner = msg.sender;
				contract.pending_owner = Address::ZERO;
				Vec::new()
			}
		};
		Ok(Some(out))
	}

	// -- Proxies --

	fn exec_proxy(&mut self, msg: Msg, at: Address, input: &[u8]) -> Exec {
		if let Some(IProxyCalls::initialize(init)) = decode::<IProxyCalls>(input)? {
			let proxy = self.contract_mut(at)?;
			if proxy.pointer("implementation") != Address::ZERO {
				return Err("proxy already initialized".into());
			}
			proxy.pointers.insert("implementation", init.logic);
			proxy.pointers.insert("admin", init.admin);

			if !init.data.is_empty() {
				let kind = self.contract(init.logic)?.kind;
				self.exec_as(kind, msg, at, &init.data)?;
			}
			return Ok(Vec::new());
		}

		let implementation = self.contract(at)?.pointer("implementation");
		if implementation == Address::ZERO {
			return Err("proxy has no implementation".into());
		}
		let kind = self.contract(implementation)?.kind;
		self.exec_as(kind, msg, at, input)
	}

	fn exec_proxy_admin(&mut self, msg: Msg, at: Address, input: &[u8]) -> Exec {
		match decode::<IRenProxyAdminCalls>(input)? {
			Some(IRenProxyAdminCalls::getProxyImplementation(call)) => {
				let proxy = self.contract(call.proxy)?;
				Ok(ret::<IRenProxyAdmin::getProxyImplementationCall>(proxy.pointer("implementation")))
			}
			Some(IRenProxyAdminCalls::upgrade(call)) => {
				only_owner(self.contract(at)?, msg)?;
				self.contract(call.implementation)?;
				let proxy = self.contract_mut(call.proxy)?;
				if proxy.pointer("admin") != at {
					return Err("not the proxy's admin".into());
				}
				proxy.pointers.insert("implementation", call.implementation);
				Ok(Vec::new())
			}
			None => unknown(ContractKind::RenProxyAdmin, input),
		}
	}

	// -- Protocol --

	fn exec_protocol(&mut self, msg: Msg, at: Address, input: &[u8]) -> Exec {
		let Some(call) = decode::<IProtocolCalls>(input)? else {
			return unknown(ContractKind::Protocol, input);
		};
		let protocol = self.contract_mut(at)?;
		match call {
			IProtocolCalls::__Protocol_init(call) => {
				if protocol.owner != Address::ZERO {
					return Err("already initialized".into());
				}
				protocol.owner = call.admin;
				Ok(Vec::new())
			}
			IProtocolCalls::getContract(call) => {
				let target = protocol.named.get(&call.name).copied().unwrap_or(Address::ZERO);
				Ok(ret::<IProtocol::getContractCall>(target))
			}
			IProtocolCalls::updateContract(call) => {
				only_owner(protocol, msg)?;
				protocol.named.insert(call.name, call.target);
				Ok(Vec::new())
			}
		}
	}

	// -- ERC-20 --

	fn exec_token(&mut self, msg: Msg, at: Address, input: &[u8]) -> Exec {
		match decode::<IERC20Calls>(input)? {
			Some(IERC20Calls::balanceOf(call)) => {
				let balance = self.contract(at)?.balances.get(&call.holder).copied().unwrap_or_default();
				Ok(ret::<IERC20::balanceOfCall>(balance))
			}
			Some(IERC20Calls::allowance(call)) => {
				let allowed = self.allowance(at, call.holder, call.spender)?;
				Ok(ret::<IERC20::allowanceCall>(allowed))
			}
			Some(IERC20Calls::approve(call)) => {
				self.contract_mut(at)?
					.allowances
					.insert((msg.sender, call.spender), call.value);
				Ok(ret::<IERC20::approveCall>(true))
			}
			Some(IERC20Calls::transfer(call)) => {
				self.token_move(at, msg.sender, call.recipient, call.value)?;
				Ok(ret::<IERC20::transferCall>(true))
			}
			None => unknown(ContractKind::RenToken, input),
		}
	}

	fn token_move(&mut self, token: Address, from: Address, to: Address, amount: U256) -> Result<(), String> {
		let ledger = &mut self.contract_mut(token)?.balances;
		let balance = ledger.get(&from).copied().unwrap_or_default();
		let left = balance
			.checked_sub(amount)
			.ok_or("transfer amount exceeds balance")?;
		ledger.insert(from, left);
		*ledger.entry(to).or_default() += amount;
		Ok(())
	}

	fn token_pull(&mut self, token: Address, spender: Address, from: Address, amount: U256) -> Result<(), String> {
		let contract = self.contract_mut(token)?;
		if contract.kind != ContractKind::RenToken {
			return Err("not a token".into());
		}
		let allowed = contract
			.allowances
			.get(&(from, spender))
			.copied()
			.unwrap_or_default();
		let left = allowed
			.checked_sub(amount)
			.ok_or("transfer amount exceeds allowance")?;
		contract.allowances.insert((from, spender), left);
		self.token_move(token, from, spender, amount)
	}

	fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, String> {
		Ok(self
			.contract(token)?
			.allowances
			.get(&(owner, spender))
			.copied()
			.unwrap_or_default())
	}

	// -- Darknode registry --

	fn exec_registry(&mut self, msg: Msg, at: Address, input: &[u8]) -> Exec {
		use IDarknodeRegistryCalls as Call;
		let Some(call) = decode::<Call>(input)? else {
			return unknown(ContractKind::DarknodeRegistryLogicV1, input);
		};
		let block = self.block;
		match call {
			Call::initialize(init) => {
				let registry = self.contract_mut(at)?;
				if registry.owner != Address::ZERO {
					return Err("already initialized".into());
				}
				registry.owner = msg.sender;
				registry.pointers.insert("ren", init.ren);
				registry.pointers.insert("store", init.store);
				registry.numbers.insert("minimumBond", init.minimum_bond);
				registry.numbers.insert("minimumPodSize", init.minimum_pod_size);
				registry.numbers.insert("minimumEpochInterval", init.minimum_epoch_interval_seconds);
				registry.numbers.insert("deregistrationInterval", init.deregistration_interval);
				registry.epoch = Epoch {
					number: 0,
					hash: epoch_hash(at, block, 0),
					block,
					started: Instant::now(),
				};
				Ok(Vec::new())
			}
			Call::ren(_) => Ok(ret::<IDarknodeRegistry::renCall>(self.contract(at)?.pointer("ren"))),
			Call::slasher(_) => Ok(ret::<IDarknodeRegistry::slasherCall>(self.contract(at)?.pointer("slasher"))),
			Call::nextSlasher(_) => {
				Ok(ret::<IDarknodeRegistry::nextSlasherCall>(self.contract(at)?.pointer("nextSlasher")))
			}
			Call::darknodePayment(_) => {
				Ok(ret::<IDarknodeRegistry::darknodePaymentCall>(self.contract(at)?.pointer("darknodePayment")))
			}
			Call::updateSlasher(call) => {
				let registry = self.contract_mut(at)?;
				only_owner(registry, msg)?;
				registry.pointers.insert("nextSlasher", call.next_slasher);
				Ok(Vec::new())
			}
			Call::updateDarknodePayment(call) => {
				let registry = self.contract_mut(at)?;
				only_owner(registry, msg)?;
				registry.pointers.insert("darknodePayment", call.payment);
				Ok(Vec::new())
			}
			Call::claimStoreOwnership(_) => {
				let store = self.contract(at)?.pointer("store");
				self.exec(Msg::internal(at), store, &IClaimable::claimOwnershipCall {}.abi_encode())
			}
			Call::transferStoreOwnership(call) => {
				only_owner(self.contract(at)?, msg)?;
				self.hand_over_store(at, call.next_registry)
			}
			Call::epoch(_) => self.advance_epoch(at),
			Call::getCurrentEpoch(_) => {
				let epoch = &self.contract(at)?.epoch;
				Ok(IDarknodeRegistry::getCurrentEpochCall::abi_encode_returns(
					&IDarknodeRegistry::getCurrentEpochReturn {
						epochhash: U256::from_be_slice(epoch.hash.as_slice()),
						blocktime: U256::from(epoch.block),
					},
				))
			}
			Call::getNumberOfMiners(_) => {
				let count = self.contract(at)?.current().len();
				Ok(ret::<IDarknodeRegistry::getNumberOfMinersCall>(U256::from(count)))
			}
			Call::getCurrentMiners(call) => {
				let current = self.contract(at)?.current();
				let start = clamp(call.start, current.len());
				let end = clamp(call.end, current.len()).max(start);
				Ok(ret::<IDarknodeRegistry::getCurrentMinersCall>(current[start..end].to_vec()))
			}
			Call::getAllMiners(_) => {
				let registry = self.contract(at)?;
				let groups = [
					registry.ids_with(Status::Deregistered),
					registry.ids_with(Status::PendingDeregistration),
					registry.ids_with(Status::Registered),
					registry.ids_with(Status::PendingRegistration),
				];
				// Index 0 is an empty sentinel entry.
				let mut list = vec![MinerId::ZERO];
				for group in &groups {
					list.extend_from_slice(group);
				}
				Ok(IDarknodeRegistry::getAllMinersCall::abi_encode_returns(
					&IDarknodeRegistry::getAllMinersReturn {
						list,
						deregistered: U256::from(groups[0].len()),
						to_deregister: U256::from(groups[1].len()),
						registered: U256::from(groups[2].len()),
						to_register: U256::from(groups[3].len()),
					},
				))
			}
			Call::getMNetworkSize(_) => {
				let size = self.contract(at)?.number("minimumPodSize");
				Ok(ret::<IDarknodeRegistry::getMNetworkSizeCall>(size))
			}
			Call::getBond(call) => {
				let bond = self.contract(at)?.darknode(&call.darknode_id).map(|d| d.bond);
				Ok(ret::<IDarknodeRegistry::getBondCall>(bond.unwrap_or_default()))
			}
			Call::getBondPendingWithdrawal(call) => {
				let bond = self
					.contract(at)?
					.darknode(&call.darknode_id)
					.filter(|d| d.status == Status::Deregistered)
					.map(|d| d.bond);
				Ok(ret::<IDarknodeRegistry::getBondPendingWithdrawalCall>(bond.unwrap_or_default()))
			}
			Call::getSeed(call) => {
				let seed = self.contract(at)?.darknode(&call.darknode_id).map(|d| d.seed);
				Ok(ret::<IDarknodeRegistry::getSeedCall>(seed.unwrap_or_default()))
			}
			Call::getPublicKey(call) => {
				let key = self
					.contract(at)?
					.darknode(&call.darknode_id)
					.map(|d| d.public_key.clone())
					.unwrap_or_default();
				Ok(ret::<IDarknodeRegistry::getPublicKeyCall>(key.into()))
			}
			Call::getMinerID(call) => {
				let id = self
					.contract(at)?
					.darknodes
					.iter()
					.find(|d| d.operator == call.operator)
					.map(|d| d.id)
					.unwrap_or_default();
				Ok(ret::<IDarknodeRegistry::getMinerIDCall>(id))
			}
			Call::register(call) => self.register(msg, at, call.darknode_id, call.public_key.to_vec()),
			Call::deregister(call) => {
				let node = self
					.contract_mut(at)?
					.darknode_mut(&call.darknode_id)
					.ok_or("darknode not registered")?;
				if node.operator != msg.sender {
					return Err("must be darknode owner".into());
				}
				if node.status != Status::Registered {
					return Err("must be registered".into());
				}
				node.status = Status::PendingDeregistration;
				Ok(Vec::new())
			}
			Call::updateBond(call) => {
				let (ren, minimum) = {
					let registry = self.contract(at)?;
					(registry.pointer("ren"), registry.number("minimumBond"))
				};
				let node = self
					.contract(at)?
					.darknode(&call.darknode_id)
					.ok_or("darknode not registered")?
					.clone();
				if node.operator != msg.sender {
					return Err("must be darknode owner".into());
				}
				if call.bond > node.bond {
					self.token_pull(ren, at, msg.sender, call.bond - node.bond)?;
				} else if call.bond < node.bond {
					if call.bond < minimum {
						return Err("bond below minimum".into());
					}
					self.token_move(ren, at, msg.sender, node.bond - call.bond)?;
				}
				if let Some(d) = self.contract_mut(at)?.darknode_mut(&call.darknode_id) {
					d.bond = call.bond;
				}
				Ok(Vec::new())
			}
			Call::withdrawBond(call) => {
				let id = call.darknode_id;
				let ren = self.contract(at)?.pointer("ren");
				let node = self
					.contract(at)?
					.darknode(&id)
					.ok_or("darknode not registered")?
					.clone();
				if node.operator != msg.sender {
					return Err("must be darknode owner".into());
				}
				if node.status != Status::Deregistered || node.bond.is_zero() {
					return Err("nothing to withdraw".into());
				}
				self.token_move(ren, at, msg.sender, node.bond)?;
				self.contract_mut(at)?.darknodes.retain(|d| d.id != id);
				Ok(Vec::new())
			}
		}
	}

	fn register(&mut self, msg: Msg, at: Address, id: MinerId, public_key: Vec<u8>) -> Exec {
		if id == MinerId::ZERO {
			return Err("invalid darknode ID".into());
		}
		let (ren, minimum, existing) = {
			let registry = self.contract(at)?;
			(
				registry.pointer("ren"),
				registry.number("minimumBond"),
				registry.darknode(&id).cloned(),
			)
		};
		let carried = match &existing {
			Some(d) if d.status == Status::Deregistered && d.operator == msg.sender => d.bond,
			Some(_) => return Err("darknode already registered".into()),
			None => U256::ZERO,
		};

		let pulled = self.allowance(ren, msg.sender, at)?;
		let bond = carried + pulled;
		if bond.is_zero() || bond < minimum {
			return Err("insufficient bond".into());
		}
		if !pulled.is_zero() {
			self.token_pull(ren, at, msg.sender, pulled)?;
		}

		let mut seed_input = public_key.clone();
		seed_input.extend_from_slice(id.as_slice());
		let registry = self.contract_mut(at)?;
		registry.darknodes.retain(|d| d.id != id);
		registry.darknodes.push(Darknode {
			id,
			operator: msg.sender,
			public_key,
			bond,
			seed: keccak256(&seed_input),
			status: Status::PendingRegistration,
		});
		Ok(Vec::new())
	}

	/// `epoch()` only moves on once the minimum interval has passed; calling
	/// it earlier succeeds without a log. A new epoch also starts a new
	/// payment cycle when a payment contract is linked.
	fn advance_epoch(&mut self, at: Address) -> Exec {
		let block = self.block;
		let registry = self.contract_mut(at)?;
		let seconds = u64::try_from(registry.number("minimumEpochInterval")).unwrap_or(u64::MAX);
		if registry.epoch.started.elapsed() < Duration::from_secs(seconds) {
			return Ok(Vec::new());
		}

		let number = registry.epoch.number + 1;
		let hash = epoch_hash(at, block, number);
		registry.epoch = Epoch {
			number,
			hash,
			block,
			started: Instant::now(),
		};
		for node in &mut registry.darknodes {
			node.status = match node.status {
				Status::PendingRegistration => Status::Registered,
				Status::PendingDeregistration => Status::Deregistered,
				other => other,
			};
		}
		let next = registry.pointer("nextSlasher");
		if next != Address::ZERO {
			registry.pointers.insert("slasher", next);
			registry.pointers.remove("nextSlasher");
		}

		let payment = registry.pointer("darknodePayment");
		if payment != Address::ZERO {
			self.exec(Msg::internal(at), payment, &IDarknodePayment::changeCycleCall {}.abi_encode())?;
		}

		self.logs.push(Log::new_unchecked(
			at,
			vec![IDarknodeRegistry::LogNewEpoch::SIGNATURE_HASH, hash],
			Bytes::new(),
		));
		Ok(Vec::new())
	}

	/// The store owner at `parent` passes its store to `next`, which claims
	/// it in the same transaction.
	fn hand_over_store(&mut self, parent: Address, next: Address) -> Exec {
		let store = self.contract(parent)?.pointer("store");
		let transfer = IClaimable::transferOwnershipCall { new_owner: next }.abi_encode();
		self.exec(Msg::internal(parent), store, &transfer)?;
		self.exec(Msg::internal(parent), next, &IDarknodePayment::claimStoreOwnershipCall {}.abi_encode())
	}

	// -- Slasher --

	fn exec_slasher(&mut self, msg: Msg, at: Address, input: &[u8]) -> Exec {
		use IDarknodeSlasherCalls as Call;
		let Some(call) = decode::<Call>(input)? else {
			return unknown(ContractKind::DarknodeSlasher, input);
		};
		let slasher = self.contract_mut(at)?;
		let (key, percent) = match call {
			Call::darknodeRegistry(_) => {
				return Ok(ret::<IDarknodeSlasher::darknodeRegistryCall>(slasher.pointer("darknodeRegistry")));
			}
			Call::updateDarknodeRegistry(call) => {
				only_owner(slasher, msg)?;
				slasher.pointers.insert("darknodeRegistry", call.registry);
				return Ok(Vec::new());
			}
			Call::blacklistSlashPercent(_) => {
				return Ok(ret::<IDarknodeSlasher::blacklistSlashPercentCall>(slasher.number("blacklist")));
			}
			Call::maliciousSlashPercent(_) => {
				return Ok(ret::<IDarknodeSlasher::maliciousSlashPercentCall>(slasher.number("malicious")));
			}
			Call::secretRevealSlashPercent(_) => {
				return Ok(ret::<IDarknodeSlasher::secretRevealSlashPercentCall>(slasher.number("secretReveal")));
			}
			Call::setBlacklistSlashPercent(call) => ("blacklist", call.percentage),
			Call::setMaliciousSlashPercent(call) => ("malicious", call.percentage),
			Call::setSecretRevealSlashPercent(call) => ("secretReveal", call.percentage),
		};
		only_owner(slasher, msg)?;
		if percent > U256::from(100) {
			return Err("invalid percentage".into());
		}
		slasher.numbers.insert(key, percent);
		Ok(Vec::new())
	}

	// -- Darknode payment --

	fn exec_payment(&mut self, msg: Msg, at: Address, input: &[u8]) -> Exec {
		use IDarknodePaymentCalls as Call;
		let Some(call) = decode::<Call>(input)? else {
			return unknown(ContractKind::DarknodePayment, input);
		};
		match call {
			Call::darknodeRegistry(_) => {
				let registry = self.contract(at)?.pointer("darknodeRegistry");
				Ok(ret::<IDarknodePayment::darknodeRegistryCall>(registry))
			}
			Call::cycleChanger(_) => {
				Ok(ret::<IDarknodePayment::cycleChangerCall>(self.contract(at)?.pointer("cycleChanger")))
			}
			Call::updateCycleChanger(call) => {
				let payment = self.contract_mut(at)?;
				only_owner(payment, msg)?;
				payment.pointers.insert("cycleChanger", call.changer);
				Ok(Vec::new())
			}
			Call::registeredTokenIndex(call) => {
				let index = self
					.contract(at)?
					.registered_tokens
					.iter()
					.position(|t| *t == call.token)
					.map_or(0, |i| i + 1);
				Ok(ret::<IDarknodePayment::registeredTokenIndexCall>(U256::from(index)))
			}
			Call::tokenPendingRegistration(call) => {
				let pending = self.contract(at)?.pending_tokens.contains(&call.token);
				Ok(ret::<IDarknodePayment::tokenPendingRegistrationCall>(pending))
			}
			Call::registerToken(call) => {
				let payment = self.contract_mut(at)?;
				only_owner(payment, msg)?;
				if payment.registered_tokens.contains(&call.token) || payment.pending_tokens.contains(&call.token) {
					return Err("token already registered".into());
				}
				payment.pending_tokens.push(call.token);
				Ok(Vec::new())
			}
			Call::changeCycle(_) => {
				let payment = self.contract_mut(at)?;
				if msg.sender != payment.pointer("cycleChanger") {
					return Err("not cycle changer".into());
				}
				let pending = std::mem::take(&mut payment.pending_tokens);
				payment.registered_tokens.extend(pending);
				let cycle = payment.number("cycle") + U256::from(1);
				payment.numbers.insert("cycle", cycle);
				Ok(ret::<IDarknodePayment::changeCycleCall>(cycle))
			}
			Call::claimStoreOwnership(_) => {
				let store = self.contract(at)?.pointer("store");
				self.exec(Msg::internal(at), store, &IClaimable::claimOwnershipCall {}.abi_encode())
			}
			Call::transferStoreOwnership(call) => {
				only_owner(self.contract(at)?, msg)?;
				self.hand_over_store(at, call.next_payment)
			}
		}
	}

	// -- Trader balances --

	fn exec_balances(&mut self, msg: Msg, at: Address, input: &[u8]) -> Exec {
		match decode::<IRenExBalancesCalls>(input)? {
			Some(IRenExBalancesCalls::deposit(call)) => {
				if call.token == Address::ZERO {
					if msg.value != call.value {
						return Err("mismatched value parameter and tx value".into());
					}
				} else {
					if !msg.value.is_zero() {
						return Err("unexpected ether transfer".into());
					}
					self.token_pull(call.token, at, msg.sender, call.value)?;
				}
				let ledger = self.contract_mut(at)?;
				let order = ledger.trader_tokens.entry(msg.sender).or_default();
				if !order.contains(&call.token) {
					order.push(call.token);
				}
				*ledger.deposits.entry((msg.sender, call.token)).or_default() += call.value;
				Ok(Vec::new())
			}
			Some(IRenExBalancesCalls::withdraw(call)) => {
				let ledger = self.contract_mut(at)?;
				let held = ledger
					.deposits
					.get(&(msg.sender, call.token))
					.copied()
					.unwrap_or_default();
				let left = held
					.checked_sub(call.value)
					.ok_or("insufficient balance")?;
				ledger.deposits.insert((msg.sender, call.token), left);
				if call.token == Address::ZERO {
					self.move_native(at, msg.sender, call.value)?;
				} else {
					self.token_move(call.token, at, msg.sender, call.value)?;
				}
				Ok(Vec::new())
			}
			Some(IRenExBalancesCalls::getBalances(call)) => {
				let ledger = self.contract(at)?;
				let tokens = ledger.trader_tokens.get(&call.trader).cloned().unwrap_or_default();
				let amounts = tokens
					.iter()
					.map(|t| ledger.deposits.get(&(call.trader, *t)).copied().unwrap_or_default())
					.collect();
				Ok(IRenExBalances::getBalancesCall::abi_encode_returns(
					&IRenExBalances::getBalancesReturn { tokens, amounts },
				))
			}
			None => unknown(ContractKind::RenExBalances, input),
		}
	}
}

// -- Helpers --

/// Decode calldata addressed to interface `I`. `None` when the selector is
/// not one of its functions.
fn decode<I: SolInterface>(input: &[u8]) -> Result<Option<I>, String> {
	let selector: [u8; 4] = match input.get(..4) {
		Some(s) => s.try_into().map_err(|_| "calldata shorter than a selector")?,
		None => return Err("calldata shorter than a selector".into()),
	};
	if !I::valid_selector(selector) {
		return Ok(None);
	}
	I::abi_decode(input).map(Some).map_err(|e| format!("bad calldata: {e}"))
}

fn ret<C: SolCall>(value: C::Return) -> Vec<u8> {
	C::abi_encode_returns(&value)
}

fn only_owner(contract: &Contract, msg: Msg) -> Result<(), String> {
	if contract.owner == Address::ZERO || contract.owner != msg.sender {
		return Err("caller is not the owner".into());
	}
	Ok(())
}

fn unknown(kind: ContractKind, input: &[u8]) -> Exec {
	let selector = input.get(..4).unwrap_or(input);
	Err(format!("{kind} has no function 0x{}", hex::encode(selector)))
}

fn epoch_hash(at: Address, block: u64, number: u64) -> B256 {
	let mut input = at.as_slice().to_vec();
	input.extend_from_slice(&block.to_be_bytes());
	input.extend_from_slice(&number.to_be_bytes());
	keccak256(&input)
}

fn clamp(v: U256, len: usize) -> usize {
	u64::try_from(v)
		.ok()
		.and_then(|v| usize::try_from(v).ok())
		.map_or(len, |v| v.min(len))
}
