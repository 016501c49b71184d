use std::fmt;

use alloy::sol;

/// Every contract the tool knows how to deploy or drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContractKind {
	RenProxyAdmin,
	Protocol,
	RenToken,
	ClaimRewards,
	DarknodeRegistryStore,
	DarknodeRegistryLogicV1,
	DarknodeRegistryProxy,
	DarknodeSlasher,
	DarknodePaymentStore,
	DarknodePayment,
	ClaimlessRewards,
	RenExBalances,
}

impl ContractKind {
	/// Contracts managed by the migration, in deployment order.
	pub const MIGRATED: [ContractKind; 11] = [
		Self::RenProxyAdmin,
		Self::Protocol,
		Self::RenToken,
		Self::ClaimRewards,
		Self::DarknodeRegistryStore,
		Self::DarknodeRegistryLogicV1,
		Self::DarknodeRegistryProxy,
		Self::DarknodeSlasher,
		Self::DarknodePaymentStore,
		Self::DarknodePayment,
		Self::ClaimlessRewards,
	];

	/// Name of the compiled artifact (`<name>.json`) holding the bytecode.
	pub fn artifact(&self) -> &'static str {
		match self {
			Self::RenProxyAdmin => "RenProxyAdmin",
			Self::Protocol => "Protocol",
			Self::RenToken => "RenToken",
			Self::ClaimRewards => "ClaimRewards",
			Self::DarknodeRegistryStore => "DarknodeRegistryStore",
			Self::DarknodeRegistryLogicV1 => "DarknodeRegistryLogicV1",
			Self::DarknodeRegistryProxy => "DarknodeRegistryProxy",
			Self::DarknodeSlasher => "DarknodeSlasher",
			Self::DarknodePaymentStore => "DarknodePaymentStore",
			Self::DarknodePayment => "DarknodePayment",
			Self::ClaimlessRewards => "ClaimlessRewards",
			Self::RenExBalances => "RenExBalances",
		}
	}

	pub fn from_artifact(name: &str) -> Option<Self> {
		Self::MIGRATED
			.into_iter()
			.chain([Self::RenExBalances])
			.find(|k| k.artifact() == name)
	}
}

impl fmt::Display for ContractKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.artifact())
	}
}

// -- Constructor arguments --

/// `DarknodeRegistryStore(version, ren)`
pub type RegistryStoreArgs = sol! { tuple(string, address) };
/// `DarknodeSlasher(registry)`
pub type SlasherArgs = sol! { tuple(address,) };
/// `DarknodePaymentStore(version)`
pub type PaymentStoreArgs = sol! { tuple(string,) };
/// `DarknodePayment(version, registry, store, payoutPercent)`
pub type PaymentArgs = sol! { tuple(string, address, address, uint256) };
/// `ClaimlessRewards(registry, store, communityFund, communityFundNumerator)`
pub type ClaimlessRewardsArgs = sol! { tuple(address, address, address, uint256) };

// -- Entry points --

sol! {
	/// Two-step ownership shared by the stores, the registry logic, the
	/// slasher, the payment contract and the protocol.
	interface IClaimable {
		function owner() external view returns (address);
		function pendingOwner() external view returns (address);
		function transferOwnership(address new_owner) external;
		function claimOwnership() external;
	}

	interface IRenProxyAdmin {
		function getProxyImplementation(address proxy) external view returns (address);
		function upgrade(address proxy, address implementation) external;
	}

	interface IProxy {
		function initialize(address logic, address admin, bytes data) external payable;
	}

	interface IProtocol {
		function __Protocol_init(address admin) external;
		function getContract(string name) external view returns (address);
		function updateContract(string name, address target) external;
	}

	interface IERC20 {
		function balanceOf(address holder) external view returns (uint256);
		function allowance(address holder, address spender) external view returns (uint256);
		function approve(address spender, uint256 value) external returns (bool);
		function transfer(address recipient, uint256 value) external returns (bool);
	}

	/// The registry logic, always called through the proxy.
	interface IDarknodeRegistry {
		/// Logged by `epoch()` when it crosses an epoch boundary.
		event LogNewEpoch(uint256 indexed epochhash);

		function initialize(
			string version,
			address ren,
			address store,
			uint256 minimum_bond,
			uint256 minimum_pod_size,
			uint256 minimum_epoch_interval_seconds,
			uint256 deregistration_interval
		) external;
		function ren() external view returns (address);
		function claimStoreOwnership() external;
		function transferStoreOwnership(address next_registry) external;
		function slasher() external view returns (address);
		function nextSlasher() external view returns (address);
		function updateSlasher(address next_slasher) external;
		function darknodePayment() external view returns (address);
		function updateDarknodePayment(address payment) external;

		function epoch() external;
		function getCurrentEpoch() external view returns (uint256 epochhash, uint256 blocktime);
		function getNumberOfMiners() external view returns (uint256);
		function getCurrentMiners(uint256 start, uint256 end) external view returns (bytes20[]);
		function getAllMiners() external view returns (
			bytes20[] list,
			uint256 deregistered,
			uint256 to_deregister,
			uint256 registered,
			uint256 to_register
		);
		function getMNetworkSize() external view returns (uint256);

		function register(bytes20 darknode_id, bytes public_key) external;
		function deregister(bytes20 darknode_id) external;
		function updateBond(bytes20 darknode_id, uint256 bond) external;
		function withdrawBond(bytes20 darknode_id) external;
		function getBond(bytes20 darknode_id) external view returns (uint256);
		function getBondPendingWithdrawal(bytes20 darknode_id) external view returns (uint256);
		function getMinerID(address operator) external view returns (bytes20);
		function getSeed(bytes20 darknode_id) external view returns (bytes32);
		function getPublicKey(bytes20 darknode_id) external view returns (bytes);
	}

	interface IDarknodeSlasher {
		function darknodeRegistry() external view returns (address);
		function updateDarknodeRegistry(address registry) external;
		function blacklistSlashPercent() external view returns (uint256);
		function setBlacklistSlashPercent(uint256 percentage) external;
		function maliciousSlashPercent() external view returns (uint256);
		function setMaliciousSlashPercent(uint256 percentage) external;
		function secretRevealSlashPercent() external view returns (uint256);
		function setSecretRevealSlashPercent(uint256 percentage) external;
	}

	interface IDarknodePayment {
		function darknodeRegistry() external view returns (address);
		function registeredTokenIndex(address token) external view returns (uint256);
		function tokenPendingRegistration(address token) external view returns (bool);
		function registerToken(address token) external;
		function cycleChanger() external view returns (address);
		function updateCycleChanger(address changer) external;
		/// Called by the cycle changer; registers pending tokens.
		function changeCycle() external returns (uint256);
		function claimStoreOwnership() external;
		function transferStoreOwnership(address next_payment) external;
	}

	interface IRenExBalances {
		function deposit(address token, uint256 value) external payable;
		function withdraw(address token, uint256 value) external;
		function getBalances(address trader) external view returns (address[] tokens, uint256[] amounts);
	}
}
