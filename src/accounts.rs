use alloy::primitives::keccak256;

use crate::crypto::{self, Address, MinerId};

/// A darknode operator as seen by the lifecycle driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
	/// The Ethereum account that sends transactions and holds the bond.
	pub address: Address,
	/// Public key registered with the darknode.
	pub public_key: Vec<u8>,
	/// Republic ID, the registry's key for this darknode.
	pub republic: MinerId,
}

impl Account {
	pub fn new(address: Address, public_key: Vec<u8>) -> Self {
		let republic = crypto::republic_id(&public_key);
		Self {
			address,
			public_key,
			republic,
		}
	}

	/// Derive a stable test identity for a node-managed address. The
	/// public key is `keccak256("darknode" || address)` widened to 64 bytes.
	pub fn derive(address: Address) -> Self {
		let mut seed = b"darknode".to_vec();
		seed.extend_from_slice(address.as_slice());
		let first = keccak256(&seed);
		let second = keccak256(first);

		let mut public_key = Vec::with_capacity(64);
		public_key.extend_from_slice(first.as_slice());
		public_key.extend_from_slice(second.as_slice());
		Self::new(address, public_key)
	}
}

/// Find the account registered under `republic`.
pub fn by_republic<'a>(accounts: &'a [Account], republic: &MinerId) -> Option<&'a Account> {
	accounts.iter().find(|a| &a.republic == republic)
}
