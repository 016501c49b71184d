use alloy::primitives::{keccak256, FixedBytes};

pub use alloy::primitives::{Address, B256};

/// The republic identifier a darknode is registered under on-chain.
pub type MinerId = FixedBytes<20>;

// -- Darknode identity --

/// Republic ID: the first 20 bytes of `keccak256(public_key)`.
pub fn republic_id(public_key: &[u8]) -> MinerId {
	MinerId::from_slice(&keccak256(public_key)[..20])
}

/// Per-epoch sort key for a darknode: `keccak256(seed || epoch_hash)`.
pub fn mnetwork_sort_key(seed: &B256, epoch_hash: &B256) -> B256 {
	keccak256([seed.as_slice(), epoch_hash.as_slice()].concat())
}

// -- Parsing --

/// Parse an address where the empty string means "not yet deployed".
/// Case is not validated.
pub fn parse_optional_address(s: &str) -> Result<Option<Address>, String> {
	let s = s.trim();
	if s.is_empty() {
		return Ok(None);
	}
	s.parse::<Address>()
		.map(Some)
		.map_err(|e| format!("invalid address {s:?}: {e}"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::address;

	#[test]
	fn republic_id_is_hash_prefix() {
		let key = [7u8; 64];
		assert_eq!(republic_id(&key).as_slice(), &keccak256(key)[..20]);
	}

	#[test]
	fn addresses_print_checksummed() {
		for expected in [
			"0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
			"0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
		] {
			let addr = parse_optional_address(&expected.to_lowercase()).unwrap().unwrap();
			assert_eq!(addr.to_checksum(None), expected);
		}
	}

	#[test]
	fn empty_string_is_undeployed() {
		assert_eq!(parse_optional_address("").unwrap(), None);
		assert_eq!(parse_optional_address("  ").unwrap(), None);
		assert_eq!(
			parse_optional_address("0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB").unwrap(),
			Some(address!("0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB"))
		);
		assert!(parse_optional_address("0x1234").is_err());
	}

	#[test]
	fn sort_key_depends_on_epoch() {
		let seed = B256::repeat_byte(7);
		let a = mnetwork_sort_key(&seed, &B256::repeat_byte(1));
		let b = mnetwork_sort_key(&seed, &B256::repeat_byte(2));
		assert_ne!(a, b);
		assert_eq!(a, mnetwork_sort_key(&seed, &B256::repeat_byte(1)));
	}
}
