use alloy::primitives::{Bytes, Log, U256};
use alloy::providers::PendingTransactionError;
use alloy::sol_types::{SolCall, SolEvent};
use alloy::transports::TransportError;
use thiserror::Error;

use crate::contracts::ContractKind;
use crate::crypto::{Address, B256};

#[derive(Debug, Error)]
pub enum ChainError {
	#[error("transport error: {0}")]
	Transport(#[from] TransportError),
	#[error("transaction not confirmed: {0}")]
	Pending(#[from] PendingTransactionError),
	#[error("{function} reverted: {reason}")]
	Reverted { function: String, reason: String },
	#[error("abi: {0}")]
	Abi(#[from] alloy::sol_types::Error),
	#[error("unexpected RPC response: {0}")]
	Decode(String),
	#[error("artifact {0}: {1}")]
	Artifact(String, String),
}

/// A message call against a deployed contract, already ABI-encoded.
#[derive(Debug, Clone)]
pub struct CallRequest {
	pub from: Address,
	pub to: Address,
	pub value: U256,
	pub input: Bytes,
	/// Canonical signature of the called function, for errors and logs.
	pub signature: &'static str,
}

impl CallRequest {
	pub fn new<C: SolCall>(from: Address, to: Address, call: &C) -> Self {
		Self {
			from,
			to,
			value: U256::ZERO,
			input: call.abi_encode().into(),
			signature: C::SIGNATURE,
		}
	}

	pub fn with_value(mut self, value: U256) -> Self {
		self.value = value;
		self
	}
}

/// A mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
	pub tx_hash: B256,
	pub block_number: u64,
	pub contract_address: Option<Address>,
	/// False when the transaction was mined but reverted.
	pub status: bool,
	pub logs: Vec<Log>,
}

impl Receipt {
	/// Whether the final log of the transaction is the event `E`.
	pub fn ends_with<E: SolEvent>(&self) -> bool {
		self.logs
			.last()
			.is_some_and(|l| l.topics().first() == Some(&E::SIGNATURE_HASH))
	}
}

/// The chain as seen by the orchestrator and the drivers.
///
/// Every method is a single round-trip (or a submit-and-wait for
/// transactions); there are no retries or timeouts at this layer.
#[async_trait::async_trait]
pub trait Chain: Send + Sync {
	/// Accounts the node can send from. The first is the deployer.
	async fn accounts(&self) -> Result<Vec<Address>, ChainError>;

	/// Deploy `kind` with ABI-encoded constructor arguments and return the
	/// new contract's address.
	async fn deploy(&self, from: Address, kind: ContractKind, args: Bytes) -> Result<Address, ChainError>;

	/// Simulate a call without submitting a transaction; returns the raw
	/// return data.
	async fn call(&self, request: CallRequest) -> Result<Bytes, ChainError>;

	/// Submit a transaction and wait for it to be mined. A revert is an
	/// error.
	async fn send(&self, request: CallRequest) -> Result<Receipt, ChainError>;

	/// Look up a previously submitted transaction.
	async fn receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, ChainError>;
}

// -- Contract handles --

/// Typed calls and transactions against one contract from a fixed sender.
pub struct ContractHandle<'a> {
	chain: &'a dyn Chain,
	from: Address,
	to: Address,
}

impl<'a> ContractHandle<'a> {
	pub fn new(chain: &'a dyn Chain, from: Address, to: Address) -> Self {
		Self { chain, from, to }
	}

	pub async fn call<C: SolCall>(&self, call: C) -> Result<C::Return, ChainError> {
		let out = self
			.chain
			.call(CallRequest::new(self.from, self.to, &call))
			.await?;
		Ok(C::abi_decode_returns(&out)?)
	}

	pub async fn send<C: SolCall>(&self, call: C) -> Result<Receipt, ChainError> {
		self.chain
			.send(CallRequest::new(self.from, self.to, &call))
			.await
	}

	/// Send with native currency attached.
	pub async fn send_with_value<C: SolCall>(&self, call: C, value: U256) -> Result<Receipt, ChainError> {
		self.chain
			.send(CallRequest::new(self.from, self.to, &call).with_value(value))
			.await
	}
}
