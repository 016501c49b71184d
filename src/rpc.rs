use std::path::{Path, PathBuf};

use alloy::primitives::{Bytes, TxKind};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{TransactionInput, TransactionReceipt, TransactionRequest};
use alloy::transports::http::reqwest::Url;
use alloy::transports::TransportError;
use serde_json::Value;

use crate::chain::{CallRequest, Chain, ChainError, Receipt};
use crate::contracts::ContractKind;
use crate::crypto::{Address, B256};

/// Ethereum JSON-RPC client for a node that manages its own accounts
/// (Ganache, Hardhat, or a Geth node with unlocked keys).
///
/// The provider runs without fillers: nonce, gas and chain id are left to
/// the node, which also signs. Compiled bytecode for deployments is read
/// from Truffle-style artifacts: `<artifacts>/<ContractName>.json` with a
/// `bytecode` field.
pub struct RpcClient {
	url: String,
	provider: DynProvider,
	artifacts: PathBuf,
}

impl RpcClient {
	pub fn new(url: &str, artifacts: impl Into<PathBuf>) -> Result<Self, ChainError> {
		let parsed: Url = url
			.parse()
			.map_err(|e| ChainError::Decode(format!("invalid RPC URL {url}: {e}")))?;
		let provider = ProviderBuilder::new()
			.disable_recommended_fillers()
			.connect_http(parsed)
			.erased();
		Ok(Self {
			url: url.to_owned(),
			provider,
			artifacts: artifacts.into(),
		})
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	pub async fn block_number(&self) -> Result<u64, ChainError> {
		Ok(self.provider.get_block_number().await?)
	}

	/// Submit a transaction and block until it is mined.
	async fn submit(&self, tx: TransactionRequest, label: &str) -> Result<Receipt, ChainError> {
		let pending = self
			.provider
			.send_transaction(tx)
			.await
			.map_err(|e| rejected(label, e))?;
		let receipt = to_receipt(&pending.get_receipt().await?);
		if !receipt.status {
			return Err(ChainError::Reverted {
				function: label.to_owned(),
				reason: format!("transaction {} failed", receipt.tx_hash),
			});
		}
		Ok(receipt)
	}
}

#[async_trait::async_trait]
impl Chain for RpcClient {
	async fn accounts(&self) -> Result<Vec<Address>, ChainError> {
		Ok(self.provider.get_accounts().await?)
	}

	async fn deploy(&self, from: Address, kind: ContractKind, args: Bytes) -> Result<Address, ChainError> {
		let mut code = load_bytecode(&self.artifacts, kind.artifact())?;
		code.extend_from_slice(&args);
		let mut tx = TransactionRequest::default()
			.from(from)
			.input(TransactionInput::both(code.into()));
		tx.to = Some(TxKind::Create);

		let receipt = self.submit(tx, kind.artifact()).await?;
		receipt.contract_address.ok_or_else(|| {
			ChainError::Decode(format!("deployment of {kind} has no contract address"))
		})
	}

	async fn call(&self, request: CallRequest) -> Result<Bytes, ChainError> {
		self.provider
			.call(transaction(&request))
			.await
			.map_err(|e| rejected(request.signature, e))
	}

	async fn send(&self, request: CallRequest) -> Result<Receipt, ChainError> {
		self.submit(transaction(&request), request.signature).await
	}

	async fn receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, ChainError> {
		let receipt = self.provider.get_transaction_receipt(tx_hash).await?;
		Ok(receipt.as_ref().map(to_receipt))
	}
}

// -- Private helpers --

/// The node-signed transaction for a call. Value is only set when non-zero.
fn transaction(request: &CallRequest) -> TransactionRequest {
	let tx = TransactionRequest::default()
		.from(request.from)
		.to(request.to)
		.input(TransactionInput::both(request.input.clone()));
	if request.value.is_zero() {
		tx
	} else {
		tx.value(request.value)
	}
}

/// An error object from the node means the call or transaction was
/// rejected; dev nodes report reverts this way at submission time.
fn rejected(function: &str, e: TransportError) -> ChainError {
	match e.as_error_resp() {
		Some(payload) => ChainError::Reverted {
			function: function.to_owned(),
			reason: payload.message.to_string(),
		},
		None => ChainError::Transport(e),
	}
}

fn to_receipt(receipt: &TransactionReceipt) -> Receipt {
	Receipt {
		tx_hash: receipt.transaction_hash,
		block_number: receipt.block_number.unwrap_or_default(),
		contract_address: receipt.contract_address,
		status: receipt.status(),
		logs: receipt.inner.logs().iter().map(|l| l.inner.clone()).collect(),
	}
}

fn load_bytecode(dir: &Path, artifact: &str) -> Result<Vec<u8>, ChainError> {
	let path = dir.join(format!("{artifact}.json"));
	let content = std::fs::read_to_string(&path)
		.map_err(|e| ChainError::Artifact(artifact.to_owned(), format!("{}: {e}", path.display())))?;
	let json: Value = serde_json::from_str(&content)
		.map_err(|e| ChainError::Artifact(artifact.to_owned(), e.to_string()))?;
	let code = json
		.get("bytecode")
		.and_then(Value::as_str)
		.ok_or_else(|| ChainError::Artifact(artifact.to_owned(), "no bytecode field".into()))?;
	let bytes = hex::decode(code.strip_prefix("0x").unwrap_or(code))
		.map_err(|e| ChainError::Artifact(artifact.to_owned(), format!("bad bytecode hex: {e}")))?;
	if bytes.is_empty() {
		return Err(ChainError::Artifact(artifact.to_owned(), "bytecode is empty (abstract contract?)".into()));
	}
	Ok(bytes)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::contracts::IERC20;
	use alloy::primitives::U256;
	use alloy::sol_types::SolCall;

	#[test]
	fn calls_become_node_signed_transactions() {
		let from = Address::repeat_byte(1);
		let to = Address::repeat_byte(2);
		let call = IERC20::approveCall {
			spender: from,
			value: U256::from(5),
		};

		let tx = transaction(&CallRequest::new(from, to, &call));
		assert_eq!(tx.from, Some(from));
		assert_eq!(tx.to, Some(TxKind::Call(to)));
		assert_eq!(tx.value, None);
		assert_eq!(tx.input.input(), Some(&Bytes::from(call.abi_encode())));

		let paying = transaction(&CallRequest::new(from, to, &call).with_value(U256::from(7)));
		assert_eq!(paying.value, Some(U256::from(7)));
	}

	#[test]
	fn bad_url_is_rejected() {
		assert!(matches!(RpcClient::new("not a url", "build"), Err(ChainError::Decode(_))));
	}

	#[test]
	fn bytecode_is_read_from_artifact() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("RenToken.json"), r#"{"bytecode": "0x6080604052"}"#).unwrap();
		std::fs::write(dir.path().join("Abstract.json"), r#"{"bytecode": "0x"}"#).unwrap();

		assert_eq!(load_bytecode(dir.path(), "RenToken").unwrap(), vec![0x60, 0x80, 0x60, 0x40, 0x52]);
		assert!(matches!(load_bytecode(dir.path(), "Abstract"), Err(ChainError::Artifact(..))));
		assert!(matches!(load_bytecode(dir.path(), "Missing"), Err(ChainError::Artifact(..))));
	}
}
