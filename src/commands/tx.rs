use anyhow::Result;

use crate::chain::{Chain, Receipt};
use crate::cli::{Cli, TxCommand};
use crate::commands::rpc_client;
use crate::config::Config;
use crate::contracts::IDarknodeRegistry::LogNewEpoch;
use crate::crypto::B256;

pub async fn run(cli: &Cli, cmd: &TxCommand) -> Result<()> {
	let config = Config::load()?;
	let rpc = rpc_client(cli, &config)?;

	match cmd {
		TxCommand::Status { tx_hash } => {
			let hash: B256 = tx_hash
				.trim()
				.parse()
				.map_err(|e| anyhow::anyhow!("invalid hash: {e}"))?;
			match rpc.receipt(hash).await? {
				Some(receipt) => {
					let tip = rpc.block_number().await?;
					println!("Transaction: {tx_hash}");
					println!("Status:      {}", status(&receipt));
					println!("Block:       {}", receipt.block_number);
					println!("Confirmations: {}", tip.saturating_sub(receipt.block_number) + 1);
					println!("Logs:        {}", receipt.logs.len());
					if receipt.ends_with::<LogNewEpoch>() {
						println!("Started a new epoch.");
					}
				}
				None => println!("Transaction not found or pending: {tx_hash}"),
			}
			Ok(())
		}
	}
}

fn status(receipt: &Receipt) -> &'static str {
	if receipt.status {
		"Success"
	} else {
		"Reverted"
	}
}
