use std::time::Duration;

use anyhow::Result;

use crate::accounts::Account;
use crate::cli::{Cli, RegistryCommand};
use crate::commands::{deployed, load_network, parse_amount, resolve_sender, rpc_client};
use crate::config::Config;
use crate::contracts::ContractKind;
use crate::crypto::MinerId;
use crate::registry::RegistryDriver;

pub async fn run(cli: &Cli, cmd: &RegistryCommand) -> Result<()> {
	let config = Config::load()?;
	let network = load_network(cli, &config)?;
	let rpc = rpc_client(cli, &config)?;

	let registry = deployed(&network, ContractKind::DarknodeRegistryProxy)?;
	let token = deployed(&network, ContractKind::RenToken)?;
	let interval = Duration::from_secs(network.params.minimum_epoch_interval_seconds);
	let driver = RegistryDriver::new(&rpc, registry, token, interval);

	match cmd {
		RegistryCommand::Epoch { wait } => {
			if *wait {
				let from = resolve_sender(cli, &config, &rpc).await?;
				let receipt = driver.wait_for_epoch(from).await?;
				println!("Epoch tx:    {:#x}", receipt.tx_hash);
			}
			println!("Epoch hash:  {:#x}", driver.epoch_blockhash().await?);
			println!("Darknodes:   {}", driver.miner_count().await?);
			Ok(())
		}

		RegistryCommand::Miners => {
			for id in driver.registered_miners().await? {
				println!("{id}");
			}
			Ok(())
		}

		RegistryCommand::AllMiners => {
			let list = driver.all_miners().await?;
			for (label, ids) in [
				("Deregistered", &list.deregistered),
				("To deregister", &list.to_deregister),
				("Registered", &list.registered),
				("To register", &list.to_register),
			] {
				println!("{label} ({}):", ids.len());
				for id in ids {
					println!("  {id}");
				}
			}
			Ok(())
		}

		RegistryCommand::Mnetworks => {
			let groups = driver.mnetworks().await?;
			if groups.is_empty() {
				println!("No registered darknodes.");
			}
			for (i, group) in groups.iter().enumerate() {
				println!("MNetwork {i}:");
				for id in group {
					println!("  {id}");
				}
			}
			Ok(())
		}

		RegistryCommand::Register { bond, public_key } => {
			let from = resolve_sender(cli, &config, &rpc).await?;
			let account = match public_key {
				Some(hex) => {
					let key = hex::decode(hex.trim_start_matches("0x"))
						.map_err(|e| anyhow::anyhow!("invalid public key: {e}"))?;
					Account::new(from, key)
				}
				None => Account::derive(from),
			};
			let receipt = driver.register(&account, parse_amount(bond)?).await?;
			println!("Darknode:    {}", account.republic);
			println!("Transaction: {:#x}", receipt.tx_hash);
			println!("Registration takes effect at the next epoch.");
			Ok(())
		}

		RegistryCommand::Deregister => {
			let account = sender_account(cli, &config, &rpc, &driver).await?;
			let receipt = driver.deregister(&account).await?;
			println!("Transaction: {:#x}", receipt.tx_hash);
			Ok(())
		}

		RegistryCommand::UpdateBond { bond } => {
			let account = sender_account(cli, &config, &rpc, &driver).await?;
			let receipt = driver.update_bond(&account, parse_amount(bond)?).await?;
			println!("Transaction: {:#x}", receipt.tx_hash);
			Ok(())
		}

		RegistryCommand::WithdrawBond => {
			let account = sender_account(cli, &config, &rpc, &driver).await?;
			let receipt = driver.withdraw_bond(&account).await?;
			println!("Transaction: {:#x}", receipt.tx_hash);
			Ok(())
		}

		RegistryCommand::Bond { id } => {
			let id = match id {
				Some(s) => s
					.trim()
					.parse::<MinerId>()
					.map_err(|e| anyhow::anyhow!("invalid darknode ID: {e}"))?,
				None => {
					let from = resolve_sender(cli, &config, &rpc).await?;
					driver.miner_id(from).await?
				}
			};
			println!("Darknode:    {id}");
			println!("Bond:        {}", driver.bond(&id).await?);
			println!("Withdrawable: {}", driver.bond_pending_withdrawal(&id).await?);
			println!("Seed:        {:#x}", driver.seed(&id).await?);
			println!("Public key:  0x{}", hex::encode(driver.public_key(&id).await?));
			Ok(())
		}
	}
}

/// The sender's darknode as registered, with the public key the registry
/// holds for it.
async fn sender_account(
	cli: &Cli,
	config: &Config,
	rpc: &crate::rpc::RpcClient,
	driver: &RegistryDriver<'_>,
) -> Result<Account> {
	let from = resolve_sender(cli, config, rpc).await?;
	let id = driver.miner_id(from).await?;
	if id.is_zero() {
		anyhow::bail!("{from} has no registered darknode");
	}
	Ok(Account {
		address: from,
		public_key: driver.public_key(&id).await?,
		republic: id,
	})
}
