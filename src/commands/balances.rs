use anyhow::Result;

use crate::balances::BalancesDriver;
use crate::cli::{BalancesCommand, Cli};
use crate::commands::{deployed, load_network, parse_amount, resolve_sender, rpc_client};
use crate::config::Config;
use crate::contracts::ContractKind;
use crate::crypto::Address;

pub async fn run(cli: &Cli, cmd: &BalancesCommand) -> Result<()> {
	let config = Config::load()?;
	let network = load_network(cli, &config)?;
	let rpc = rpc_client(cli, &config)?;
	let driver = BalancesDriver::new(&rpc, deployed(&network, ContractKind::RenExBalances)?);

	let parse = |s: &str| {
		s.trim()
			.parse::<Address>()
			.map_err(|e| anyhow::anyhow!("invalid address {s}: {e}"))
	};

	match cmd {
		BalancesCommand::Show { trader } => {
			let trader = match trader {
				Some(s) => parse(s)?,
				None => resolve_sender(cli, &config, &rpc).await?,
			};
			let balances = driver.balances(trader).await?;
			if balances.is_empty() {
				println!("No deposits for {trader}");
			}
			for (token, amount) in balances {
				let label = if token == Address::ZERO {
					"native".to_owned()
				} else {
					token.to_checksum(None)
				};
				println!("{label:<44} {amount}");
			}
			Ok(())
		}

		BalancesCommand::Deposit { token, amount } => {
			let trader = resolve_sender(cli, &config, &rpc).await?;
			let receipt = driver
				.deposit(trader, parse(token)?, parse_amount(amount)?)
				.await?;
			println!("Transaction: {:#x}", receipt.tx_hash);
			Ok(())
		}

		BalancesCommand::Withdraw { token, amount } => {
			let trader = resolve_sender(cli, &config, &rpc).await?;
			let receipt = driver
				.withdraw(trader, parse(token)?, parse_amount(amount)?)
				.await?;
			println!("Transaction: {:#x}", receipt.tx_hash);
			Ok(())
		}
	}
}
