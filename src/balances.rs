use alloy::primitives::U256;

use crate::chain::{Chain, ChainError, ContractHandle, Receipt};
use crate::contracts::{IRenExBalances, IERC20};
use crate::crypto::Address;

/// Deposits and withdrawals against a trader balances contract. The zero
/// token address stands for the chain's native currency.
pub struct BalancesDriver<'a> {
	chain: &'a dyn Chain,
	balances: Address,
}

impl<'a> BalancesDriver<'a> {
	pub fn new(chain: &'a dyn Chain, balances: Address) -> Self {
		Self { chain, balances }
	}

	fn contract(&self, trader: Address) -> ContractHandle<'a> {
		ContractHandle::new(self.chain, trader, self.balances)
	}

	/// Deposit `amount` of `token` for `trader`. ERC-20 deposits are approved
	/// first; native deposits attach the amount as value.
	pub async fn deposit(&self, trader: Address, token: Address, amount: U256) -> Result<Receipt, ChainError> {
		let deposit = IRenExBalances::depositCall { token, value: amount };
		if token == Address::ZERO {
			return self.contract(trader).send_with_value(deposit, amount).await;
		}
		ContractHandle::new(self.chain, trader, token)
			.send(IERC20::approveCall {
				spender: self.balances,
				value: amount,
			})
			.await?;
		self.contract(trader).send(deposit).await
	}

	/// Fails when `amount` exceeds what `trader` has deposited.
	pub async fn withdraw(&self, trader: Address, token: Address, amount: U256) -> Result<Receipt, ChainError> {
		self.contract(trader)
			.send(IRenExBalances::withdrawCall { token, value: amount })
			.await
	}

	/// Every token `trader` has deposited, with its current balance.
	pub async fn balances(&self, trader: Address) -> Result<Vec<(Address, U256)>, ChainError> {
		let out = self
			.contract(trader)
			.call(IRenExBalances::getBalancesCall { trader })
			.await?;
		if out.tokens.len() != out.amounts.len() {
			return Err(ChainError::Decode(format!(
				"getBalances returned {} tokens but {} amounts",
				out.tokens.len(),
				out.amounts.len()
			)));
		}
		Ok(out.tokens.into_iter().zip(out.amounts).collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::contracts::ContractKind;
	use crate::sim::SimChain;
	use alloy::primitives::Bytes;

	const ETHER: u128 = 1_000_000_000_000_000_000;

	async fn setup(sim: &SimChain) -> (Address, Address, Address) {
		let accounts = sim.accounts().await.unwrap();
		let trader = accounts[1];
		let token = sim.deploy(accounts[0], ContractKind::RenToken, Bytes::new()).await.unwrap();
		ContractHandle::new(sim, accounts[0], token)
			.send(IERC20::transferCall {
				recipient: trader,
				value: U256::from(500),
			})
			.await
			.unwrap();
		let balances = sim
			.deploy(accounts[0], ContractKind::RenExBalances, Bytes::new())
			.await
			.unwrap();
		(trader, token, balances)
	}

	#[tokio::test]
	async fn token_and_native_deposits() {
		let sim = SimChain::new();
		let (trader, token, balances) = setup(&sim).await;
		let driver = BalancesDriver::new(&sim, balances);

		driver.deposit(trader, Address::ZERO, U256::from(ETHER)).await.unwrap();
		driver.deposit(trader, token, U256::from(200)).await.unwrap();
		driver.deposit(trader, token, U256::from(100)).await.unwrap();

		assert_eq!(
			driver.balances(trader).await.unwrap(),
			vec![(Address::ZERO, U256::from(ETHER)), (token, U256::from(300))]
		);
		assert_eq!(sim.native_balance(&balances), U256::from(ETHER));

		driver.withdraw(trader, token, U256::from(300)).await.unwrap();
		driver.withdraw(trader, Address::ZERO, U256::from(ETHER)).await.unwrap();
		assert_eq!(
			driver.balances(trader).await.unwrap(),
			vec![(Address::ZERO, U256::ZERO), (token, U256::ZERO)]
		);
		assert_eq!(sim.native_balance(&balances), U256::ZERO);
	}

	#[tokio::test]
	async fn withdrawal_beyond_balance_fails() {
		let sim = SimChain::new();
		let (trader, token, balances) = setup(&sim).await;
		let driver = BalancesDriver::new(&sim, balances);

		driver.deposit(trader, token, U256::from(100)).await.unwrap();
		let err = driver.withdraw(trader, token, U256::from(101)).await.unwrap_err();
		assert!(matches!(err, ChainError::Reverted { .. }), "{err}");
		assert_eq!(driver.balances(trader).await.unwrap(), vec![(token, U256::from(100))]);
	}

	#[tokio::test]
	async fn unfunded_token_deposit_fails() {
		let sim = SimChain::new();
		let (trader, token, balances) = setup(&sim).await;
		let driver = BalancesDriver::new(&sim, balances);
		assert!(driver.deposit(trader, token, U256::from(501)).await.is_err());
		assert!(driver.balances(trader).await.unwrap().is_empty());
	}
}
