//! Migration scenarios against the in-memory chain.

use alloy::primitives::U256;
use alloy::sol_types::SolType;
use darknode_deploy::chain::{Chain, ContractHandle};
use darknode_deploy::contracts::{
	ContractKind, IClaimable, IDarknodePayment, IDarknodeRegistry, IDarknodeSlasher, IProtocol, IRenProxyAdmin,
	PaymentArgs, PaymentStoreArgs,
};
use darknode_deploy::crypto::Address;
use darknode_deploy::migrate::{MigrationReport, Migrator, OwnershipLink};
use darknode_deploy::networks::{NetworkTable, ResolvedNetwork};
use darknode_deploy::sim::SimChain;

const VERSION: &str = "devnet-v0.1.0-0-gtest";

fn devnet() -> ResolvedNetwork {
	NetworkTable::parse(
		r#"
[networks.devnet.tokens]
DAI = "0x6B175474E89094C44Da98b954EedeAC495271d0F"
"#,
	)
	.unwrap()
	.resolve("devnet")
	.unwrap()
}

async fn migrate(sim: &SimChain, network: ResolvedNetwork) -> MigrationReport {
	let owner = sim.accounts().await.unwrap()[0];
	Migrator::new(sim, network, owner, VERSION.into())
		.run()
		.await
		.unwrap()
}

/// Run on the addresses a previous report recorded, as an operator would
/// after pasting the summary back into the table.
fn with_addresses(report: &MigrationReport) -> ResolvedNetwork {
	let mut network = devnet();
	network.addresses = report.addresses.clone();
	network
}

fn addr(report: &MigrationReport, kind: ContractKind) -> Address {
	report.addresses.get(kind).unwrap()
}

async fn owner_of(sim: &SimChain, contract: Address) -> Address {
	ContractHandle::new(sim, Address::ZERO, contract)
		.call(IClaimable::ownerCall {})
		.await
		.unwrap()
}

#[tokio::test]
async fn fresh_deploy_wires_everything() {
	let sim = SimChain::new();
	let deployer = sim.accounts().await.unwrap()[0];
	let report = migrate(&sim, devnet()).await;

	for kind in ContractKind::MIGRATED {
		assert!(report.addresses.get(kind).is_some(), "{kind} not deployed");
	}
	assert!(report.unresolved.is_empty());
	assert_eq!(
		report.links,
		vec![
			(ContractKind::DarknodeRegistryStore, OwnershipLink::Claimed),
			(ContractKind::DarknodePaymentStore, OwnershipLink::Claimed),
		]
	);

	let registry = addr(&report, ContractKind::DarknodeRegistryProxy);
	assert_eq!(owner_of(&sim, addr(&report, ContractKind::DarknodeRegistryStore)).await, registry);
	assert_eq!(
		owner_of(&sim, addr(&report, ContractKind::DarknodePaymentStore)).await,
		addr(&report, ContractKind::DarknodePayment)
	);
	assert_eq!(owner_of(&sim, addr(&report, ContractKind::Protocol)).await, deployer);
	assert_eq!(owner_of(&sim, registry).await, deployer);

	let protocol = ContractHandle::new(&sim, deployer, addr(&report, ContractKind::Protocol));
	assert_eq!(
		protocol
			.call(IProtocol::getContractCall {
				name: "DarknodeRegistry".into(),
			})
			.await
			.unwrap(),
		registry
	);

	let dnr = ContractHandle::new(&sim, deployer, registry);
	assert_eq!(
		dnr.call(IDarknodeRegistry::nextSlasherCall {}).await.unwrap(),
		addr(&report, ContractKind::DarknodeSlasher)
	);
	assert_eq!(
		dnr.call(IDarknodeRegistry::darknodePaymentCall {}).await.unwrap(),
		addr(&report, ContractKind::DarknodePayment)
	);
}

#[tokio::test]
async fn rerun_performs_no_actions() {
	let sim = SimChain::new();
	let first = migrate(&sim, devnet()).await;
	assert!(first.actions > 0);
	let sent = sim.history().len();

	let second = migrate(&sim, with_addresses(&first)).await;
	assert_eq!(second.actions, 0);
	assert_eq!(second.addresses, first.addresses);
	assert_eq!(sim.history().len(), sent, "rerun sent transactions");
	assert!(second
		.links
		.iter()
		.all(|(_, link)| *link == OwnershipLink::AlreadyOwned));
}

#[tokio::test]
async fn token_is_registered_once() {
	let sim = SimChain::new();
	let first = migrate(&sim, devnet()).await;
	migrate(&sim, with_addresses(&first)).await;
	assert_eq!(sim.sent_count("registerToken"), 1);
}

#[tokio::test]
async fn protocol_initialization_is_not_an_update() {
	let sim = SimChain::new();
	let first = migrate(&sim, devnet()).await;
	let old_protocol = addr(&first, ContractKind::Protocol);

	let mut network = devnet();
	for (kind, a) in first.addresses.iter() {
		if kind != ContractKind::Protocol {
			network.addresses.set(kind, a);
		}
	}

	// Deploying the new Protocol and pointing it at the registry.
	let second = migrate(&sim, network).await;
	assert_eq!(second.actions, 2);
	let protocol = addr(&second, ContractKind::Protocol);
	assert_ne!(protocol, old_protocol);
	assert_eq!(sim.sent_count("__Protocol_init"), 2);
	assert_eq!(owner_of(&sim, protocol).await, sim.accounts().await.unwrap()[0]);
}

#[tokio::test]
async fn registered_token_is_left_alone() {
	let sim = SimChain::new();
	let mut network = devnet();
	network.params.minimum_epoch_interval_seconds = 0;
	let dai = network.tokens[0].1;
	let first = migrate(&sim, network).await;
	assert_eq!(sim.sent_count("registerToken"), 1);

	// The next epoch starts a payment cycle, which moves the pending token
	// into the registered list.
	let deployer = sim.accounts().await.unwrap()[0];
	ContractHandle::new(&sim, deployer, addr(&first, ContractKind::DarknodeRegistryProxy))
		.send(IDarknodeRegistry::epochCall {})
		.await
		.unwrap();
	let dnp = ContractHandle::new(&sim, deployer, addr(&first, ContractKind::DarknodePayment));
	assert_eq!(
		dnp.call(IDarknodePayment::registeredTokenIndexCall { token: dai }).await.unwrap(),
		U256::from(1)
	);
	assert!(!dnp.call(IDarknodePayment::tokenPendingRegistrationCall { token: dai }).await.unwrap());

	let second = migrate(&sim, with_addresses(&first)).await;
	assert_eq!(second.actions, 0);
	assert_eq!(sim.sent_count("registerToken"), 1);
}

#[tokio::test]
async fn interrupted_store_link_only_claims() {
	let sim = SimChain::new();
	let first = migrate(&sim, devnet()).await;
	let deployer = sim.accounts().await.unwrap()[0];
	let registry = addr(&first, ContractKind::DarknodeRegistryProxy);

	// A previous run deployed a new payment pair and started the store
	// transfer, then stopped before the claim.
	let store = sim
		.deploy(
			deployer,
			ContractKind::DarknodePaymentStore,
			PaymentStoreArgs::abi_encode_params(&(VERSION.to_owned(),)).into(),
		)
		.await
		.unwrap();
	let payment = sim
		.deploy(
			deployer,
			ContractKind::DarknodePayment,
			PaymentArgs::abi_encode_params(&(VERSION.to_owned(), registry, store, U256::from(50))).into(),
		)
		.await
		.unwrap();
	ContractHandle::new(&sim, deployer, store)
		.send(IClaimable::transferOwnershipCall { new_owner: payment })
		.await
		.unwrap();
	let transfers = sim.sent_count("transferOwnership");

	let mut network = with_addresses(&first);
	network.addresses.set(ContractKind::DarknodePaymentStore, store);
	network.addresses.set(ContractKind::DarknodePayment, payment);
	let second = migrate(&sim, network).await;

	assert!(second
		.links
		.contains(&(ContractKind::DarknodePaymentStore, OwnershipLink::Claimed)));
	assert_eq!(sim.sent_count("transferOwnership"), transfers);
	assert_eq!(owner_of(&sim, store).await, payment);

	let third = migrate(&sim, with_addresses(&second)).await;
	assert_eq!(third.actions, 0);
}

#[tokio::test]
async fn proxy_is_upgraded_to_new_logic() {
	let sim = SimChain::new();
	let first = migrate(&sim, devnet()).await;
	let old_logic = addr(&first, ContractKind::DarknodeRegistryLogicV1);

	let mut network = devnet();
	for (kind, a) in first.addresses.iter() {
		if kind != ContractKind::DarknodeRegistryLogicV1 {
			network.addresses.set(kind, a);
		}
	}

	let second = migrate(&sim, network).await;
	let new_logic = addr(&second, ContractKind::DarknodeRegistryLogicV1);
	assert_ne!(new_logic, old_logic);
	// Initializing the new logic and upgrading; the bare deploy is not counted.
	assert_eq!(second.actions, 2);

	let deployer = sim.accounts().await.unwrap()[0];
	let admin = ContractHandle::new(&sim, deployer, addr(&second, ContractKind::RenProxyAdmin));
	assert_eq!(
		admin
			.call(IRenProxyAdmin::getProxyImplementationCall {
				proxy: addr(&second, ContractKind::DarknodeRegistryProxy),
			})
			.await
			.unwrap(),
		new_logic
	);
}

#[tokio::test]
async fn drifted_slash_percent_is_reset() {
	let sim = SimChain::new();
	let first = migrate(&sim, devnet()).await;
	let deployer = sim.accounts().await.unwrap()[0];
	let slasher = ContractHandle::new(&sim, deployer, addr(&first, ContractKind::DarknodeSlasher));

	slasher
		.send(IDarknodeSlasher::setMaliciousSlashPercentCall {
			percentage: U256::from(10),
		})
		.await
		.unwrap();

	let second = migrate(&sim, with_addresses(&first)).await;
	assert_eq!(second.actions, 1);
	assert_eq!(
		slasher.call(IDarknodeSlasher::maliciousSlashPercentCall {}).await.unwrap(),
		U256::from(50)
	);
}

#[tokio::test]
async fn store_moves_from_old_registry() {
	let sim = SimChain::new();
	let first = migrate(&sim, devnet()).await;
	let old_registry = addr(&first, ContractKind::DarknodeRegistryProxy);
	let store = addr(&first, ContractKind::DarknodeRegistryStore);

	let mut network = devnet();
	for (kind, a) in first.addresses.iter() {
		if kind != ContractKind::DarknodeRegistryProxy {
			network.addresses.set(kind, a);
		}
	}

	let second = migrate(&sim, network).await;
	let registry = addr(&second, ContractKind::DarknodeRegistryProxy);
	assert_ne!(registry, old_registry);
	assert_eq!(owner_of(&sim, store).await, registry);

	// The old registry's handover already claimed for the new one.
	let (kind, link) = &second.links[0];
	assert_eq!(*kind, ContractKind::DarknodeRegistryStore);
	assert!(matches!(link, OwnershipLink::ClaimFailed { .. }), "{link:?}");

	let deployer = sim.accounts().await.unwrap()[0];
	let slasher = ContractHandle::new(&sim, deployer, addr(&second, ContractKind::DarknodeSlasher));
	assert_eq!(slasher.call(IDarknodeSlasher::darknodeRegistryCall {}).await.unwrap(), registry);
	let payment = ContractHandle::new(&sim, deployer, addr(&second, ContractKind::DarknodePayment));
	assert_eq!(payment.call(IDarknodePayment::cycleChangerCall {}).await.unwrap(), registry);

	// Only the payment contract's registry pointer is left, and that is
	// reported rather than acted on.
	let third = migrate(&sim, with_addresses(&second)).await;
	assert_eq!(third.actions, 0);
	let flagged: Vec<ContractKind> = third.unresolved.iter().map(|u| u.contract).collect();
	assert_eq!(flagged, vec![ContractKind::DarknodePayment]);
}

#[tokio::test]
async fn wrong_token_is_reported_not_fixed() {
	let sim = SimChain::new();
	let first = migrate(&sim, devnet()).await;

	let mut network = devnet();
	for (kind, a) in first.addresses.iter() {
		if kind != ContractKind::RenToken {
			network.addresses.set(kind, a);
		}
	}

	let second = migrate(&sim, network).await;
	assert_ne!(
		addr(&second, ContractKind::RenToken),
		addr(&first, ContractKind::RenToken)
	);
	let flagged: Vec<ContractKind> = second.unresolved.iter().map(|u| u.contract).collect();
	assert_eq!(
		flagged,
		vec![ContractKind::DarknodeRegistryProxy, ContractKind::DarknodeRegistryStore]
	);
	assert!(second.unresolved[0].message.contains("wrong REN token"));
}

#[tokio::test]
async fn summary_reflects_deployed_addresses() {
	let sim = SimChain::new();
	let report = migrate(&sim, devnet()).await;

	let table = NetworkTable::parse(&report.summary()).unwrap();
	let parsed = table.resolve("devnet").unwrap();
	assert_eq!(parsed.addresses, report.addresses);
}
