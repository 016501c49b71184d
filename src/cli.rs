use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
	name = "darknode-deploy",
	about = "Deploy the darknode contracts and drive darknodes through their lifecycle.",
	version
)]
pub struct Cli {
	/// Network to operate on. A `-fork` suffix targets a local fork.
	#[arg(long, global = true)]
	pub network: Option<String>,

	/// Override RPC endpoint URL.
	#[arg(long, global = true)]
	pub rpc_url: Option<String>,

	/// Override the network address table.
	#[arg(long, global = true)]
	pub networks: Option<PathBuf>,

	/// Override the compiled artifacts directory.
	#[arg(long, global = true)]
	pub artifacts: Option<PathBuf>,

	/// Account to send transactions from.
	#[arg(long, global = true)]
	pub from: Option<String>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
	/// Deploy missing contracts and repair links between them.
	Migrate {
		/// Revision baked into new contracts' version strings. Defaults to
		/// `git describe --always --long`.
		#[arg(long)]
		revision: Option<String>,

		/// Fail if any reference could not be repaired.
		#[arg(long)]
		strict: bool,

		/// Rehearse on an empty in-memory chain instead of the node.
		#[arg(long)]
		simulate: bool,
	},

	/// Query and drive the darknode registry.
	Registry {
		#[command(subcommand)]
		command: RegistryCommand,
	},

	/// Query and move trader balances.
	Balances {
		#[command(subcommand)]
		command: BalancesCommand,
	},

	/// Check transaction status on-chain.
	Tx {
		#[command(subcommand)]
		command: TxCommand,
	},
}

// -- Registry subcommands --

#[derive(Subcommand)]
pub enum RegistryCommand {
	/// Show the current epoch.
	Epoch {
		/// Call `epoch()` until the next epoch starts.
		#[arg(long)]
		wait: bool,
	},

	/// List darknodes active in the current epoch.
	Miners,

	/// List every darknode grouped by registration state.
	AllMiners,

	/// Show this epoch's mnetworks.
	Mnetworks,

	/// Register the sending account as a darknode.
	Register {
		/// Bond in the token's base units.
		#[arg(long)]
		bond: String,

		/// Darknode public key (hex). Derived from the sender if omitted.
		#[arg(long)]
		public_key: Option<String>,
	},

	/// Deregister the sending account's darknode.
	Deregister,

	/// Change the sending account's bond.
	UpdateBond {
		/// New bond in the token's base units.
		bond: String,
	},

	/// Withdraw the bond of a deregistered darknode.
	WithdrawBond,

	/// Show a darknode's bond and registration details.
	Bond {
		/// Darknode ID (0x-prefixed, 20 bytes). Defaults to the sender's.
		id: Option<String>,
	},
}

// -- Balances subcommands --

#[derive(Subcommand)]
pub enum BalancesCommand {
	/// List a trader's deposited balances.
	Show {
		/// Trader address. Defaults to the sender.
		trader: Option<String>,
	},

	/// Deposit tokens, or the native currency with the zero address.
	Deposit {
		token: String,
		amount: String,
	},

	/// Withdraw previously deposited tokens.
	Withdraw {
		token: String,
		amount: String,
	},
}

// -- Tx subcommands --

#[derive(Subcommand)]
pub enum TxCommand {
	/// Check confirmation status of a transaction.
	Status {
		/// Transaction hash (0x-prefixed).
		tx_hash: String,
	},
}
