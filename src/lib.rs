pub mod accounts;
pub mod balances;
pub mod chain;
pub mod cli;
pub mod commands;
pub mod config;
pub mod contracts;
pub mod crypto;
pub mod migrate;
pub mod networks;
pub mod registry;
pub mod rpc;
pub mod sim;
