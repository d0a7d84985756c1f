pub mod abi_registry;
pub mod backfill;
pub mod config;
pub mod database;
pub mod error;
pub mod helper;
pub mod token;
