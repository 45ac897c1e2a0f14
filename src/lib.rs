pub mod anchor;
pub mod config;
pub mod database;
pub mod error;
pub mod ledger;
pub mod publish;
pub mod server;
pub mod transmit;

pub use error::LedgerError;
