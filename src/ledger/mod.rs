//! Ledger module containing the chart of accounts and journal posting

pub mod account;
pub mod core;
pub mod transaction;

pub use account::*;
pub use core::*;
pub use transaction::*;
