//! Domain models for loyalty-service.

mod account;
mod transaction;

pub use account::{Account, AccountResponse};
pub use transaction::{Balance, Transaction, TransactionKind};
