//! Transaction records and their durable per-connector ring.

pub mod store;
pub mod transaction;

pub use store::{TransactionStore, MAX_TRANSACTIONS};
pub use transaction::{RpcSync, Transaction};
