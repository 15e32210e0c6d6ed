//! Balance Ledger Core
//!
//! For each user the ledger maintains a single home-currency balance, a set
//! of outstanding reservations against that balance, and an append-only
//! transaction log. Callers top up balances, reserve funds for an order,
//! then commit those reserved funds (charging the user) or cancel the
//! reservation (releasing them). Multi-currency requests convert at a
//! snapshot rate table.
//!
//! # Invariants
//!
//! - `current_value - SUM(active reserves) = spendable` under concurrent writes
//! - at-most-once mutation semantics via idempotency keys and order-id gating
//! - for any order id, at most one reservation and at most one transaction
//!   exist, and never both
//! - spendable goes negative only through a cross-currency commit whose rate
//!   drift exceeded the 6% reservation margin

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod cursor;
pub mod error;
pub mod idgen;
pub mod ledger;
pub mod metrics;
pub mod money;
pub mod rates;
pub mod storage;
pub mod types;

// Re-exports
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use money::MoneyValue;
pub use rates::{RateProvider, RateTable};
pub use storage::Store;
pub use types::{BalanceSummary, StatisticsSink, TransactionPage, TransactionQuery};
