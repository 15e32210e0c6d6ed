//! Records crossing the engine boundary

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::error::Error;
use crate::money::MoneyValue;

/// Balance snapshot returned by the read paths
#[derive(Debug, Clone, Serialize)]
pub struct BalanceSummary {
    /// The user's home currency
    pub currency: String,
    /// `current_value - reserved`; negative only under overdraft
    pub available: MoneyValue,
    /// Sum of active reservations, floored at zero
    pub reserved: MoneyValue,
}

impl BalanceSummary {
    /// Derived flag: the reported available balance is below zero
    pub fn is_overdraft(&self) -> bool {
        self.available.is_negative()
    }
}

/// Parameters of a transaction-log read.
///
/// When `cursor` is set it replaces `user_id`/`min_ts`/`max_ts` entirely;
/// conflicting explicit parameters are ignored.
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    /// User whose log to read (required unless a cursor is given)
    pub user_id: Option<String>,
    /// Page size; zero or negative means the default of 20, clamped to 100
    pub limit: i64,
    /// Opaque continuation from a previous page
    pub cursor: Option<String>,
    /// Only transactions created at or after this instant
    pub min_ts: Option<DateTime<Utc>>,
    /// Only transactions created at or before this instant
    pub max_ts: Option<DateTime<Utc>>,
}

/// One row of a transaction-log page, seen from the queried user's side
#[derive(Debug, Clone)]
pub struct TransactionItem {
    /// Currency the transaction was quoted in
    pub currency: String,
    /// Quoted amount
    pub value: MoneyValue,
    /// Magnitude of the movement in the user's home currency
    pub user_currency_value: MoneyValue,
    /// Direction: `true` for top-ups (user was the recipient)
    pub is_top_up: bool,
    /// Order this charge belongs to, for commits
    pub order_id: Option<String>,
    /// Item within the order, when the caller supplied one
    pub item_id: Option<String>,
    /// Creation instant
    pub created_at: DateTime<Utc>,
}

/// A page of the transaction log
#[derive(Debug, Clone)]
pub struct TransactionPage {
    /// The user the page belongs to (resolved from the cursor when one was given)
    pub user_id: String,
    /// At most `limit` rows, newest first
    pub items: Vec<TransactionItem>,
    /// Continuation for the next page, when more rows exist
    pub next_cursor: Option<String>,
    /// Total rows under the same user/time predicate, ignoring pagination
    pub total: i64,
}

/// Consumer of the monthly statistics stream.
///
/// `on_currencies` is delivered once, before any record. Each `on_record`
/// carries one item id with its per-currency sums. Errors after the header
/// has been delivered arrive through `on_error`.
pub trait StatisticsSink {
    /// The distinct currencies appearing in the month, delivered first
    fn on_currencies(&mut self, currencies: &[String]);
    /// Per-item sums, keyed by currency; missing currencies mean zero
    fn on_record(&mut self, item_id: &str, values: &HashMap<String, MoneyValue>);
    /// Stream failure; no further callbacks follow
    fn on_error(&mut self, error: &Error);
}
