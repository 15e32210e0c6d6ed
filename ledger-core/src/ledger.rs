//! Balance mutation engine
//!
//! This module ties together the store, the rate snapshot and the id
//! generator into the four state transitions (`top_up`, `reserve`,
//! `commit_reservation`, `cancel_reservation`) and the read paths built on
//! them.
//!
//! Every mutation follows the same skeleton:
//!
//! 1. validate inputs, failing on the first offender
//! 2. make sure the user has a balance row, seeded with the request currency
//! 3. open a store session and lock the balance row - the per-user
//!    serialization point
//! 4. run the operation's idempotency probe; a match returns the previous
//!    outcome
//! 5. do the operation-specific work
//! 6. commit; any error before that rolls the session back

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Instant;
use tracing::info;

use crate::cursor::{self, TransactionCursor};
use crate::error::{Error, Result};
use crate::idgen::IdGenerator;
use crate::metrics::Metrics;
use crate::money::MoneyValue;
use crate::rates::RateProvider;
use crate::storage::{Store, StoreSession};
use crate::types::{
    BalanceSummary, StatisticsSink, TransactionItem, TransactionPage, TransactionQuery,
};

const DEFAULT_PAGE_LIMIT: i64 = 20;
const MAX_PAGE_LIMIT: i64 = 100;

/// Cross-currency reservations hold this margin against rate drift between
/// reserve and commit.
fn reserve_margin() -> Decimal {
    Decimal::new(106, 2)
}

/// The balance mutation engine
pub struct Ledger {
    store: Store,
    rates: RateProvider,
    ids: IdGenerator,
    metrics: Option<Metrics>,
}

impl Ledger {
    /// Engine over the given store and rate snapshot provider
    pub fn new(store: Store, rates: RateProvider) -> Self {
        Ledger {
            store,
            rates,
            ids: IdGenerator::new(),
            metrics: None,
        }
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The rate snapshot handle (tests swap tables through this)
    pub fn rates(&self) -> &RateProvider {
        &self.rates
    }

    /// The underlying store
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The attached metrics collector, if any
    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    /// Credit a user's balance. Returns the id of the ledger transaction.
    ///
    /// A replay carrying the same idempotency key returns the original id
    /// without touching the balance. The first top-up for a user fixes the
    /// user's home currency; amounts in other currencies convert at the
    /// current snapshot rate.
    pub async fn top_up(
        &self,
        idempotency_key: &str,
        user_id: &str,
        currency: &str,
        value: &str,
        merchant_data: Option<&str>,
    ) -> Result<i64> {
        if idempotency_key.is_empty() {
            return Err(Error::BadParameter("idempotency key"));
        }
        if user_id.is_empty() {
            return Err(Error::BadParameter("user id"));
        }
        let rates = self.rates.snapshot();
        if !rates.contains(currency) {
            return Err(Error::BadParameter("currency"));
        }
        let top_up_value = MoneyValue::parse(value)
            .filter(|v| v.is_positive())
            .ok_or(Error::BadParameter("value"))?;
        let merchant_data = match merchant_data {
            Some(raw) if !raw.is_empty() => Some(
                serde_json::from_str::<serde_json::Value>(raw)
                    .map_err(|_| Error::BadParameter("merchant data"))?,
            ),
            _ => None,
        };

        self.store.ensure_balance(user_id, currency).await?;

        let started = Instant::now();
        let mut session = self.store.begin().await?;
        let (balance_currency, balance_value) = session
            .lock_balance(user_id)
            .await?
            .ok_or_else(missing_balance)?;

        if let Some(tx_id) = session
            .find_transaction_by_idempotency_key(idempotency_key)
            .await?
        {
            // already applied earlier; report the original outcome
            session.commit().await?;
            return Ok(tx_id);
        }

        let increment = if currency == balance_currency {
            top_up_value.rounded()
        } else {
            match rates.convert(top_up_value, currency, &balance_currency) {
                Ok(converted) => converted.rounded(),
                Err(err) => return self.abort(session, err).await,
            }
        };
        let balance_after = balance_value + increment;

        let tx_id = self.ids.generate();
        if let Err(err) = session
            .insert_top_up_transaction(
                tx_id,
                currency,
                top_up_value.rounded(),
                user_id,
                &balance_currency,
                increment,
                balance_value,
                balance_after,
                merchant_data,
                idempotency_key,
            )
            .await
        {
            return self.abort(session, err).await;
        }
        if let Err(err) = session.update_balance(user_id, balance_after).await {
            return self.abort(session, err).await;
        }
        session.commit().await?;

        if let Some(metrics) = &self.metrics {
            metrics.top_ups_total.inc();
            metrics
                .mutation_duration
                .observe(started.elapsed().as_secs_f64());
        }
        info!("new transaction (top-up) {} for user {}", tx_id, user_id);
        Ok(tx_id)
    }

    /// Hold part of a user's spendable balance for an order.
    ///
    /// Same-currency reservations hold exactly the quoted amount;
    /// cross-currency reservations hold the converted amount plus a 6%
    /// margin. A reservation that would exceed the spendable balance fails
    /// with `not enough money`; overdraft never funds new reservations.
    pub async fn reserve(
        &self,
        user_id: &str,
        currency: &str,
        value: &str,
        order_id: &str,
        item_id: Option<&str>,
    ) -> Result<()> {
        if user_id.is_empty() {
            return Err(Error::BadParameter("user id"));
        }
        let rates = self.rates.snapshot();
        if !rates.contains(currency) {
            return Err(Error::BadParameter("currency"));
        }
        let reserve_value = MoneyValue::parse(value)
            .filter(|v| v.is_positive())
            .ok_or(Error::BadParameter("value"))?;
        if order_id.is_empty() {
            return Err(Error::BadParameter("order id"));
        }
        let item_id = item_id.filter(|item| !item.is_empty());

        self.store.ensure_balance(user_id, currency).await?;

        let started = Instant::now();
        let mut session = self.store.begin().await?;
        let (balance_currency, balance_value) = session
            .lock_balance(user_id)
            .await?
            .ok_or_else(missing_balance)?;
        let already_reserved = session.sum_reserves(user_id).await?;

        if session.count_reserves_for_order(user_id, order_id).await? > 0 {
            // a reservation for this order already exists; report success
            session.commit().await?;
            return Ok(());
        }
        if session.count_transactions_for_order(order_id).await? > 0 {
            // reserving money for an already committed order
            return self.abort(session, Error::InvalidState).await;
        }

        let reserved = if currency == balance_currency {
            reserve_value.rounded()
        } else {
            match rates.convert(reserve_value * reserve_margin(), currency, &balance_currency) {
                Ok(converted) => converted.rounded(),
                Err(err) => return self.abort(session, err).await,
            }
        };

        let mut spendable = balance_value;
        if let Some(held) = already_reserved {
            spendable = spendable - held;
        }
        if reserved > spendable {
            if let Some(metrics) = &self.metrics {
                metrics.not_enough_money_total.inc();
            }
            return self.abort(session, Error::NotEnoughMoney).await;
        }

        if let Err(err) = session
            .insert_reserve(
                order_id,
                user_id,
                item_id,
                currency,
                reserve_value.rounded(),
                reserved,
            )
            .await
        {
            return self.abort(session, err).await;
        }
        session.commit().await?;

        if let Some(metrics) = &self.metrics {
            metrics.reservations_total.inc();
            metrics
                .mutation_duration
                .observe(started.elapsed().as_secs_f64());
        }
        info!("new reservation {} for user {}", order_id, user_id);
        Ok(())
    }

    /// Charge a user for an order, consuming its reservation if one exists.
    /// Returns the id of the ledger transaction.
    ///
    /// The charge converts at the current rate with no margin. A charge
    /// driving the balance negative is honored only for a previously
    /// reserved cross-currency order (rate drift beyond the 6% cushion);
    /// every other combination fails with `not enough money`.
    pub async fn commit_reservation(
        &self,
        user_id: &str,
        currency: &str,
        value: &str,
        order_id: &str,
        item_id: Option<&str>,
    ) -> Result<i64> {
        if user_id.is_empty() {
            return Err(Error::BadParameter("user id"));
        }
        let rates = self.rates.snapshot();
        if !rates.contains(currency) {
            return Err(Error::BadParameter("currency"));
        }
        let commit_value = MoneyValue::parse(value)
            .filter(|v| v.is_positive())
            .ok_or(Error::BadParameter("value"))?;
        if order_id.is_empty() {
            return Err(Error::BadParameter("order id"));
        }
        let item_id = item_id.filter(|item| !item.is_empty());

        self.store.ensure_balance(user_id, currency).await?;

        let started = Instant::now();
        let mut session = self.store.begin().await?;
        let (balance_currency, balance_value) = session
            .lock_balance(user_id)
            .await?
            .ok_or_else(missing_balance)?;

        if let Some(tx_id) = session.find_transaction_by_order(order_id).await? {
            // this order was committed earlier; report the original outcome
            session.commit().await?;
            return Ok(tx_id);
        }

        let previously_reserved = match session.delete_reserve_by_order(order_id).await {
            Ok(deleted) => deleted > 0,
            Err(err) => return self.abort(session, err).await,
        };

        let charge = if currency == balance_currency {
            commit_value.rounded()
        } else {
            match rates.convert(commit_value, currency, &balance_currency) {
                Ok(converted) => converted.rounded(),
                Err(err) => return self.abort(session, err).await,
            }
        };
        let balance_after = balance_value - charge;

        if balance_after.is_negative() && (currency == balance_currency || !previously_reserved) {
            // overdraft is only allowed for reservations in another currency
            if let Some(metrics) = &self.metrics {
                metrics.not_enough_money_total.inc();
            }
            return self.abort(session, Error::NotEnoughMoney).await;
        }

        let mut order_data = serde_json::json!({ "order_id": order_id });
        if let Some(item) = item_id {
            order_data["item_id"] = serde_json::Value::from(item);
        }

        let tx_id = self.ids.generate();
        if let Err(err) = session
            .insert_charge_transaction(
                tx_id,
                currency,
                commit_value.rounded(),
                user_id,
                &balance_currency,
                charge,
                balance_value,
                balance_after,
                order_data,
            )
            .await
        {
            return self.abort(session, err).await;
        }
        if let Err(err) = session.update_balance(user_id, balance_after).await {
            return self.abort(session, err).await;
        }
        session.commit().await?;

        if let Some(metrics) = &self.metrics {
            metrics.charges_total.inc();
            metrics
                .mutation_duration
                .observe(started.elapsed().as_secs_f64());
        }
        info!("new transaction (charge) {} for order {}", tx_id, order_id);
        Ok(tx_id)
    }

    /// Release the reservation held for an order.
    ///
    /// Cancelling an order that was never reserved and never committed is a
    /// duplicate cancel and succeeds; cancelling a committed order fails
    /// with `invalid state`.
    pub async fn cancel_reservation(&self, user_id: &str, order_id: &str) -> Result<()> {
        if user_id.is_empty() {
            return Err(Error::BadParameter("user id"));
        }
        if order_id.is_empty() {
            return Err(Error::BadParameter("order id"));
        }

        let started = Instant::now();
        let mut session = self.store.begin().await?;
        let Some((_, _)) = session.lock_balance(user_id).await? else {
            return self.abort(session, Error::UserNotFound).await;
        };

        match session.reserve_owner(order_id).await? {
            None => {
                if session.count_transactions_for_order(order_id).await? > 0 {
                    // the order is already committed
                    return self.abort(session, Error::InvalidState).await;
                }
                // never reserved, never committed: duplicate cancel
                session.commit().await?;
                return Ok(());
            }
            Some(owner) if owner != user_id => {
                return self.abort(session, Error::BadParameter("user id")).await;
            }
            Some(_) => {}
        }

        if let Err(err) = session.delete_reserve_by_order(order_id).await {
            return self.abort(session, err).await;
        }
        session.commit().await?;

        if let Some(metrics) = &self.metrics {
            metrics.cancellations_total.inc();
            metrics
                .mutation_duration
                .observe(started.elapsed().as_secs_f64());
        }
        info!("cancelled reservation {} for user {}", order_id, user_id);
        Ok(())
    }

    /// Current balance snapshot: home currency, available and reserved
    /// amounts. `available` is always `current_value - reserved`, so a user
    /// in overdraft reports a negative value.
    pub async fn fetch_balance(&self, user_id: &str) -> Result<BalanceSummary> {
        if user_id.is_empty() {
            return Err(Error::BadParameter("user id"));
        }

        // a short read session keeps the balance and reserve reads consistent
        let mut session = self.store.begin().await?;
        let Some((currency, current_value)) = session.read_balance(user_id).await? else {
            let _ = session.rollback().await;
            return Err(Error::UserNotFound);
        };
        let reserved = session
            .sum_reserves(user_id)
            .await?
            .filter(|held| held.is_positive())
            .unwrap_or(MoneyValue::ZERO);
        session.commit().await?;

        let available = if reserved.is_positive() {
            current_value - reserved
        } else {
            current_value
        };

        Ok(BalanceSummary {
            currency,
            available,
            reserved,
        })
    }

    /// A page of the user's transaction log, newest first.
    ///
    /// When `query.cursor` is set it replaces the user id and time bounds;
    /// a cursor that fails to open reports `bad parameter cursor`. The page
    /// carries a `next_cursor` exactly when more rows exist, plus the total
    /// row count under the same predicate.
    pub async fn list_transactions(&self, query: &TransactionQuery) -> Result<TransactionPage> {
        let mut limit = query.limit;
        if limit <= 0 {
            limit = DEFAULT_PAGE_LIMIT;
        }
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);

        let (user_id, min_ts, max_ts, before_id) = match query.cursor.as_deref() {
            Some(raw) => {
                let opened = cursor::decode(raw).ok_or(Error::BadParameter("cursor"))?;
                (
                    opened.user_id,
                    opened.min_ts,
                    opened.max_ts,
                    Some(opened.before_id),
                )
            }
            None => {
                let user_id = query
                    .user_id
                    .clone()
                    .filter(|user| !user.is_empty())
                    .ok_or(Error::BadParameter("user id"))?;
                (user_id, query.min_ts, query.max_ts, None)
            }
        };

        let rows = self
            .store
            .list_transactions(&user_id, limit + 1, before_id, min_ts, max_ts)
            .await?;

        let mut items = Vec::with_capacity(rows.len().min(limit as usize));
        let mut next_before = None;
        for row in rows {
            if items.len() as i64 >= limit {
                // the extra row only tells us where the next page starts
                next_before = Some(row.id);
                break;
            }
            let (user_currency_value, is_top_up) =
                if row.sender_id.as_deref() == Some(user_id.as_str()) {
                    (row.sender_value.unwrap_or(MoneyValue::ZERO), false)
                } else {
                    (row.recipient_value.unwrap_or(MoneyValue::ZERO), true)
                };
            items.push(TransactionItem {
                currency: row.transaction_currency,
                value: row.transaction_value,
                user_currency_value,
                is_top_up,
                order_id: row.order_id,
                item_id: row.item_id,
                created_at: row.created_at,
            });
        }

        let total = self
            .store
            .count_transactions(&user_id, min_ts, max_ts)
            .await?;

        let next_cursor = next_before.and_then(|before_id| {
            cursor::encode(&TransactionCursor {
                user_id: user_id.clone(),
                min_ts,
                max_ts,
                before_id,
            })
        });

        Ok(TransactionPage {
            user_id,
            items,
            next_cursor,
            total,
        })
    }

    /// Stream the month's per-item statistics into `sink`: the distinct
    /// currency list first, then one record per item id with its
    /// per-currency sums, ordered by item id. Failures are delivered
    /// through `sink.on_error`.
    pub async fn monthly_statistics(&self, year: i32, month: u32, sink: &mut dyn StatisticsSink) {
        if let Err(err) = self.stream_statistics(year, month, sink).await {
            sink.on_error(&err);
        }
    }

    async fn stream_statistics(
        &self,
        year: i32,
        month: u32,
        sink: &mut dyn StatisticsSink,
    ) -> Result<()> {
        let mut session = self.store.begin().await?;

        let currencies = session.statistics_currencies(year, month as i32).await?;
        sink.on_currencies(&currencies);

        let mut current_item: Option<String> = None;
        let mut values: HashMap<String, MoneyValue> = HashMap::new();
        session
            .statistics_rows(year, month as i32, |row| {
                if current_item.as_deref() != Some(row.item_id.as_str()) {
                    if let Some(item) = current_item.take() {
                        sink.on_record(&item, &values);
                        values.clear();
                    }
                    current_item = Some(row.item_id);
                }
                values.insert(row.currency, row.total);
            })
            .await?;
        if let Some(item) = current_item {
            sink.on_record(&item, &values);
        }

        session.commit().await?;
        Ok(())
    }

    /// Roll the session back and surface the error
    async fn abort<T>(&self, session: StoreSession, err: Error) -> Result<T> {
        let _ = session.rollback().await;
        Err(err)
    }
}

/// The balance row vanished between `ensure_balance` and the lock. Balances
/// are never deleted, so this is an infrastructure fault, not a domain one.
fn missing_balance() -> Error {
    Error::Database {
        step: "lock balance",
        source: sqlx::Error::RowNotFound,
    }
}
