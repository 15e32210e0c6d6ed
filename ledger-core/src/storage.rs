//! Postgres persistence for balances, reservations and the transaction log
//!
//! # Relations
//!
//! - `balance` - one row per user: home currency and current value
//! - `balance_reserve` - one row per active reservation, keyed by order id
//! - `"transaction"` - append-only ledger of top-ups and charges
//!
//! Mutations run inside a [`StoreSession`]: one pooled connection, one
//! database transaction. `lock_balance` issues `SELECT ... FOR UPDATE` on
//! the user's balance row, which is the serialization point for that user;
//! all reads and writes touching the user's reserves and transactions happen
//! under that lock. A session dropped without `commit` rolls back, which is
//! also how request cancellation aborts a mutation mid-flight.

use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::money::MoneyValue;

/// One row of the transaction log, as read for a user page
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionRow {
    /// Transaction id
    pub id: i64,
    /// Currency the transaction was quoted in
    pub transaction_currency: String,
    /// Quoted amount
    pub transaction_value: MoneyValue,
    /// Charged user, for commits
    pub sender_id: Option<String>,
    /// Charge in the sender's home currency
    pub sender_value: Option<MoneyValue>,
    /// Credited user, for top-ups
    pub recipient_id: Option<String>,
    /// Credit in the recipient's home currency
    pub recipient_value: Option<MoneyValue>,
    /// Order id extracted from `order_data`
    pub order_id: Option<String>,
    /// Item id extracted from `order_data`
    pub item_id: Option<String>,
    /// Creation instant
    pub created_at: DateTime<Utc>,
}

/// One grouped aggregate of the monthly statistics query
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StatisticsRow {
    /// Item the sums belong to
    pub item_id: String,
    /// Currency of this sum
    pub currency: String,
    /// Sum of quoted transaction values
    pub total: MoneyValue,
}

/// Transactional persistence over the three ledger relations
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect the pool and bring the schema up to date.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(Error::database("connect"))?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Store { pool })
    }

    /// The underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create a zero balance for the user unless one already exists. The
    /// currency given here becomes the user's home currency for good.
    pub async fn ensure_balance(&self, user_id: &str, currency: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO balance (user_id, currency, current_value) VALUES ($1, $2, 0) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(currency)
        .execute(&self.pool)
        .await
        .map_err(Error::database("ensure balance"))?;
        Ok(())
    }

    /// Open a mutation session
    pub async fn begin(&self) -> Result<StoreSession> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(Error::database("begin tx"))?;
        Ok(StoreSession { tx })
    }

    /// Load up to `fetch` log rows for a user, newest first, bounded by the
    /// optional time window and `id <= before_id`.
    pub async fn list_transactions(
        &self,
        user_id: &str,
        fetch: i64,
        before_id: Option<i64>,
        min_ts: Option<DateTime<Utc>>,
        max_ts: Option<DateTime<Utc>>,
    ) -> Result<Vec<TransactionRow>> {
        sqlx::query_as::<_, TransactionRow>(
            r#"
SELECT id,
       transaction_currency,
       transaction_value,
       sender_id,
       sender_value,
       recipient_id,
       recipient_value,
       order_data ->> 'order_id' AS order_id,
       order_data ->> 'item_id'  AS item_id,
       created_at
FROM "transaction"
WHERE (sender_id = $1 OR recipient_id = $1)
  AND ($2::timestamptz IS NULL OR created_at >= $2)
  AND ($3::timestamptz IS NULL OR created_at <= $3)
  AND ($4::bigint IS NULL OR id <= $4)
ORDER BY id DESC
LIMIT $5
            "#,
        )
        .bind(user_id)
        .bind(min_ts)
        .bind(max_ts)
        .bind(before_id)
        .bind(fetch)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::database("load user tx"))
    }

    /// Count log rows for a user under the same time window, without the
    /// pagination bound.
    pub async fn count_transactions(
        &self,
        user_id: &str,
        min_ts: Option<DateTime<Utc>>,
        max_ts: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
SELECT COUNT(*)
FROM "transaction"
WHERE (sender_id = $1 OR recipient_id = $1)
  AND ($2::timestamptz IS NULL OR created_at >= $2)
  AND ($3::timestamptz IS NULL OR created_at <= $3)
            "#,
        )
        .bind(user_id)
        .bind(min_ts)
        .bind(max_ts)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::database("count user tx"))
    }
}

/// One database transaction over the ledger relations.
///
/// Dropping the session rolls back everything written since `begin`.
pub struct StoreSession {
    tx: Transaction<'static, Postgres>,
}

impl StoreSession {
    /// Read the user's balance row and take the per-user exclusive lock.
    /// `None` when the user has no balance row.
    pub async fn lock_balance(&mut self, user_id: &str) -> Result<Option<(String, MoneyValue)>> {
        sqlx::query_as::<_, (String, MoneyValue)>(
            "SELECT currency, current_value FROM balance WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(Error::database("lock balance"))
    }

    /// Read the user's balance row without locking it (read sessions)
    pub async fn read_balance(&mut self, user_id: &str) -> Result<Option<(String, MoneyValue)>> {
        sqlx::query_as::<_, (String, MoneyValue)>(
            "SELECT currency, current_value FROM balance WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(Error::database("read balance"))
    }

    /// Sum of the user's active reservations in home currency; `None` when
    /// the user has no reservations.
    pub async fn sum_reserves(&mut self, user_id: &str) -> Result<Option<MoneyValue>> {
        sqlx::query_scalar::<_, Option<MoneyValue>>(
            "SELECT SUM(user_currency_value) FROM balance_reserve WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(Error::database("read reserve"))
    }

    /// Number of reservations this user holds for the order (0 or 1)
    pub async fn count_reserves_for_order(&mut self, user_id: &str, order_id: &str) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM balance_reserve WHERE user_id = $1 AND order_id = $2",
        )
        .bind(user_id)
        .bind(order_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(Error::database("read reserve"))
    }

    /// Number of committed transactions recorded for the order (0 or 1)
    pub async fn count_transactions_for_order(&mut self, order_id: &str) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM "transaction" WHERE order_data ->> 'order_id' = $1"#,
        )
        .bind(order_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(Error::database("read tx"))
    }

    /// Id of the transaction carrying this idempotency key, if one exists
    pub async fn find_transaction_by_idempotency_key(&mut self, key: &str) -> Result<Option<i64>> {
        sqlx::query_scalar::<_, i64>(r#"SELECT id FROM "transaction" WHERE idempotency_key = $1"#)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(Error::database("idempotency check"))
    }

    /// Id of the committed transaction for this order, if one exists
    pub async fn find_transaction_by_order(&mut self, order_id: &str) -> Result<Option<i64>> {
        sqlx::query_scalar::<_, i64>(
            r#"SELECT id FROM "transaction" WHERE order_data ->> 'order_id' = $1"#,
        )
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(Error::database("locate transaction"))
    }

    /// Owner of the reservation for this order, if one exists
    pub async fn reserve_owner(&mut self, order_id: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT user_id FROM balance_reserve WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(Error::database("locate reservation"))
    }

    /// Append a top-up transaction record
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_top_up_transaction(
        &mut self,
        id: i64,
        currency: &str,
        value: MoneyValue,
        recipient_id: &str,
        recipient_currency: &str,
        recipient_value: MoneyValue,
        balance_before: MoneyValue,
        balance_after: MoneyValue,
        merchant_data: Option<serde_json::Value>,
        idempotency_key: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO "transaction" (id, transaction_currency, transaction_value, recipient_id, recipient_currency,
                           recipient_value, recipient_balance_before, recipient_balance_after,
                           merchant_data, idempotency_key)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(id)
        .bind(currency)
        .bind(value)
        .bind(recipient_id)
        .bind(recipient_currency)
        .bind(recipient_value)
        .bind(balance_before)
        .bind(balance_after)
        .bind(merchant_data)
        .bind(idempotency_key)
        .execute(&mut *self.tx)
        .await
        .map_err(Error::database("save user tx"))?;
        Ok(())
    }

    /// Append a charge transaction record
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_charge_transaction(
        &mut self,
        id: i64,
        currency: &str,
        value: MoneyValue,
        sender_id: &str,
        sender_currency: &str,
        sender_value: MoneyValue,
        balance_before: MoneyValue,
        balance_after: MoneyValue,
        order_data: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO "transaction" (id, transaction_currency, transaction_value, sender_id, sender_currency,
                           sender_value, sender_balance_before, sender_balance_after, order_data)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(id)
        .bind(currency)
        .bind(value)
        .bind(sender_id)
        .bind(sender_currency)
        .bind(sender_value)
        .bind(balance_before)
        .bind(balance_after)
        .bind(order_data)
        .execute(&mut *self.tx)
        .await
        .map_err(Error::database("save user tx"))?;
        Ok(())
    }

    /// Create a reservation row
    pub async fn insert_reserve(
        &mut self,
        order_id: &str,
        user_id: &str,
        item_id: Option<&str>,
        currency: &str,
        value: MoneyValue,
        user_currency_value: MoneyValue,
    ) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO balance_reserve (order_id, user_id, item_id, currency, "value", user_currency_value)
VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order_id)
        .bind(user_id)
        .bind(item_id)
        .bind(currency)
        .bind(value)
        .bind(user_currency_value)
        .execute(&mut *self.tx)
        .await
        .map_err(Error::database("save reservation"))?;
        Ok(())
    }

    /// Delete the reservation for an order; returns how many rows went away
    pub async fn delete_reserve_by_order(&mut self, order_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM balance_reserve WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *self.tx)
            .await
            .map_err(Error::database("delete reservation"))?;
        Ok(result.rows_affected())
    }

    /// Overwrite the user's balance value
    pub async fn update_balance(&mut self, user_id: &str, value: MoneyValue) -> Result<()> {
        sqlx::query("UPDATE balance SET current_value = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(value)
            .execute(&mut *self.tx)
            .await
            .map_err(Error::database("update balance"))?;
        Ok(())
    }

    /// Distinct currencies among the month's transactions that carry an item id
    pub async fn statistics_currencies(&mut self, year: i32, month: i32) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
SELECT DISTINCT transaction_currency
FROM "transaction"
WHERE date_trunc('month', created_at) = make_date($1, $2, 1)
  AND (order_data ->> 'item_id') IS NOT NULL
            "#,
        )
        .bind(year)
        .bind(month)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(Error::database("load currencies"))
    }

    /// Stream the month's `(item_id, currency) -> SUM(value)` aggregates,
    /// ordered by item id then currency, into `each`.
    pub async fn statistics_rows<F>(&mut self, year: i32, month: i32, mut each: F) -> Result<()>
    where
        F: FnMut(StatisticsRow),
    {
        let mut rows = sqlx::query_as::<_, StatisticsRow>(
            r#"
SELECT order_data ->> 'item_id' AS item_id,
       transaction_currency     AS currency,
       SUM(transaction_value)   AS total
FROM "transaction"
WHERE date_trunc('month', created_at) = make_date($1, $2, 1)
  AND (order_data ->> 'item_id') IS NOT NULL
GROUP BY item_id, transaction_currency
ORDER BY item_id ASC, transaction_currency ASC
            "#,
        )
        .bind(year)
        .bind(month)
        .fetch(&mut *self.tx);

        while let Some(row) = rows
            .try_next()
            .await
            .map_err(Error::database("load statistics"))?
        {
            each(row);
        }
        Ok(())
    }

    /// Make everything written in this session visible
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(Error::database("commit tx"))
    }

    /// Discard everything written in this session
    pub async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(Error::database("rollback tx"))
    }
}
