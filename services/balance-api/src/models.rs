use chrono::{DateTime, Utc};
use ledger_core::types::{BalanceSummary, TransactionItem};
use serde::{Deserialize, Serialize};

/// Top-up request
#[derive(Debug, Deserialize, Serialize)]
pub struct TopUpRequest {
    pub idempotency_key: String,
    pub user_id: String,
    pub currency: String,
    pub value: String,
    pub merchant_data: Option<String>,
}

/// Reservation request
#[derive(Debug, Deserialize, Serialize)]
pub struct ReserveRequest {
    pub user_id: String,
    pub currency: String,
    pub value: String,
    pub order_id: String,
    pub item_id: Option<String>,
}

/// Commit request
#[derive(Debug, Deserialize, Serialize)]
pub struct CommitRequest {
    pub user_id: String,
    pub currency: String,
    pub value: String,
    pub order_id: String,
    pub item_id: Option<String>,
}

/// Cancellation request
#[derive(Debug, Deserialize, Serialize)]
pub struct CancelRequest {
    pub user_id: String,
    pub order_id: String,
    pub item_id: Option<String>,
}

/// Transaction-log read request. `cursor` replaces the other selectors;
/// timestamps are unix seconds.
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ListRequest {
    pub user_id: Option<String>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
    pub min_ts: Option<i64>,
    pub max_ts: Option<i64>,
}

/// Balance snapshot in wire form
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceData {
    pub user_id: String,
    pub currency: String,
    pub value: String,
    pub reserved_value: String,
    pub is_overdraft: bool,
}

impl BalanceData {
    pub fn from_summary(user_id: &str, summary: &BalanceSummary) -> Self {
        BalanceData {
            user_id: user_id.to_string(),
            currency: summary.currency.clone(),
            value: summary.available.to_fixed_string(),
            reserved_value: summary.reserved.to_fixed_string(),
            is_overdraft: summary.is_overdraft(),
        }
    }
}

/// Response of a mutation: the new transaction id (for top-ups and commits)
/// plus the refreshed balance snapshot
#[derive(Debug, Serialize, Deserialize)]
pub struct MutationResponse {
    /// Stringified to survive JSON number precision limits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub user_balance: BalanceData,
}

/// Response of a balance read
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub user_balance: BalanceData,
}

/// One log row in wire form
#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionData {
    pub currency: String,
    pub value: String,
    pub user_currency_value: String,
    pub is_top_up_transaction: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// Unix seconds
    pub created_at: i64,
}

impl From<TransactionItem> for TransactionData {
    fn from(item: TransactionItem) -> Self {
        TransactionData {
            currency: item.currency,
            value: item.value.to_fixed_string(),
            user_currency_value: item.user_currency_value.to_fixed_string(),
            is_top_up_transaction: item.is_top_up,
            order_id: item.order_id,
            item_id: item.item_id,
            created_at: item.created_at.timestamp(),
        }
    }
}

/// Response of a transaction-log read
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub user_balance: BalanceData,
    pub transactions: Vec<TransactionData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub total: i64,
}

/// Unix seconds to a UTC instant, discarding out-of-range values
pub fn timestamp_from_secs(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|secs| DateTime::from_timestamp(secs, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::MoneyValue;

    #[test]
    fn test_balance_data_wire_form() {
        let summary = BalanceSummary {
            currency: "TRY".to_string(),
            available: MoneyValue::parse("-5.555").unwrap(),
            reserved: MoneyValue::parse("0").unwrap(),
        };
        let data = BalanceData::from_summary("mehmet", &summary);
        assert_eq!(data.value, "-5.56");
        assert_eq!(data.reserved_value, "0.00");
        assert!(data.is_overdraft);

        let encoded = serde_json::to_value(&data).unwrap();
        assert_eq!(encoded["user_id"], "mehmet");
        assert_eq!(encoded["currency"], "TRY");
        assert_eq!(encoded["value"], "-5.56");
    }

    #[test]
    fn test_mutation_response_omits_absent_id() {
        let response = MutationResponse {
            transaction_id: None,
            user_balance: BalanceData {
                user_id: "kwa".to_string(),
                currency: "USD".to_string(),
                value: "20.00".to_string(),
                reserved_value: "0.00".to_string(),
                is_overdraft: false,
            },
        };
        let encoded = serde_json::to_value(&response).unwrap();
        assert!(encoded.get("transaction_id").is_none());
    }

    #[test]
    fn test_timestamp_conversion() {
        assert_eq!(timestamp_from_secs(None), None);
        let ts = timestamp_from_secs(Some(1_668_963_843)).unwrap();
        assert_eq!(ts.timestamp(), 1_668_963_843);
    }
}
