use actix_web::{web, HttpResponse};
use chrono::{Datelike, Utc};
use ledger_core::error::Error as LedgerError;
use ledger_core::types::{StatisticsSink, TransactionQuery};
use ledger_core::{Ledger, MoneyValue};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::ApiError;
use crate::models::{
    self, BalanceData, BalanceResponse, CancelRequest, CommitRequest, ListRequest, ListResponse,
    MutationResponse, ReserveRequest, TopUpRequest,
};

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "balance-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint(ledger: web::Data<Arc<Ledger>>) -> HttpResponse {
    let Some(metrics) = ledger.metrics() else {
        return HttpResponse::NotFound().finish();
    };
    match metrics.export() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": "Failed to gather metrics",
            "details": e.to_string()
        })),
    }
}

/// Current balance for a user
pub async fn fetch_balance(
    ledger: web::Data<Arc<Ledger>>,
    user_id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let summary = ledger.fetch_balance(&user_id).await?;
    Ok(HttpResponse::Ok().json(BalanceResponse {
        user_balance: BalanceData::from_summary(&user_id, &summary),
    }))
}

/// Credit a balance
pub async fn top_up(
    ledger: web::Data<Arc<Ledger>>,
    request: web::Json<TopUpRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = request.into_inner();
    let tx_id = ledger
        .top_up(
            &request.idempotency_key,
            &request.user_id,
            &request.currency,
            &request.value,
            request.merchant_data.as_deref(),
        )
        .await?;
    mutation_response(&ledger, &request.user_id, Some(tx_id)).await
}

/// Hold funds for an order
pub async fn reserve(
    ledger: web::Data<Arc<Ledger>>,
    request: web::Json<ReserveRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = request.into_inner();
    ledger
        .reserve(
            &request.user_id,
            &request.currency,
            &request.value,
            &request.order_id,
            request.item_id.as_deref(),
        )
        .await?;
    mutation_response(&ledger, &request.user_id, None).await
}

/// Charge a user for an order
pub async fn commit(
    ledger: web::Data<Arc<Ledger>>,
    request: web::Json<CommitRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = request.into_inner();
    let tx_id = ledger
        .commit_reservation(
            &request.user_id,
            &request.currency,
            &request.value,
            &request.order_id,
            request.item_id.as_deref(),
        )
        .await?;
    mutation_response(&ledger, &request.user_id, Some(tx_id)).await
}

/// Release the hold for an order
pub async fn cancel(
    ledger: web::Data<Arc<Ledger>>,
    request: web::Json<CancelRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = request.into_inner();
    ledger
        .cancel_reservation(&request.user_id, &request.order_id)
        .await?;
    mutation_response(&ledger, &request.user_id, None).await
}

/// A page of the user's transaction log plus the current balance
pub async fn list_transactions(
    ledger: web::Data<Arc<Ledger>>,
    request: web::Json<ListRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = request.into_inner();
    let page = ledger
        .list_transactions(&TransactionQuery {
            user_id: request.user_id,
            limit: request.limit.unwrap_or(0),
            cursor: request.cursor,
            min_ts: models::timestamp_from_secs(request.min_ts),
            max_ts: models::timestamp_from_secs(request.max_ts),
        })
        .await?;

    let summary = ledger.fetch_balance(&page.user_id).await?;
    Ok(HttpResponse::Ok().json(ListResponse {
        user_balance: BalanceData::from_summary(&page.user_id, &summary),
        transactions: page.items.into_iter().map(Into::into).collect(),
        next_cursor: page.next_cursor,
        total: page.total,
    }))
}

const ERR_STATISTICS_YEAR: &str = "bad parameter \"year\", use YYYY/MM";
const ERR_STATISTICS_MONTH: &str = "bad parameter \"month\", use YYYY/MM";

/// Monthly per-item statistics as CSV
pub async fn statistics(
    ledger: web::Data<Arc<Ledger>>,
    path: web::Path<(i32, u32)>,
) -> HttpResponse {
    let (year, month) = path.into_inner();
    if year < 2022 || year > Utc::now().year() {
        return HttpResponse::NotFound()
            .content_type("text/plain")
            .body(ERR_STATISTICS_YEAR);
    }
    if !(1..=12).contains(&month) {
        return HttpResponse::NotFound()
            .content_type("text/plain")
            .body(ERR_STATISTICS_MONTH);
    }

    let mut sink = CsvSink::default();
    ledger.monthly_statistics(year, month, &mut sink).await;
    sink.into_response(year, month)
}

/// Folds the statistics stream into a CSV document: one header with the
/// currency columns, one row per item, and - if the stream breaks after the
/// header was produced - a final row carrying the error message.
#[derive(Default)]
struct CsvSink {
    currencies: Vec<String>,
    body: String,
    header_written: bool,
    failed: Option<String>,
}

impl CsvSink {
    fn write_record(&mut self, fields: &[String]) {
        let escaped: Vec<String> = fields.iter().map(|field| csv_field(field)).collect();
        self.body.push_str(&escaped.join(","));
        self.body.push('\n');
    }

    fn into_response(self, year: i32, month: u32) -> HttpResponse {
        if let Some(message) = self.failed {
            return HttpResponse::InternalServerError()
                .content_type("text/plain")
                .body(message);
        }
        HttpResponse::Ok()
            .content_type("text/csv")
            .insert_header((
                "Content-Disposition",
                format!("attachment; filename=item_statistics_{year:04}_{month:02}.csv"),
            ))
            .body(self.body)
    }
}

impl StatisticsSink for CsvSink {
    fn on_currencies(&mut self, currencies: &[String]) {
        self.currencies = currencies.to_vec();
        let mut header = vec!["Item ID".to_string()];
        header.extend(currencies.iter().cloned());
        self.write_record(&header);
        self.header_written = true;
    }

    fn on_record(&mut self, item_id: &str, values: &HashMap<String, MoneyValue>) {
        let mut record = Vec::with_capacity(self.currencies.len() + 1);
        record.push(item_id.to_string());
        for currency in &self.currencies {
            let value = values.get(currency).copied().unwrap_or(MoneyValue::ZERO);
            record.push(value.to_fixed_string());
        }
        self.write_record(&record);
    }

    fn on_error(&mut self, error: &LedgerError) {
        if self.header_written {
            let mut record = vec![String::new(); self.currencies.len() + 1];
            record[0] = error.to_string();
            self.write_record(&record);
        } else {
            self.failed = Some(error.to_string());
        }
    }
}

fn csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

async fn mutation_response(
    ledger: &Ledger,
    user_id: &str,
    tx_id: Option<i64>,
) -> Result<HttpResponse, ApiError> {
    let summary = ledger.fetch_balance(user_id).await?;
    Ok(HttpResponse::Ok().json(MutationResponse {
        transaction_id: tx_id.map(|id| id.to_string()),
        user_balance: BalanceData::from_summary(user_id, &summary),
    }))
}

/// Configure routes. Write operations sit behind the optional key gate.
pub fn configure_routes(cfg: &mut web::ServiceConfig, api_key: Option<String>) {
    cfg.route("/health", web::get().to(health_check))
        .route("/metrics", web::get().to(metrics_endpoint))
        .route("/balance/{user_id}", web::get().to(fetch_balance))
        .route("/list", web::post().to(list_transactions))
        .route("/statistics/{year}/{month}", web::get().to(statistics))
        .service(
            web::scope("")
                .wrap(crate::middleware::ApiKeyGuard::new(api_key))
                .route("/top-up", web::post().to(top_up))
                .route("/reserve", web::post().to(reserve))
                .route("/commit", web::post().to(commit))
                .route("/cancel", web::post().to(cancel)),
        );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_csv_sink_builds_header_and_rows() {
        let mut sink = CsvSink::default();
        sink.on_currencies(&["EUR".to_string(), "USD".to_string()]);

        let mut values = HashMap::new();
        values.insert("EUR".to_string(), MoneyValue::parse("10").unwrap());
        values.insert("USD".to_string(), MoneyValue::parse("5").unwrap());
        sink.on_record("i1", &values);

        let mut partial = HashMap::new();
        partial.insert("EUR".to_string(), MoneyValue::parse("2.5").unwrap());
        sink.on_record("i2", &partial);

        assert_eq!(sink.body, "Item ID,EUR,USD\ni1,10.00,5.00\ni2,2.50,0.00\n");
    }

    #[test]
    fn test_csv_sink_error_after_header() {
        let mut sink = CsvSink::default();
        sink.on_currencies(&["EUR".to_string()]);
        sink.on_error(&LedgerError::Database {
            step: "load statistics",
            source: sqlx::Error::RowNotFound,
        });

        assert!(sink.failed.is_none());
        assert!(sink
            .body
            .lines()
            .last()
            .unwrap()
            .starts_with("load statistics"));
    }

    #[test]
    fn test_csv_sink_error_before_header() {
        let mut sink = CsvSink::default();
        sink.on_error(&LedgerError::Database {
            step: "begin tx",
            source: sqlx::Error::PoolTimedOut,
        });
        assert!(sink.failed.is_some());
        assert!(sink.body.is_empty());
    }
}
