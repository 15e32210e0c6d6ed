use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use ledger_core::Error as LedgerError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("unauthorized")]
    Unauthorized,
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        // infrastructure details stay in the logs, not in the response
        let message = match self {
            ApiError::Ledger(err) if !err.is_domain() => {
                error!("internal error: {}", err);
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::FORBIDDEN,
            ApiError::Ledger(err) => match err {
                LedgerError::BadParameter(_) => StatusCode::BAD_REQUEST,
                LedgerError::InvalidCurrency(_) => StatusCode::BAD_REQUEST,
                LedgerError::UserNotFound => StatusCode::NOT_FOUND,
                LedgerError::NotEnoughMoney => StatusCode::PAYMENT_REQUIRED,
                LedgerError::InvalidState => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl ApiError {
    fn error_type(&self) -> &str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::Ledger(err) => match err {
                LedgerError::BadParameter(_) => "bad_parameter",
                LedgerError::InvalidCurrency(_) => "invalid_currency",
                LedgerError::UserNotFound => "user_not_found",
                LedgerError::NotEnoughMoney => "not_enough_money",
                LedgerError::InvalidState => "invalid_state",
                _ => "internal_error",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ApiError::from(LedgerError::BadParameter("value")),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(LedgerError::UserNotFound),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(LedgerError::NotEnoughMoney),
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                ApiError::from(LedgerError::InvalidState),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(LedgerError::InvalidCurrency("XXX".into())),
                StatusCode::BAD_REQUEST,
            ),
            (ApiError::Unauthorized, StatusCode::FORBIDDEN),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code(), status, "{err}");
        }
    }

    #[test]
    fn test_internal_errors_stay_opaque() {
        let err = ApiError::from(LedgerError::Database {
            step: "lock balance",
            source: sqlx_row_not_found(),
        });
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_type(), "internal_error");
    }

    fn sqlx_row_not_found() -> sqlx::Error {
        sqlx::Error::RowNotFound
    }
}
