//! Error types for the balance ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Domain errors are surfaced to callers verbatim and always roll the
/// mutation session back. Infrastructure errors carry the failed step as
/// context and map to an opaque internal error at the boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// A named input is missing, malformed, or violates a constraint
    #[error("bad parameter {0}")]
    BadParameter(&'static str),

    /// Operation required an existing balance and none exists
    #[error("user not found")]
    UserNotFound,

    /// Operation would drive spendable below zero
    #[error("not enough money")]
    NotEnoughMoney,

    /// Currency is absent from the rate table
    #[error("invalid currency {0}")]
    InvalidCurrency(String),

    /// The business rule was violated by the current state
    #[error("order is in invalid state")]
    InvalidState,

    /// Database error, tagged with the step that failed
    #[error("{step}: {source}")]
    Database {
        /// The step that failed (e.g. "lock balance")
        step: &'static str,
        /// Underlying driver error
        #[source]
        source: sqlx::Error,
    },

    /// Migration error during store bootstrap
    #[error("run migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl Error {
    /// Wrap a driver error with the step that produced it.
    pub(crate) fn database(step: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
        move |source| Error::Database { step, source }
    }

    /// Whether this error is a domain rule violation (as opposed to an
    /// infrastructure failure).
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Error::BadParameter(_)
                | Error::UserNotFound
                | Error::NotEnoughMoney
                | Error::InvalidCurrency(_)
                | Error::InvalidState
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::BadParameter("user id").to_string(), "bad parameter user id");
        assert_eq!(Error::UserNotFound.to_string(), "user not found");
        assert_eq!(Error::NotEnoughMoney.to_string(), "not enough money");
        assert_eq!(
            Error::InvalidCurrency("XXX".to_string()).to_string(),
            "invalid currency XXX"
        );
        assert_eq!(Error::InvalidState.to_string(), "order is in invalid state");
    }

    #[test]
    fn test_domain_classification() {
        assert!(Error::NotEnoughMoney.is_domain());
        assert!(Error::BadParameter("value").is_domain());
        assert!(!Error::Database {
            step: "lock balance",
            source: sqlx::Error::RowNotFound,
        }
        .is_domain());
    }
}
