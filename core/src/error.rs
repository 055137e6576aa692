use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors from the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The submitted fields were rejected before any SQL ran.
    #[error("{0}")]
    Validation(String),

    /// The database refused the data (constraint violation, type mismatch).
    #[error("{0}")]
    Data(String),

    #[error("database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

impl StoreError {
    /// Split a rusqlite error into data errors, which the caller reports as an
    /// unsuccessful mutation, and everything else.
    pub(crate) fn classify(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(
                    e.code,
                    ErrorCode::ConstraintViolation | ErrorCode::TypeMismatch
                ) =>
            {
                Self::Data(err.to_string())
            }
            rusqlite::Error::ToSqlConversionFailure(_)
            | rusqlite::Error::IntegralValueOutOfRange(..) => Self::Data(err.to_string()),
            _ => Self::Storage(err),
        }
    }
}
