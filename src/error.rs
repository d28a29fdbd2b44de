//! Domain error type shared by the roster, work log, closing and ledger
//! operations. The channel layer flattens it to a message string.

use chrono::NaiveDate;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum PosError {
    /// User input rejected before any write was attempted.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Closing for {0} is already finalized")]
    AlreadyFinalized(NaiveDate),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PosError {
    /// Settings helpers in `db` report failures as plain strings.
    pub fn settings(msg: String) -> Self {
        PosError::Store(StoreError::Database(msg))
    }
}

pub type PosResult<T> = Result<T, PosError>;

/// Channel handlers return `Result<Value, String>`.
impl From<PosError> for String {
    fn from(err: PosError) -> Self {
        err.to_string()
    }
}
