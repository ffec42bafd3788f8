//! Sync layer errors.

use thiserror::Error;

use crate::db::DbError;
use crate::remote::RemoteError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("No authenticated account")]
    Unauthenticated,

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Device is offline")]
    Offline,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
