//! Remote API client.
//!
//! The sync layer talks to the server only through [`RemoteClient`], so the
//! HTTP implementation can be replaced by an in-process fake in tests.

mod http;

pub use http::*;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Remote request errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Server answered with status >= 400.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Connection failure or timeout.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Body could not be decoded as expected.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Status { status: 404, .. })
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Write method for [`RemoteClient::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMethod {
    Post,
    Put,
    Delete,
}

impl SendMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendMethod::Post => "POST",
            SendMethod::Put => "PUT",
            SendMethod::Delete => "DELETE",
        }
    }
}

/// Stateless request executor against the remote API.
///
/// `endpoint` is a path relative to the base URL (`patients`,
/// `patients/{id}`). No retries happen at this level.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// `GET endpoint?params`. An array body yields its elements, an object
    /// yields itself, an empty body yields nothing.
    async fn fetch(
        &self,
        endpoint: &str,
        params: &[(String, String)],
        token: &str,
    ) -> RemoteResult<Vec<Value>>;

    /// Write `record` with `method`. Returns the server's copy, if it sent one.
    async fn send(
        &self,
        endpoint: &str,
        record: Option<&Value>,
        token: &str,
        method: SendMethod,
    ) -> RemoteResult<Option<Value>>;
}
