//! `reqwest` implementation of [`RemoteClient`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Method, Response};
use serde_json::Value;
use tracing::debug;

use super::{RemoteClient, RemoteError, RemoteResult, SendMethod};

/// HTTP client for the clinic API, bearer-token authenticated.
pub struct HttpRemoteClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemoteClient {
    /// Build a client with one pooled connection set and a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RemoteError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    async fn execute(&self, request: reqwest::RequestBuilder, token: &str) -> RemoteResult<String> {
        let response = request
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| RemoteError::Transport(format!("HTTP request failed: {}", e)))?;

        read_body(response).await
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn fetch(
        &self,
        endpoint: &str,
        params: &[(String, String)],
        token: &str,
    ) -> RemoteResult<Vec<Value>> {
        debug!(endpoint, params = params.len(), "GET");
        let request = self.client.get(self.url(endpoint)).query(params);
        let body = self.execute(request, token).await?;

        match parse_body(&body)? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(object @ Value::Object(_)) => Ok(vec![object]),
            Some(other) => Err(RemoteError::Malformed(format!(
                "expected records from {}, got {}",
                endpoint, other
            ))),
        }
    }

    async fn send(
        &self,
        endpoint: &str,
        record: Option<&Value>,
        token: &str,
        method: SendMethod,
    ) -> RemoteResult<Option<Value>> {
        debug!(endpoint, method = method.as_str(), "send");
        let method = match method {
            SendMethod::Post => Method::POST,
            SendMethod::Put => Method::PUT,
            SendMethod::Delete => Method::DELETE,
        };

        let mut request = self.client.request(method, self.url(endpoint));
        if let Some(record) = record {
            request = request.json(record);
        }
        let body = self.execute(request, token).await?;

        match parse_body(&body)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(value)),
        }
    }
}

/// Read the body, turning status >= 400 into [`RemoteError::Status`].
async fn read_body(response: Response) -> RemoteResult<String> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| RemoteError::Transport(format!("failed to read response: {}", e)))?;

    if status.as_u16() >= 400 {
        return Err(RemoteError::Status {
            status: status.as_u16(),
            message: error_message(&text)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string()),
        });
    }

    Ok(text)
}

fn parse_body(text: &str) -> RemoteResult<Option<Value>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| RemoteError::Malformed(format!("{} - body: {}", e, text)))
}

/// Server-provided error text: `message` or `error` field, else the raw body.
fn error_message(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        for key in ["message", "error"] {
            if let Some(Value::String(message)) = map.get(key) {
                return Some(message.clone());
            }
        }
    }

    Some(text.to_string())
}
