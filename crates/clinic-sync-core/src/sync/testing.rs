//! In-process fakes for the sync collaborators.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use super::clock::Clock;
use super::identity::{Account, IdentityProvider};
use crate::remote::{RemoteClient, RemoteError, RemoteResult, SendMethod};

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(rfc3339: &str) -> Self {
        let now = DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc);
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        *self.now.lock().unwrap() += Duration::seconds(secs);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Fixed identity that tests can sign out or strip of its token.
pub struct StaticIdentity {
    token: Mutex<Option<String>>,
    account: Mutex<Option<Account>>,
}

impl StaticIdentity {
    pub fn signed_in(account_id: &str) -> Self {
        Self {
            token: Mutex::new(Some("test-token".into())),
            account: Mutex::new(Some(Account::new(account_id))),
        }
    }

    pub fn set_token(&self, token: Option<&str>) {
        *self.token.lock().unwrap() = token.map(String::from);
    }

    pub fn sign_out(&self) {
        *self.account.lock().unwrap() = None;
        *self.token.lock().unwrap() = None;
    }
}

impl IdentityProvider for StaticIdentity {
    fn access_token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    fn current_account(&self) -> Option<Account> {
        self.account.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct FakeState {
    /// resource -> id -> record
    tables: BTreeMap<String, BTreeMap<String, Value>>,
    calls: Vec<String>,
    failing: HashSet<String>,
    frozen: HashSet<String>,
    offline: bool,
    reply: Option<Value>,
}

/// In-memory stand-in for the clinic API.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a server-side record.
    pub fn put_record(&self, resource: &str, record: Value) {
        let id = record["id"].as_str().unwrap_or_default().to_string();
        self.state
            .lock()
            .unwrap()
            .tables
            .entry(resource.to_string())
            .or_default()
            .insert(id, record);
    }

    pub fn record(&self, resource: &str, id: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(resource)
            .and_then(|t| t.get(id).cloned())
    }

    /// Requests seen so far, as `METHOD endpoint`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Make every request against `resource` answer 500.
    pub fn fail_resource(&self, resource: &str, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.failing.insert(resource.to_string());
        } else {
            state.failing.remove(resource);
        }
    }

    /// Accept writes against `resource` without changing the server copy.
    pub fn freeze_resource(&self, resource: &str) {
        self.state
            .lock()
            .unwrap()
            .frozen
            .insert(resource.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Override the body of the next successful write.
    pub fn reply_once(&self, body: Value) {
        self.state.lock().unwrap().reply = Some(body);
    }

    fn check(state: &FakeState, resource: &str) -> RemoteResult<()> {
        if state.offline {
            return Err(RemoteError::Transport("connection refused".into()));
        }
        if state.failing.contains(resource) {
            return Err(RemoteError::Status {
                status: 500,
                message: "injected failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn fetch(
        &self,
        endpoint: &str,
        params: &[(String, String)],
        _token: &str,
    ) -> RemoteResult<Vec<Value>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("GET {}", endpoint));
        Self::check(&state, endpoint)?;

        let param = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        let owner = param("ownerId");
        let since = param("modifiedSince");

        Ok(state
            .tables
            .get(endpoint)
            .map(|table| {
                table
                    .values()
                    .filter(|r| owner.as_deref().map_or(true, |o| r["ownerId"] == o))
                    .filter(|r| {
                        since.as_deref().map_or(true, |s| {
                            r["lastModified"].as_str().map_or(false, |lm| lm > s)
                        })
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn send(
        &self,
        endpoint: &str,
        record: Option<&Value>,
        _token: &str,
        method: SendMethod,
    ) -> RemoteResult<Option<Value>> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        state.calls.push(format!("{} {}", method.as_str(), endpoint));

        let (resource, id) = match endpoint.split_once('/') {
            Some((resource, id)) => (resource.to_string(), Some(id.to_string())),
            None => (endpoint.to_string(), None),
        };
        Self::check(state, &resource)?;

        if state.frozen.contains(&resource) {
            return Ok(record.cloned());
        }

        let table = state.tables.entry(resource).or_default();
        match method {
            SendMethod::Post | SendMethod::Put => {
                let record = record.cloned().unwrap_or(Value::Null);
                let id = id
                    .or_else(|| record["id"].as_str().map(String::from))
                    .unwrap_or_default();
                if method == SendMethod::Post && table.contains_key(&id) {
                    return Err(RemoteError::Status {
                        status: 409,
                        message: "already exists".into(),
                    });
                }
                table.insert(id, record.clone());
                Ok(Some(state.reply.take().unwrap_or(record)))
            }
            SendMethod::Delete => {
                let id = id.unwrap_or_default();
                match table.remove(&id) {
                    Some(_) => Ok(None),
                    None => Err(RemoteError::Status {
                        status: 404,
                        message: "not found".into(),
                    }),
                }
            }
        }
    }
}
