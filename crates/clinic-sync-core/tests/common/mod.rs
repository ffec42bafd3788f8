//! Shared fixtures: an in-process clinic API plus identity and clock stubs.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use clinic_sync_core::db::{Database, LocalStore};
use clinic_sync_core::remote::HttpRemoteClient;
use clinic_sync_core::sync::{Account, Clock, IdentityProvider, RecordStore, SyncEngine, WriteCoordinator};

#[derive(Default)]
struct ApiState {
    /// resource -> id -> record
    tables: BTreeMap<String, BTreeMap<String, Value>>,
    requests: Vec<String>,
    down: bool,
}

/// Clinic API served over real HTTP on a loopback port.
#[derive(Clone, Default)]
pub struct ClinicApi {
    state: Arc<Mutex<ApiState>>,
}

impl ClinicApi {
    /// Bind to an ephemeral port and return the base URL.
    pub async fn spawn(&self) -> String {
        let router = Router::new()
            .route("/{resource}", get(list).post(create))
            .route("/{resource}/{id}", put(replace).delete(remove))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    pub fn seed(&self, resource: &str, record: Value) {
        let id = record["id"].as_str().unwrap().to_string();
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

    pub fn count(&self, resource: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(resource)
            .map_or(0, |t| t.len())
    }

    /// Requests seen so far, as `METHOD /path`.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }

    /// Answer every request with 503 while down.
    pub fn set_down(&self, down: bool) {
        self.state.lock().unwrap().down = down;
    }

    fn begin(&self, request: String) -> Result<std::sync::MutexGuard<'_, ApiState>, Response> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request);
        if state.down {
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"message": "maintenance"})),
            )
                .into_response());
        }
        Ok(state)
    }
}

async fn list(
    State(api): State<ClinicApi>,
    Path(resource): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let state = match api.begin(format!("GET /{}", resource)) {
        Ok(state) => state,
        Err(response) => return response,
    };
    let owner = params.get("ownerId");
    let since = params.get("modifiedSince");

    let items: Vec<Value> = state
        .tables
        .get(&resource)
        .map(|table| {
            table
                .values()
                .filter(|r| owner.map_or(true, |o| r["ownerId"].as_str() == Some(o.as_str())))
                .filter(|r| {
                    since.map_or(true, |s| {
                        r["lastModified"].as_str().unwrap_or_default() > s.as_str()
                    })
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    Json(Value::Array(items)).into_response()
}

async fn create(
    State(api): State<ClinicApi>,
    Path(resource): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = match api.begin(format!("POST /{}", resource)) {
        Ok(state) => state,
        Err(response) => return response,
    };
    let id = body["id"].as_str().unwrap_or_default().to_string();
    let table = state.tables.entry(resource).or_default();
    if table.contains_key(&id) {
        return (StatusCode::CONFLICT, Json(json!({"message": "already exists"}))).into_response();
    }
    table.insert(id, body.clone());
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn replace(
    State(api): State<ClinicApi>,
    Path((resource, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = match api.begin(format!("PUT /{}/{}", resource, id)) {
        Ok(state) => state,
        Err(response) => return response,
    };
    state.tables.entry(resource).or_default().insert(id, body.clone());
    Json(body).into_response()
}

async fn remove(
    State(api): State<ClinicApi>,
    Path((resource, id)): Path<(String, String)>,
) -> Response {
    let mut state = match api.begin(format!("DELETE /{}/{}", resource, id)) {
        Ok(state) => state,
        Err(response) => return response,
    };
    match state.tables.get_mut(&resource).and_then(|t| t.get_mut(&id)) {
        Some(record) => {
            record["isDeleted"] = json!(true);
            StatusCode::NO_CONTENT.into_response()
        }
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "no such record"}))).into_response(),
    }
}

/// Clock that moves one second forward on every reading.
pub struct SteppingClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for SteppingClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::seconds(1);
        *now
    }
}

/// Signed-in doctor whose token can be revoked.
pub struct Doctor {
    id: String,
    token: Mutex<Option<String>>,
}

impl Doctor {
    pub fn signed_in(id: &str) -> Self {
        Self {
            id: id.to_string(),
            token: Mutex::new(Some(format!("token-{}", id))),
        }
    }

    pub fn set_token(&self, token: Option<&str>) {
        *self.token.lock().unwrap() = token.map(String::from);
    }
}

impl IdentityProvider for Doctor {
    fn access_token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    fn current_account(&self) -> Option<Account> {
        Some(Account::new(self.id.clone()))
    }
}

/// One device: local store plus the write path and reconciler on top of it.
pub struct Device {
    pub store: Arc<dyn LocalStore>,
    pub records: RecordStore,
    pub doctor: Arc<Doctor>,
    pub clock: Arc<SteppingClock>,
    pub coordinator: WriteCoordinator,
    pub engine: Arc<SyncEngine>,
}

impl Device {
    pub fn new(base_url: &str, db: Database, doctor: &str) -> Self {
        Self::with_clock(base_url, db, doctor, Arc::new(SteppingClock::default()))
    }

    /// A device whose clock is shared with others, so writes order globally.
    pub fn with_clock(base_url: &str, db: Database, doctor: &str, clock: Arc<SteppingClock>) -> Self {
        let store: Arc<dyn LocalStore> = Arc::new(db);
        let remote = Arc::new(HttpRemoteClient::new(base_url, Duration::from_secs(5)).unwrap());
        let doctor = Arc::new(Doctor::signed_in(doctor));
        let records = RecordStore::new(store.clone());

        let coordinator =
            WriteCoordinator::new(records.clone(), remote.clone(), doctor.clone(), clock.clone());
        let engine = Arc::new(SyncEngine::new(store.clone(), remote, doctor.clone(), clock.clone()));

        Self {
            store,
            records,
            doctor,
            clock,
            coordinator,
            engine,
        }
    }

    pub fn in_memory(base_url: &str, doctor: &str) -> Self {
        Self::new(base_url, Database::open_in_memory().unwrap(), doctor)
    }
}
