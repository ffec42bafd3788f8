//! Clinic Sync Core Library
//!
//! Offline-first synchronization for the clinic record app.
//!
//! # Architecture
//!
//! ```text
//!   UI ──► WriteCoordinator ──► RemoteClient (write-through)
//!                 │                   │ failure / no token
//!                 ▼                   ▼
//!            LocalStore ◄──────── local-only write (stays dirty)
//!                 ▲
//!                 │ push dirty rows, pull changes, advance watermarks
//!            SyncEngine ◄── SyncScheduler (timer, connectivity, force sync)
//! ```
//!
//! # Core Principle
//!
//! **Writes never fail because the network did.** A mutation that cannot
//! reach the server is kept locally and pushed by the next reconciliation.
//!
//! # Modules
//!
//! - [`db`]: SQLite store and schema
//! - [`models`]: Collections, records and typed entities
//! - [`remote`]: Remote API client
//! - [`sync`]: Write path, reconciler and scheduler
//! - [`config`]: Sync configuration

pub mod config;
pub mod db;
pub mod models;
pub mod remote;
pub mod sync;

// Re-export commonly used types
pub use config::SyncConfig;
pub use db::{Database, LocalStore};
pub use models::{
    Collection, Drug, Entity, LabOrder, LabTestType, Patient, Prescription, RecordMeta,
    SyncRecord, Visit,
};
pub use remote::{HttpRemoteClient, RemoteClient};
pub use sync::{
    Account, Clock, ConnectivityMonitor, ConnectivityProbe, IdentityProvider, SyncEngine,
    SyncReport, SyncScheduler, SystemClock, WriteCoordinator,
};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::Arc;

use sync::{CommitPolicy, Mutation, RecordStore, SyncError};
use tokio::runtime::Runtime;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum ClinicSyncError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Not signed in: {0}")]
    Unauthenticated(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Offline: {0}")]
    Offline(String),
}

impl From<db::DbError> for ClinicSyncError {
    fn from(e: db::DbError) -> Self {
        ClinicSyncError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for ClinicSyncError {
    fn from(e: serde_json::Error) -> Self {
        ClinicSyncError::SerializationError(e.to_string())
    }
}

impl From<remote::RemoteError> for ClinicSyncError {
    fn from(e: remote::RemoteError) -> Self {
        ClinicSyncError::NetworkError(e.to_string())
    }
}

impl From<config::ConfigError> for ClinicSyncError {
    fn from(e: config::ConfigError) -> Self {
        ClinicSyncError::InvalidInput(e.to_string())
    }
}

impl From<SyncError> for ClinicSyncError {
    fn from(e: SyncError) -> Self {
        let message = e.to_string();
        match e {
            SyncError::Storage(_) => ClinicSyncError::DatabaseError(message),
            SyncError::Remote(_) => ClinicSyncError::NetworkError(message),
            SyncError::Malformed(_) => ClinicSyncError::InvalidInput(message),
            SyncError::Json(_) => ClinicSyncError::SerializationError(message),
            SyncError::Unauthenticated => ClinicSyncError::Unauthenticated(message),
            SyncError::Unauthorized(_) => ClinicSyncError::Unauthorized(message),
            SyncError::Offline => ClinicSyncError::Offline(message),
        }
    }
}

// =========================================================================
// Host Callbacks (implemented in Swift/Kotlin)
// =========================================================================

/// Supplies the signed-in account and its bearer token.
#[uniffi::export(with_foreign)]
pub trait IdentityBridge: Send + Sync {
    fn access_token(&self) -> Option<String>;
    fn current_account_id(&self) -> Option<String>;
    fn entitlements(&self) -> Vec<String>;
}

/// Receives every Idle/Syncing transition.
#[uniffi::export(with_foreign)]
pub trait SyncStatusListener: Send + Sync {
    fn on_sync_status(&self, syncing: bool);
}

struct BridgedIdentity(Arc<dyn IdentityBridge>);

impl IdentityProvider for BridgedIdentity {
    fn access_token(&self) -> Option<String> {
        self.0.access_token()
    }

    fn current_account(&self) -> Option<Account> {
        self.0.current_account_id().map(|id| Account {
            id,
            entitlements: self.0.entitlements(),
        })
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Install the log subscriber. `filter` uses `RUST_LOG` syntax; repeated
/// calls keep the first subscriber.
#[uniffi::export]
pub fn init_logging(filter: String) {
    let filter = tracing_subscriber::EnvFilter::try_new(&filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Load configuration from JSON, or from `CLINIC_SYNC_*` environment
/// variables when `json` is absent.
#[uniffi::export]
pub fn load_sync_config(json: Option<String>) -> Result<FfiSyncConfig, ClinicSyncError> {
    let config = match json {
        Some(json) => SyncConfig::from_json(&json)?,
        None => SyncConfig::from_env()?,
    };
    Ok(config.into())
}

/// Open or create the local store at the given path.
#[uniffi::export]
pub fn open_sync_core(
    path: String,
    config: FfiSyncConfig,
    identity: Arc<dyn IdentityBridge>,
) -> Result<Arc<ClinicSyncCore>, ClinicSyncError> {
    let db = Database::open(&path)?;
    ClinicSyncCore::build(db, config, identity)
}

/// Create an in-memory store (for testing).
#[uniffi::export]
pub fn open_sync_core_in_memory(
    config: FfiSyncConfig,
    identity: Arc<dyn IdentityBridge>,
) -> Result<Arc<ClinicSyncCore>, ClinicSyncError> {
    let db = Database::open_in_memory()?;
    ClinicSyncCore::build(db, config, identity)
}

// =========================================================================
// Main API Object
// =========================================================================

/// Sync subsystem handle for the host app.
///
/// Owns its own tokio runtime; every method blocks the calling (host) thread
/// until done. Records cross the boundary as JSON strings.
#[derive(uniffi::Object)]
pub struct ClinicSyncCore {
    coordinator: WriteCoordinator,
    engine: Arc<SyncEngine>,
    scheduler: SyncScheduler,
    connectivity: Arc<ConnectivityMonitor>,
    runtime: Runtime,
}

impl ClinicSyncCore {
    fn build(
        db: Database,
        config: FfiSyncConfig,
        identity: Arc<dyn IdentityBridge>,
    ) -> Result<Arc<Self>, ClinicSyncError> {
        let config = SyncConfig::try_from(config)?;
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("clinic-sync")
            .enable_all()
            .build()
            .map_err(|e| ClinicSyncError::DatabaseError(format!("runtime: {}", e)))?;

        let store: Arc<dyn LocalStore> = Arc::new(db);
        let remote: Arc<dyn RemoteClient> =
            Arc::new(HttpRemoteClient::new(&config.base_url, config.request_timeout())?);
        let identity: Arc<dyn IdentityProvider> = Arc::new(BridgedIdentity(identity));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let coordinator = WriteCoordinator::new(
            RecordStore::new(store.clone()),
            remote.clone(),
            identity.clone(),
            clock.clone(),
        );
        let engine = Arc::new(
            SyncEngine::new(store, remote, identity, clock)
                .with_collections(config.collections.clone())
                .with_commit_policy(config.commit_policy),
        );
        let connectivity = Arc::new(ConnectivityMonitor::new(false));
        let scheduler = SyncScheduler::new(
            engine.clone(),
            connectivity.clone(),
            config.sync_interval(),
        );

        info!(base_url = %config.base_url, "clinic sync core opened");
        Ok(Arc::new(Self {
            coordinator,
            engine,
            scheduler,
            connectivity,
            runtime,
        }))
    }

    fn mutate(
        &self,
        collection: &str,
        record_json: &str,
        op: Mutation,
    ) -> Result<String, ClinicSyncError> {
        let collection = parse_collection(collection)?;
        let record = SyncRecord::from_json(serde_json::from_str(record_json)?)?;
        let stored = self
            .runtime
            .block_on(self.coordinator.mutate(collection, record, op))?;
        Ok(serde_json::to_string(&stored)?)
    }
}

#[uniffi::export]
impl ClinicSyncCore {
    // =========================================================================
    // Record Operations
    // =========================================================================

    /// Create a record. Missing `id` and `ownerId` are filled in.
    pub fn create_record(
        &self,
        collection: String,
        record_json: String,
    ) -> Result<String, ClinicSyncError> {
        self.mutate(&collection, &record_json, Mutation::Create)
    }

    /// Replace a record of the current account.
    pub fn update_record(
        &self,
        collection: String,
        record_json: String,
    ) -> Result<String, ClinicSyncError> {
        self.mutate(&collection, &record_json, Mutation::Update)
    }

    /// Soft-delete a record of the current account by id.
    pub fn delete_record(&self, collection: String, id: String) -> Result<String, ClinicSyncError> {
        let parsed = parse_collection(&collection)?;
        let record = self
            .coordinator
            .get_record(parsed, &id)?
            .ok_or_else(|| ClinicSyncError::NotFound(format!("{}/{}", collection, id)))?;
        let stored = self
            .runtime
            .block_on(self.coordinator.mutate(parsed, record, Mutation::Delete))?;
        Ok(serde_json::to_string(&stored)?)
    }

    /// Get a record by id (tombstones included).
    pub fn get_record(
        &self,
        collection: String,
        id: String,
    ) -> Result<Option<String>, ClinicSyncError> {
        let collection = parse_collection(&collection)?;
        match self.coordinator.get_record(collection, &id)? {
            Some(record) => Ok(Some(serde_json::to_string(&record)?)),
            None => Ok(None),
        }
    }

    /// List the current account's live records, newest first.
    pub fn list_records(&self, collection: String) -> Result<Vec<String>, ClinicSyncError> {
        let collection = parse_collection(&collection)?;
        self.coordinator
            .list_records(collection)?
            .iter()
            .map(|record| serde_json::to_string(record).map_err(ClinicSyncError::from))
            .collect()
    }

    // =========================================================================
    // Sync Operations
    // =========================================================================

    /// Feed the platform's reachability callback.
    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }

    /// Start periodic and connectivity-triggered sync.
    pub fn start_sync(&self) {
        let _guard = self.runtime.enter();
        self.scheduler.start();
    }

    /// Stop triggering syncs. A running sync finishes.
    pub fn stop_sync(&self) {
        self.scheduler.shutdown();
    }

    /// Sync now and wait. `None` when a sync was already running.
    pub fn force_sync(&self) -> Result<Option<FfiSyncReport>, ClinicSyncError> {
        let report = self.runtime.block_on(self.scheduler.force_sync())?;
        Ok(report.map(FfiSyncReport::from))
    }

    /// Start a background sync. Returns false when one is already running.
    pub fn request_sync(&self) -> bool {
        let _guard = self.runtime.enter();
        self.scheduler.request_sync() == sync::TriggerOutcome::Started
    }

    pub fn is_syncing(&self) -> bool {
        self.scheduler.is_syncing()
    }

    /// Forward sync status transitions to `listener`.
    pub fn set_status_listener(&self, listener: Arc<dyn SyncStatusListener>) {
        let mut rx = self.scheduler.subscribe_status();
        self.runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(syncing) => listener.on_sync_status(syncing),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "status listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Unsynced row count per collection.
    pub fn pending_changes(&self) -> Result<Vec<FfiPendingChanges>, ClinicSyncError> {
        Ok(self
            .engine
            .pending_changes()?
            .into_iter()
            .map(|(collection, count)| FfiPendingChanges {
                collection: collection.to_string(),
                count: count as u32,
            })
            .collect())
    }

    /// Last successful sync per collection.
    pub fn last_synced(&self) -> Result<Vec<FfiWatermark>, ClinicSyncError> {
        Ok(self
            .engine
            .last_synced()?
            .into_iter()
            .map(|(collection, last_synced)| FfiWatermark {
                collection: collection.to_string(),
                last_synced,
            })
            .collect())
    }

    /// Drop tombstones the server already has. Returns rows removed.
    pub fn evict_synced_tombstones(&self, collection: String) -> Result<u32, ClinicSyncError> {
        let collection = parse_collection(&collection)?;
        Ok(self.engine.evict_synced_tombstones(collection)? as u32)
    }
}

fn parse_collection(name: &str) -> Result<Collection, ClinicSyncError> {
    name.parse().map_err(ClinicSyncError::InvalidInput)
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe sync configuration.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSyncConfig {
    pub base_url: String,
    pub sync_interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Collection names in sync order; empty means all
    pub collections: Vec<String>,
    pub per_collection_commit: bool,
}

impl From<SyncConfig> for FfiSyncConfig {
    fn from(config: SyncConfig) -> Self {
        Self {
            base_url: config.base_url,
            sync_interval_secs: config.sync_interval_secs,
            request_timeout_secs: config.request_timeout_secs,
            collections: config.collections.iter().map(|c| c.to_string()).collect(),
            per_collection_commit: config.commit_policy == CommitPolicy::PerCollection,
        }
    }
}

impl TryFrom<FfiSyncConfig> for SyncConfig {
    type Error = ClinicSyncError;

    fn try_from(config: FfiSyncConfig) -> Result<Self, Self::Error> {
        let collections = if config.collections.is_empty() {
            Collection::ALL.to_vec()
        } else {
            config
                .collections
                .iter()
                .map(|name| parse_collection(name))
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(SyncConfig {
            base_url: config.base_url,
            sync_interval_secs: config.sync_interval_secs,
            request_timeout_secs: config.request_timeout_secs,
            collections,
            commit_policy: if config.per_collection_commit {
                CommitPolicy::PerCollection
            } else {
                CommitPolicy::AllOrNothing
            },
        })
    }
}

/// FFI-safe per-collection sync outcome.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCollectionReport {
    pub collection: String,
    pub pushed: u32,
    pub deleted: u32,
    pub pulled: u32,
    pub skipped: u32,
    pub watermark: Option<String>,
}

/// FFI-safe sync cycle outcome.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSyncReport {
    pub started_at: String,
    pub pushed: u32,
    pub pulled: u32,
    pub collections: Vec<FfiCollectionReport>,
}

impl From<SyncReport> for FfiSyncReport {
    fn from(report: SyncReport) -> Self {
        Self {
            pushed: report.total_pushed() as u32,
            pulled: report.total_pulled() as u32,
            started_at: report.started_at,
            collections: report
                .collections
                .into_iter()
                .map(|c| FfiCollectionReport {
                    collection: c.collection.to_string(),
                    pushed: c.pushed as u32,
                    deleted: c.deleted as u32,
                    pulled: c.pulled as u32,
                    skipped: c.skipped as u32,
                    watermark: c.watermark,
                })
                .collect(),
        }
    }
}

/// FFI-safe unsynced row count.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPendingChanges {
    pub collection: String,
    pub count: u32,
}

/// FFI-safe collection watermark.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiWatermark {
    pub collection: String,
    pub last_synced: Option<String>,
}
