//! Push-then-pull reconciliation across the syncable collections.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::db::LocalStore;
use crate::models::{
    format_timestamp, is_path_safe_id, normalize_timestamp, Collection, SyncRecord,
};
use crate::remote::{RemoteClient, RemoteError, SendMethod};

use super::clock::Clock;
use super::error::{SyncError, SyncResult};
use super::identity::{Account, IdentityProvider};
use super::records::{RecordStore, StoredRecord};
use super::watermark::{advance, Watermarks};

/// When watermarks are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// One batch after every collection succeeded. A failure anywhere leaves
    /// every watermark where it was.
    #[default]
    AllOrNothing,
    /// Each collection's watermark is written as soon as it completes.
    PerCollection,
}

/// Outcome of one collection within a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionReport {
    pub collection: Collection,
    /// Live rows sent with POST or PUT.
    pub pushed: usize,
    /// Tombstones sent with DELETE.
    pub deleted: usize,
    /// Server copies applied locally.
    pub pulled: usize,
    /// Server copies refused by a local tombstone.
    pub skipped: usize,
    /// Watermark committed (or staged) for the collection.
    pub watermark: Option<String>,
}

impl CollectionReport {
    fn new(collection: Collection) -> Self {
        Self {
            collection,
            pushed: 0,
            deleted: 0,
            pulled: 0,
            skipped: 0,
            watermark: None,
        }
    }
}

/// Outcome of a full cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub started_at: String,
    pub collections: Vec<CollectionReport>,
}

impl SyncReport {
    pub fn total_pushed(&self) -> usize {
        self.collections.iter().map(|c| c.pushed + c.deleted).sum()
    }

    pub fn total_pulled(&self) -> usize {
        self.collections.iter().map(|c| c.pulled).sum()
    }
}

/// Reconciles local and remote state, one collection at a time.
pub struct SyncEngine {
    records: RecordStore,
    watermarks: Watermarks,
    remote: Arc<dyn RemoteClient>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    collections: Vec<Collection>,
    policy: CommitPolicy,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteClient>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            records: RecordStore::new(store.clone()),
            watermarks: Watermarks::new(store),
            remote,
            identity,
            clock,
            collections: Collection::ALL.to_vec(),
            policy: CommitPolicy::default(),
        }
    }

    /// Restrict and order the collections reconciled per cycle.
    pub fn with_collections(mut self, collections: Vec<Collection>) -> Self {
        self.collections = collections;
        self
    }

    pub fn with_commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run one full cycle: push then pull each collection in order, then
    /// advance watermarks. The first error aborts the cycle.
    pub async fn reconcile_all(&self) -> SyncResult<SyncReport> {
        let token = self
            .identity
            .access_token()
            .ok_or(SyncError::Unauthenticated)?;
        let account = self
            .identity
            .current_account()
            .ok_or(SyncError::Unauthenticated)?;

        let now = self.clock.now();
        let started_at = format_timestamp(now);
        // One millisecond back: a write stamped in the cycle's first
        // millisecond after its collection was pushed must stay dirty
        let cutoff = format_timestamp(now - Duration::milliseconds(1));
        info!(account = %account.id, %started_at, "sync cycle started");

        let mut report = SyncReport {
            started_at: started_at.clone(),
            collections: Vec::with_capacity(self.collections.len()),
        };
        let mut staged = Vec::new();

        for &collection in &self.collections {
            let watermark = self.watermarks.get(collection)?;
            let mut collection_report = match self
                .reconcile_collection(collection, &account, &token, watermark.as_deref())
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    error!(%collection, error = %e, "sync cycle aborted");
                    return Err(e);
                }
            };

            let next = advance(watermark.as_deref(), &cutoff);
            collection_report.watermark = Some(next.clone());
            match self.policy {
                CommitPolicy::PerCollection => self.watermarks.commit(&[(collection, next)])?,
                CommitPolicy::AllOrNothing => staged.push((collection, next)),
            }
            report.collections.push(collection_report);
        }

        self.watermarks.commit(&staged)?;
        info!(
            pushed = report.total_pushed(),
            pulled = report.total_pulled(),
            "sync cycle complete"
        );
        Ok(report)
    }

    async fn reconcile_collection(
        &self,
        collection: Collection,
        account: &Account,
        token: &str,
        watermark: Option<&str>,
    ) -> SyncResult<CollectionReport> {
        let mut report = CollectionReport::new(collection);

        let dirty = self.records.dirty_since(collection, &account.id, watermark)?;
        debug!(%collection, dirty = dirty.len(), ?watermark, "pushing");
        for stored in dirty {
            if stored.record.is_deleted {
                self.push_tombstone(collection, &stored, token).await?;
                report.deleted += 1;
            } else {
                self.push_record(collection, &stored, token).await?;
                report.pushed += 1;
            }
        }

        let mut params = vec![("ownerId".to_string(), account.id.clone())];
        if let Some(since) = watermark {
            params.push(("modifiedSince".to_string(), since.to_string()));
        }
        let items = self
            .remote
            .fetch(collection.endpoint(), &params, token)
            .await?;
        debug!(%collection, received = items.len(), "pulling");

        let acknowledged = format_timestamp(self.clock.now());
        for item in items {
            let record = pulled_record(collection, item, account)?;
            if self.records.apply_pulled(collection, &record, &acknowledged)? {
                report.pulled += 1;
            } else {
                debug!(%collection, id = %record.id, "kept local tombstone");
                report.skipped += 1;
            }
        }

        Ok(report)
    }

    async fn push_record(
        &self,
        collection: Collection,
        stored: &StoredRecord,
        token: &str,
    ) -> SyncResult<()> {
        let record = &stored.record;
        let body = record.to_json()?;
        let item = collection.item_endpoint(&record.id);

        if stored.is_acknowledged() {
            self.remote
                .send(&item, Some(&body), token, SendMethod::Put)
                .await?;
        } else {
            match self
                .remote
                .send(collection.endpoint(), Some(&body), token, SendMethod::Post)
                .await
            {
                Ok(_) => {}
                // Created earlier but the acknowledgement was lost
                Err(RemoteError::Status { status: 409, .. }) => {
                    warn!(%collection, id = %record.id, "record already on server, updating");
                    self.remote
                        .send(&item, Some(&body), token, SendMethod::Put)
                        .await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.records
            .mark_acknowledged(collection, &record.id, &format_timestamp(self.clock.now()))
    }

    async fn push_tombstone(
        &self,
        collection: Collection,
        stored: &StoredRecord,
        token: &str,
    ) -> SyncResult<()> {
        let id = &stored.record.id;
        match self
            .remote
            .send(&collection.item_endpoint(id), None, token, SendMethod::Delete)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!(%collection, %id, "tombstone unknown to server");
            }
            Err(e) => return Err(e.into()),
        }

        self.records
            .mark_acknowledged(collection, id, &format_timestamp(self.clock.now()))
    }

    /// Dirty rows per collection for the current account.
    pub fn pending_changes(&self) -> SyncResult<Vec<(Collection, usize)>> {
        let account = self
            .identity
            .current_account()
            .ok_or(SyncError::Unauthenticated)?;

        self.collections
            .iter()
            .map(|&collection| -> SyncResult<(Collection, usize)> {
                let watermark = self.watermarks.get(collection)?;
                let count = self
                    .records
                    .count_dirty(collection, &account.id, watermark.as_deref())?;
                Ok((collection, count))
            })
            .collect()
    }

    /// Watermark per collection; `None` until its first successful cycle.
    pub fn last_synced(&self) -> SyncResult<Vec<(Collection, Option<String>)>> {
        self.collections
            .iter()
            .map(|&collection| -> SyncResult<(Collection, Option<String>)> {
                Ok((collection, self.watermarks.get(collection)?))
            })
            .collect()
    }

    /// Physically drop tombstones the server has acknowledged and that are
    /// older than the collection's watermark.
    pub fn evict_synced_tombstones(&self, collection: Collection) -> SyncResult<usize> {
        let Some(watermark) = self.watermarks.get(collection)? else {
            return Ok(0);
        };
        let evicted = self.records.evict_synced_tombstones(collection, &watermark)?;
        if evicted > 0 {
            info!(%collection, evicted, "evicted synced tombstones");
        }
        Ok(evicted)
    }
}

/// Validate and normalize one record from a pull response.
fn pulled_record(
    collection: Collection,
    item: serde_json::Value,
    account: &Account,
) -> SyncResult<SyncRecord> {
    let mut record = SyncRecord::from_json(item)
        .map_err(|e| SyncError::Malformed(format!("{} record: {}", collection, e)))?;

    if !is_path_safe_id(&record.id) {
        return Err(SyncError::Malformed(format!(
            "{} record has unusable id {:?}",
            collection, record.id
        )));
    }
    record.last_modified = normalize_timestamp(&record.last_modified).ok_or_else(|| {
        SyncError::Malformed(format!(
            "{} record {} has bad lastModified {:?}",
            collection, record.id, record.last_modified
        ))
    })?;
    if record.owner_id.is_empty() {
        record.owner_id = account.id.clone();
    }
    Ok(record)
}
