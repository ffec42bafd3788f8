//! Write-through-with-fallback path for create, update and delete.
//!
//! Each mutation is stamped, sent to the server, and mirrored locally. When
//! the server cannot be reached (or there is no token) the mutation is applied
//! locally only and stays dirty for the next reconciliation. Remote failures
//! never reach the caller; authorization and storage failures do.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::{format_timestamp, normalize_timestamp, Collection, Entity, SyncRecord};
use crate::remote::{RemoteClient, SendMethod};

use super::clock::Clock;
use super::error::{SyncError, SyncResult};
use super::identity::{Account, IdentityProvider};
use super::records::{RecordStore, WriteOrigin};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Create,
    Update,
    Delete,
}

pub struct WriteCoordinator {
    records: RecordStore,
    remote: Arc<dyn RemoteClient>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
}

impl WriteCoordinator {
    pub fn new(
        records: RecordStore,
        remote: Arc<dyn RemoteClient>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            records,
            remote,
            identity,
            clock,
        }
    }

    /// Apply one mutation. Returns the copy that was stored locally.
    pub async fn mutate(
        &self,
        collection: Collection,
        mut record: SyncRecord,
        op: Mutation,
    ) -> SyncResult<SyncRecord> {
        let account = self.account()?;
        authorize(&account, &mut record, op)?;

        record.last_modified = format_timestamp(self.clock.now());
        match op {
            Mutation::Create => record.is_deleted = false,
            Mutation::Delete => record.is_deleted = true,
            Mutation::Update => {}
        }
        self.records.check(collection, &record)?;

        let Some(token) = self.identity.access_token() else {
            debug!(%collection, id = %record.id, "no access token, writing locally");
            self.records.write(collection, &record, WriteOrigin::Local)?;
            return Ok(record);
        };

        let (endpoint, method, body) = match op {
            Mutation::Create => (collection.endpoint().to_string(), SendMethod::Post, Some(record.to_json()?)),
            Mutation::Update => (collection.item_endpoint(&record.id), SendMethod::Put, Some(record.to_json()?)),
            Mutation::Delete => (collection.item_endpoint(&record.id), SendMethod::Delete, None),
        };

        match self
            .remote
            .send(&endpoint, body.as_ref(), &token, method)
            .await
        {
            Ok(reply) => {
                let stored = match reply {
                    Some(reply) if op != Mutation::Delete => match server_copy(reply, &record) {
                        Ok(copy) => copy,
                        Err(reason) => {
                            warn!(%collection, id = %record.id, %reason, "discarding server reply");
                            self.records.write(collection, &record, WriteOrigin::Local)?;
                            return Ok(record);
                        }
                    },
                    _ => record,
                };
                let acknowledged = WriteOrigin::Acknowledged(format_timestamp(self.clock.now()));
                self.records.write(collection, &stored, acknowledged)?;
                debug!(%collection, id = %stored.id, method = method.as_str(), "written through");
                Ok(stored)
            }
            Err(e) => {
                warn!(%collection, id = %record.id, error = %e, "remote write failed, keeping local copy");
                self.records.write(collection, &record, WriteOrigin::Local)?;
                Ok(record)
            }
        }
    }

    pub async fn create<E: Entity>(&self, entity: E) -> SyncResult<E> {
        self.mutate_entity(entity, Mutation::Create).await
    }

    pub async fn update<E: Entity>(&self, entity: E) -> SyncResult<E> {
        self.mutate_entity(entity, Mutation::Update).await
    }

    pub async fn delete<E: Entity>(&self, entity: E) -> SyncResult<E> {
        self.mutate_entity(entity, Mutation::Delete).await
    }

    async fn mutate_entity<E: Entity>(&self, entity: E, op: Mutation) -> SyncResult<E> {
        let record = SyncRecord::from_entity(&entity)?;
        let stored = self.mutate(E::COLLECTION, record, op).await?;
        Ok(stored.into_entity()?)
    }

    /// A record of the current account, tombstones included.
    pub fn get_record(&self, collection: Collection, id: &str) -> SyncResult<Option<SyncRecord>> {
        let account = self.account()?;
        Ok(self
            .records
            .get(collection, id)?
            .map(|stored| stored.record)
            .filter(|record| record.owner_id == account.id))
    }

    /// Non-deleted records of the current account.
    pub fn list_records(&self, collection: Collection) -> SyncResult<Vec<SyncRecord>> {
        let account = self.account()?;
        self.records.list_active(collection, &account.id)
    }

    pub fn get<E: Entity>(&self, id: &str) -> SyncResult<Option<E>> {
        match self.get_record(E::COLLECTION, id)? {
            Some(record) => Ok(Some(record.into_entity()?)),
            None => Ok(None),
        }
    }

    pub fn list<E: Entity>(&self) -> SyncResult<Vec<E>> {
        self.list_records(E::COLLECTION)?
            .into_iter()
            .map(|record| record.into_entity().map_err(SyncError::from))
            .collect()
    }

    fn account(&self) -> SyncResult<Account> {
        self.identity
            .current_account()
            .ok_or(SyncError::Unauthenticated)
    }
}

/// Ownership rules, checked before either store is touched.
fn authorize(account: &Account, record: &mut SyncRecord, op: Mutation) -> SyncResult<()> {
    match op {
        Mutation::Create => {
            if record.id.is_empty() {
                record.id = uuid::Uuid::new_v4().to_string();
            }
            if record.owner_id.is_empty() {
                record.owner_id = account.id.clone();
            }
        }
        Mutation::Update | Mutation::Delete => {
            if record.id.is_empty() {
                return Err(SyncError::Malformed("record without id".into()));
            }
        }
    }

    if record.owner_id != account.id {
        return Err(SyncError::Unauthorized(format!(
            "record {} belongs to {}",
            record.id, record.owner_id
        )));
    }
    Ok(())
}

/// Accept the server's reply only if it is a record with the same id.
fn server_copy(reply: serde_json::Value, sent: &SyncRecord) -> Result<SyncRecord, String> {
    let mut copy = SyncRecord::from_json(reply).map_err(|e| e.to_string())?;
    if copy.id != sent.id {
        return Err(format!("reply is for record {:?}", copy.id));
    }
    if copy.owner_id.is_empty() {
        copy.owner_id = sent.owner_id.clone();
    }
    copy.last_modified = if copy.last_modified.is_empty() {
        sent.last_modified.clone()
    } else {
        normalize_timestamp(&copy.last_modified)
            .ok_or_else(|| format!("bad lastModified {:?}", copy.last_modified))?
    };
    Ok(copy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Drug, Patient};
    use crate::remote::RemoteError;
    use crate::sync::testing::{FakeRemote, ManualClock, StaticIdentity};
    use serde_json::json;

    struct Harness {
        remote: Arc<FakeRemote>,
        identity: Arc<StaticIdentity>,
        clock: Arc<ManualClock>,
        records: RecordStore,
        coordinator: WriteCoordinator,
    }

    fn setup() -> Harness {
        let remote = Arc::new(FakeRemote::new());
        let identity = Arc::new(StaticIdentity::signed_in("doc-1"));
        let clock = Arc::new(ManualClock::default());
        let records = RecordStore::new(Arc::new(Database::open_in_memory().unwrap()));
        let coordinator = WriteCoordinator::new(
            records.clone(),
            remote.clone(),
            identity.clone(),
            clock.clone(),
        );
        Harness {
            remote,
            identity,
            clock,
            records,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_create_online_writes_through() {
        let h = setup();
        let created = h.coordinator.create(Patient::new("Ada")).await.unwrap();

        assert_eq!(created.meta.owner_id, "doc-1");
        assert_eq!(created.meta.last_modified, "2024-01-15T10:00:00.000Z");
        assert_eq!(h.remote.calls(), vec!["POST patients"]);
        assert!(h.remote.record("patients", &created.meta.id).is_some());

        let stored = h.records.get(Collection::Patients, &created.meta.id).unwrap().unwrap();
        assert!(stored.is_acknowledged());
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_local() {
        let h = setup();
        h.remote.set_offline(true);

        let mut drug = Drug::new("Ibuprofen");
        drug.meta.last_modified = "2020-01-01T00:00:00.000Z".into();
        let created = h.coordinator.create(drug).await.unwrap();
        assert_eq!(created.meta.last_modified, "2024-01-15T10:00:00.000Z");

        let stored = h.records.get(Collection::Drugs, &created.meta.id).unwrap().unwrap();
        assert!(!stored.is_acknowledged());
        assert_eq!(stored.record.fields["name"], "Ibuprofen");
    }

    #[tokio::test]
    async fn test_delete_is_soft_even_when_offline() {
        let h = setup();
        let created = h.coordinator.create(Patient::new("Ada")).await.unwrap();

        h.remote.set_offline(true);
        h.clock.advance_secs(60);
        let deleted = h.coordinator.delete(created.clone()).await.unwrap();

        assert!(deleted.meta.is_deleted);
        assert_eq!(deleted.meta.last_modified, "2024-01-15T10:01:00.000Z");
        let stored = h.records.get(Collection::Patients, &created.meta.id).unwrap().unwrap();
        assert!(stored.record.is_deleted);
        // Acknowledgement from the original create survives the local-only delete
        assert!(stored.is_acknowledged());
        assert!(h.coordinator.list::<Patient>().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_is_local_only() {
        let h = setup();
        h.identity.set_token(None);

        let created = h.coordinator.create(Patient::new("Ada")).await.unwrap();
        assert!(h.remote.calls().is_empty());
        assert!(h.coordinator.get::<Patient>(&created.meta.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_no_account_is_unauthenticated() {
        let h = setup();
        h.identity.sign_out();

        let result = h.coordinator.create(Patient::new("Ada")).await;
        assert!(matches!(result, Err(SyncError::Unauthenticated)));
        assert!(h.records.dirty_since(Collection::Patients, "doc-1", None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_record_is_unauthorized() {
        let h = setup();
        let mut patient = Patient::new("Ada");
        patient.meta.owner_id = "doc-2".into();

        let result = h.coordinator.update(patient.clone()).await;
        assert!(matches!(result, Err(SyncError::Unauthorized(_))));
        let result = h.coordinator.create(patient.clone()).await;
        assert!(matches!(result, Err(SyncError::Unauthorized(_))));

        assert!(h.remote.calls().is_empty());
        assert!(h.records.get(Collection::Patients, &patient.meta.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_copy_is_stored() {
        let h = setup();
        let patient = h.coordinator.create(Patient::new("Ada")).await.unwrap();

        let mut reply = serde_json::to_value(&patient).unwrap();
        reply["name"] = json!("Ada Lovelace");
        reply["lastModified"] = json!("2024-01-15T12:00:00+02:00");
        h.remote.reply_once(reply);

        let updated = h.coordinator.update(patient).await.unwrap();
        assert_eq!(updated.name, "Ada Lovelace");
        assert_eq!(updated.meta.last_modified, "2024-01-15T10:00:00.000Z");
    }

    #[tokio::test]
    async fn test_mismatched_reply_downgraded_to_local() {
        let h = setup();
        h.remote.reply_once(json!({"id": "someone-else", "name": "Eve"}));

        let created = h.coordinator.create(Patient::new("Ada")).await.unwrap();
        assert_eq!(created.name, "Ada");

        let stored = h.records.get(Collection::Patients, &created.meta.id).unwrap().unwrap();
        assert!(!stored.is_acknowledged());
        assert!(h.records.get(Collection::Patients, "someone-else").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_raw_record_create_fills_id_and_owner() {
        let h = setup();
        let record = SyncRecord::from_json(json!({"testName": "CBC", "visitId": "v-1"})).unwrap();

        let stored = h
            .coordinator
            .mutate(Collection::LabOrders, record, Mutation::Create)
            .await
            .unwrap();
        assert_eq!(stored.id.len(), 36);
        assert_eq!(stored.owner_id, "doc-1");
        assert!(!stored.is_deleted);
    }

    #[tokio::test]
    async fn test_update_without_id_rejected() {
        let h = setup();
        let record = SyncRecord::from_json(json!({"ownerId": "doc-1"})).unwrap();
        let result = h
            .coordinator
            .mutate(Collection::Patients, record, Mutation::Update)
            .await;
        assert!(matches!(result, Err(SyncError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_typed_reads_tolerate_rows_without_required_text() {
        let h = setup();
        let bare = SyncRecord::from_json(json!({"phone": "555-0100"})).unwrap();
        let stored = h
            .coordinator
            .mutate(Collection::Patients, bare, Mutation::Create)
            .await
            .unwrap();
        h.coordinator.create(Patient::new("Ada")).await.unwrap();

        let patients = h.coordinator.list::<Patient>().unwrap();
        assert_eq!(patients.len(), 2);

        let nameless: Patient = h.coordinator.get(&stored.id).unwrap().unwrap();
        assert_eq!(nameless.name, "");
        assert_eq!(nameless.phone.as_deref(), Some("555-0100"));
    }

    #[test]
    fn test_server_copy_validation() {
        let sent = SyncRecord::from_json(json!({
            "id": "p-1", "ownerId": "doc-1", "lastModified": "2024-01-15T10:00:00.000Z"
        }))
        .unwrap();

        assert!(server_copy(json!({"id": "p-1", "lastModified": "soon"}), &sent).is_err());
        assert!(server_copy(json!([1, 2]), &sent).is_err());

        let copy = server_copy(json!({"id": "p-1"}), &sent).unwrap();
        assert_eq!(copy.owner_id, "doc-1");
        assert_eq!(copy.last_modified, "2024-01-15T10:00:00.000Z");
    }

    #[test]
    fn test_remote_error_helpers() {
        assert!(RemoteError::Status { status: 404, message: String::new() }.is_not_found());
        assert!(!RemoteError::Transport("x".into()).is_not_found());
    }
}
