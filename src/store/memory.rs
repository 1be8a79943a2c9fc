// src/store/memory.rs
//! In-process document store. Backs tests and single-node demos.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::{
    merge_patch, stamp_version, ChangeFeed, ChangeType, Collection, DocumentFilter,
    DocumentStore, RawChange, StoredDocument, Subscription,
};
use crate::error::{Result, SyncError};

#[derive(Default)]
struct Collections {
    personas: BTreeMap<String, StoredDocument>,
    broadcasts: BTreeMap<String, StoredDocument>,
}

impl Collections {
    fn get_mut(&mut self, collection: Collection) -> &mut BTreeMap<String, StoredDocument> {
        match collection {
            Collection::Personas => &mut self.personas,
            Collection::Broadcasts => &mut self.broadcasts,
        }
    }
}

pub struct MemoryStore {
    documents: Mutex<Collections>,
    feed: ChangeFeed,
    online: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(Collections::default()),
            feed: ChangeFeed::new(),
            online: AtomicBool::new(true),
        }
    }

    /// Simulates connectivity loss. Going offline drops every subscription.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if !online {
            self.feed.disconnect_all();
        }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    fn ensure_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::unavailable("memory store is offline"))
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>> {
        self.documents
            .lock()
            .map_err(|_| SyncError::unavailable("memory store lock poisoned"))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, collection: Collection, document: Value) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        self.create_with_id(collection, &id, document).await
    }

    async fn create_with_id(
        &self,
        collection: Collection,
        id: &str,
        mut document: Value,
    ) -> Result<String> {
        self.ensure_online()?;
        if !document.is_object() {
            return Err(SyncError::Validation(
                "documents must be JSON objects".to_string(),
            ));
        }
        stamp_version(&mut document, 1);
        let id = id.to_string();

        let mut docs = self.lock()?;
        let documents = docs.get_mut(collection);
        if documents.contains_key(&id) {
            return Err(SyncError::AlreadyExists {
                collection: collection.to_string(),
                id,
            });
        }
        documents.insert(
            id.clone(),
            StoredDocument {
                id: id.clone(),
                version: 1,
                data: document.clone(),
            },
        );
        // Publish under the lock so per-document order matches write order.
        self.feed.publish(
            collection,
            vec![RawChange {
                collection,
                document_id: id.clone(),
                change_type: ChangeType::Added,
                snapshot: Some(document),
            }],
        );
        drop(docs);

        debug!("Created {}/{}", collection, id);
        Ok(id)
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<StoredDocument> {
        self.ensure_online()?;
        let mut docs = self.lock()?;
        let found = docs.get_mut(collection).get(id).cloned();
        drop(docs);
        found.ok_or_else(|| SyncError::not_found(collection.as_str(), id))
    }

    async fn list(&self, collection: Collection) -> Result<Vec<StoredDocument>> {
        self.ensure_online()?;
        let mut docs = self.lock()?;
        let all: Vec<StoredDocument> = docs.get_mut(collection).values().cloned().collect();
        drop(docs);
        Ok(all)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
        expected_version: u64,
    ) -> Result<StoredDocument> {
        self.ensure_online()?;
        let mut docs = self.lock()?;
        let stored = docs
            .get_mut(collection)
            .get_mut(id)
            .ok_or_else(|| SyncError::not_found(collection.as_str(), id))?;

        if stored.version != expected_version {
            return Err(SyncError::Conflict {
                collection: collection.to_string(),
                id: id.to_string(),
                expected: expected_version,
                actual: stored.version,
            });
        }

        let version = expected_version + 1;
        merge_patch(&mut stored.data, &patch);
        stamp_version(&mut stored.data, version);
        stored.version = version;
        let updated = stored.clone();

        self.feed.publish(
            collection,
            vec![RawChange {
                collection,
                document_id: id.to_string(),
                change_type: ChangeType::Modified,
                snapshot: Some(updated.data.clone()),
            }],
        );
        drop(docs);

        debug!("Updated {}/{} to v{}", collection, id, version);
        Ok(updated)
    }

    async fn subscribe(
        &self,
        collection: Collection,
        filter: DocumentFilter,
    ) -> Result<Subscription> {
        self.ensure_online()?;
        let mut docs = self.lock()?;
        let receiver = self.feed.receiver(collection);
        let current = docs.get_mut(collection).values().cloned().collect();
        drop(docs);

        Ok(Subscription::new(collection, filter, receiver, current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_stamps_version_one() {
        let store = MemoryStore::new();
        let id = store
            .create(Collection::Personas, json!({"role": "Driver"}))
            .await
            .unwrap();
        let doc = store.get(Collection::Personas, &id).await.unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.data["version"], 1);
    }

    #[tokio::test]
    async fn test_create_with_taken_id_is_rejected() {
        let store = MemoryStore::new();
        store
            .create_with_id(Collection::Personas, "p-1", json!({"role": "Cook"}))
            .await
            .unwrap();

        let err = store
            .create_with_id(Collection::Personas, "p-1", json!({"role": "Driver"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AlreadyExists { .. }));
        assert_eq!(store.get(Collection::Personas, "p-1").await.unwrap().data["role"], "Cook");
        assert_eq!(store.list(Collection::Personas).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_requires_expected_version() {
        let store = MemoryStore::new();
        let id = store
            .create(Collection::Personas, json!({"status": "AVAILABLE"}))
            .await
            .unwrap();

        let updated = store
            .update(Collection::Personas, &id, json!({"status": "OFFERED"}), 1)
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.data["status"], "OFFERED");

        let err = store
            .update(Collection::Personas, &id, json!({"status": "HIRED"}), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Conflict { expected: 1, actual: 2, .. }));

        let err = store
            .update(Collection::Personas, "missing", json!({}), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_offline_store_rejects_writes() {
        let store = MemoryStore::new();
        store.set_online(false);
        let err = store
            .create(Collection::Broadcasts, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_subscribe_resyncs_then_streams() {
        let store = MemoryStore::new();
        let first = store
            .create(Collection::Personas, json!({"status": "AVAILABLE"}))
            .await
            .unwrap();

        let mut sub = store
            .subscribe(Collection::Personas, DocumentFilter::All)
            .await
            .unwrap();
        let resync = sub.next_batch().await.unwrap().unwrap();
        assert_eq!(resync.len(), 1);
        assert_eq!(resync[0].document_id, first);

        store
            .update(Collection::Personas, &first, json!({"status": "OFFERED"}), 1)
            .await
            .unwrap();
        let batch = sub.next_batch().await.unwrap().unwrap();
        assert_eq!(batch[0].change_type, ChangeType::Modified);
        assert_eq!(batch[0].snapshot.as_ref().unwrap()["version"], 2);
    }
}
