// src/store/sqlite.rs
//! SQLite-backed document store.
//!
//! Writes are compare-and-swap on the `version` column. The change feed is
//! process-local: only writes made through this adapter instance are
//! streamed to subscribers.

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    merge_patch, stamp_version, ChangeFeed, ChangeType, Collection, DocumentFilter,
    DocumentStore, RawChange, StoredDocument, Subscription,
};
use crate::core::Database;
use crate::error::{Result, SyncError};

pub struct SqliteStore {
    db: Database,
    feed: ChangeFeed,
    /// Serializes write+publish so the feed preserves per-document write order.
    write_lock: Mutex<()>,
}

fn store_error(err: sqlx::Error) -> SyncError {
    warn!("SQLite store error: {}", err);
    SyncError::unavailable(err)
}

fn insert_error(collection: Collection, id: &str, err: sqlx::Error) -> SyncError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => SyncError::AlreadyExists {
            collection: collection.to_string(),
            id: id.to_string(),
        },
        _ => store_error(err),
    }
}

fn decode_body(collection: Collection, id: &str, body: &str) -> Result<Value> {
    serde_json::from_str(body).map_err(|e| SyncError::Decode {
        collection: collection.to_string(),
        id: id.to_string(),
        reason: e.to_string(),
    })
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            feed: ChangeFeed::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn open(database_path: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(Database::new(database_path).await?))
    }

    pub async fn in_memory() -> anyhow::Result<Self> {
        Ok(Self::new(Database::in_memory().await?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn fetch(&self, collection: Collection, id: &str) -> Result<Option<StoredDocument>> {
        let row: Option<(String, i64, String)> = sqlx::query_as(
            "SELECT id, version, body FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(store_error)?;

        row.map(|(id, version, body)| -> Result<StoredDocument> {
            Ok(StoredDocument {
                data: decode_body(collection, &id, &body)?,
                version: version as u64,
                id,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
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
        if !document.is_object() {
            return Err(SyncError::Validation(
                "documents must be JSON objects".to_string(),
            ));
        }
        stamp_version(&mut document, 1);
        let id = id.to_string();

        let _guard = self.write_lock.lock().await;
        sqlx::query("INSERT INTO documents (collection, id, version, body) VALUES (?, ?, 1, ?)")
            .bind(collection.as_str())
            .bind(&id)
            .bind(document.to_string())
            .execute(self.db.pool())
            .await
            .map_err(|e| insert_error(collection, &id, e))?;

        self.feed.publish(
            collection,
            vec![RawChange {
                collection,
                document_id: id.clone(),
                change_type: ChangeType::Added,
                snapshot: Some(document),
            }],
        );

        debug!("Created {}/{}", collection, id);
        Ok(id)
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<StoredDocument> {
        self.fetch(collection, id)
            .await?
            .ok_or_else(|| SyncError::not_found(collection.as_str(), id))
    }

    async fn list(&self, collection: Collection) -> Result<Vec<StoredDocument>> {
        let rows: Vec<(String, i64, String)> = sqlx::query_as(
            "SELECT id, version, body FROM documents WHERE collection = ? ORDER BY id",
        )
        .bind(collection.as_str())
        .fetch_all(self.db.pool())
        .await
        .map_err(store_error)?;

        rows.into_iter()
            .map(|(id, version, body)| -> Result<StoredDocument> {
                Ok(StoredDocument {
                    data: decode_body(collection, &id, &body)?,
                    version: version as u64,
                    id,
                })
            })
            .collect()
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
        expected_version: u64,
    ) -> Result<StoredDocument> {
        let _guard = self.write_lock.lock().await;

        let mut current = self.get(collection, id).await?;
        if current.version != expected_version {
            return Err(SyncError::Conflict {
                collection: collection.to_string(),
                id: id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }

        let version = expected_version + 1;
        merge_patch(&mut current.data, &patch);
        stamp_version(&mut current.data, version);

        let result = sqlx::query(
            "UPDATE documents SET body = ?, version = ?, updated_at = datetime('now') \
             WHERE collection = ? AND id = ? AND version = ?",
        )
        .bind(current.data.to_string())
        .bind(version as i64)
        .bind(collection.as_str())
        .bind(id)
        .bind(expected_version as i64)
        .execute(self.db.pool())
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            // Another process won the compare-and-swap.
            let actual = self.get(collection, id).await?.version;
            return Err(SyncError::Conflict {
                collection: collection.to_string(),
                id: id.to_string(),
                expected: expected_version,
                actual,
            });
        }

        current.version = version;
        self.feed.publish(
            collection,
            vec![RawChange {
                collection,
                document_id: id.to_string(),
                change_type: ChangeType::Modified,
                snapshot: Some(current.data.clone()),
            }],
        );

        debug!("Updated {}/{} to v{}", collection, id, version);
        Ok(current)
    }

    async fn subscribe(
        &self,
        collection: Collection,
        filter: DocumentFilter,
    ) -> Result<Subscription> {
        let receiver = self.feed.receiver(collection);
        let current = self.list(collection).await?;
        Ok(Subscription::new(collection, filter, receiver, current))
    }
}
