// src/store/mod.rs
//! Document store adapter: typed read/write/subscribe over a key-value
//! document store with change notifications.
//!
//! The store owns the `version` field. `create` writes version 1 and every
//! successful `update` bumps it by one, so optimistic concurrency resolves at
//! the store and never against a client cache.

pub mod feed;
pub mod memory;
pub mod sqlite;

pub use feed::{ChangeFeed, Subscription};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Personas,
    Broadcasts,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Personas => "personas",
            Self::Broadcasts => "broadcasts",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
    Unknown,
}

/// One entry of a change feed, exactly as the store reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChange {
    pub collection: Collection,
    pub document_id: String,
    pub change_type: ChangeType,
    pub snapshot: Option<Value>,
}

/// Changes delivered together. A resync arrives as a single batch.
pub type ChangeBatch = Vec<RawChange>;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub version: u64,
    pub data: Value,
}

/// Subscription-side predicate over document bodies.
#[derive(Clone, Default)]
pub enum DocumentFilter {
    #[default]
    All,
    FieldEquals(String, Value),
    Custom(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl DocumentFilter {
    pub fn field_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::FieldEquals(field.into(), value.into())
    }

    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Self::All => true,
            Self::FieldEquals(field, expected) => document.get(field) == Some(expected),
            Self::Custom(predicate) => predicate(document),
        }
    }
}

impl fmt::Debug for DocumentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "All"),
            Self::FieldEquals(field, value) => write!(f, "FieldEquals({field} == {value})"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts a new document and returns its store-generated id.
    async fn create(&self, collection: Collection, document: Value) -> Result<String>;

    /// Inserts under a caller-chosen id, atomically with respect to other
    /// writers. Fails with `AlreadyExists` when the id is taken.
    async fn create_with_id(&self, collection: Collection, id: &str, document: Value)
        -> Result<String>;

    async fn get(&self, collection: Collection, id: &str) -> Result<StoredDocument>;

    async fn list(&self, collection: Collection) -> Result<Vec<StoredDocument>>;

    /// Shallow-merges `patch` into the document if and only if the stored
    /// version still equals `expected_version`.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
        expected_version: u64,
    ) -> Result<StoredDocument>;

    /// Opens a change stream. The first batch is a full resync: one `Added`
    /// per document currently matching `filter`.
    async fn subscribe(&self, collection: Collection, filter: DocumentFilter)
        -> Result<Subscription>;
}

/// Shallow object merge. Non-object patches are ignored.
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Stamps store-managed fields onto a document body.
pub(crate) fn stamp_version(document: &mut Value, version: u64) {
    if let Some(object) = document.as_object_mut() {
        object.insert("version".to_string(), Value::from(version));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_patch_overwrites_and_nulls() {
        let mut doc = json!({"status": "AVAILABLE", "hiredBy": "e1", "role": "Cook"});
        merge_patch(&mut doc, &json!({"status": "OFFERED", "hiredBy": null}));
        assert_eq!(doc, json!({"status": "OFFERED", "hiredBy": null, "role": "Cook"}));
    }

    #[test]
    fn test_field_filter() {
        let filter = DocumentFilter::field_equals("status", "ACTIVE");
        assert!(filter.matches(&json!({"status": "ACTIVE"})));
        assert!(!filter.matches(&json!({"status": "FILLED"})));
        assert!(!filter.matches(&json!({})));
        assert!(DocumentFilter::All.matches(&json!(null)));
    }
}
