// src/store/feed.rs
//! In-process change feed shared by the store adapters.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::{ChangeBatch, ChangeType, Collection, DocumentFilter, RawChange, StoredDocument};
use crate::error::{Result, SyncError};

const DEFAULT_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub(crate) enum FeedMessage {
    Batch(Arc<ChangeBatch>),
    /// Connectivity dropped; every open subscription must resync.
    Disconnected,
}

pub struct ChangeFeed {
    personas: broadcast::Sender<FeedMessage>,
    broadcasts: broadcast::Sender<FeedMessage>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (personas, _) = broadcast::channel(capacity);
        let (broadcasts, _) = broadcast::channel(capacity);
        Self {
            personas,
            broadcasts,
        }
    }

    fn sender(&self, collection: Collection) -> &broadcast::Sender<FeedMessage> {
        match collection {
            Collection::Personas => &self.personas,
            Collection::Broadcasts => &self.broadcasts,
        }
    }

    /// Must be taken before reading the resync snapshot so nothing written in
    /// between is missed. Duplicates are absorbed by the version guards.
    pub(crate) fn receiver(&self, collection: Collection) -> broadcast::Receiver<FeedMessage> {
        self.sender(collection).subscribe()
    }

    pub fn publish(&self, collection: Collection, batch: ChangeBatch) {
        if batch.is_empty() {
            return;
        }
        // No receivers is fine: nobody is listening yet.
        let _ = self
            .sender(collection)
            .send(FeedMessage::Batch(Arc::new(batch)));
    }

    pub fn disconnect_all(&self) {
        for collection in [Collection::Personas, Collection::Broadcasts] {
            let _ = self.sender(collection).send(FeedMessage::Disconnected);
        }
    }

    pub fn subscriber_count(&self, collection: Collection) -> usize {
        self.sender(collection).receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// A filtered, per-subscriber view of a collection's change feed.
///
/// Tracks which documents this subscriber currently sees so that documents
/// leaving the filter are reported as `Removed` and re-entering ones as
/// `Added`.
pub struct Subscription {
    collection: Collection,
    filter: DocumentFilter,
    receiver: broadcast::Receiver<FeedMessage>,
    resync: Option<ChangeBatch>,
    visible: HashSet<String>,
}

impl Subscription {
    pub(crate) fn new(
        collection: Collection,
        filter: DocumentFilter,
        receiver: broadcast::Receiver<FeedMessage>,
        current: Vec<StoredDocument>,
    ) -> Self {
        let mut visible = HashSet::new();
        let resync: ChangeBatch = current
            .into_iter()
            .filter(|doc| filter.matches(&doc.data))
            .map(|doc| {
                visible.insert(doc.id.clone());
                RawChange {
                    collection,
                    document_id: doc.id,
                    change_type: ChangeType::Added,
                    snapshot: Some(doc.data),
                }
            })
            .collect();

        debug!(
            "Opened subscription on {} with {} resync documents",
            collection,
            resync.len()
        );

        Self {
            collection,
            filter,
            receiver,
            resync: Some(resync),
            visible,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Next batch of changes visible through the filter.
    ///
    /// `Ok(None)` means the store has gone away for good. `StoreUnavailable`
    /// means this subscription is stale and the caller must resubscribe.
    pub async fn next_batch(&mut self) -> Result<Option<ChangeBatch>> {
        if let Some(resync) = self.resync.take() {
            return Ok(Some(resync));
        }

        loop {
            match self.receiver.recv().await {
                Ok(FeedMessage::Batch(batch)) => {
                    let visible = self.apply_filter(&batch);
                    if !visible.is_empty() {
                        return Ok(Some(visible));
                    }
                }
                Ok(FeedMessage::Disconnected) => {
                    return Err(SyncError::unavailable(format!(
                        "{} feed disconnected",
                        self.collection
                    )));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Subscription on {} lagged by {} batches",
                        self.collection, skipped
                    );
                    return Err(SyncError::unavailable(format!(
                        "{} subscription lagged by {} batches",
                        self.collection, skipped
                    )));
                }
                Err(RecvError::Closed) => return Ok(None),
            }
        }
    }

    fn apply_filter(&mut self, batch: &ChangeBatch) -> ChangeBatch {
        let mut out = Vec::with_capacity(batch.len());

        for change in batch {
            let was_visible = self.visible.contains(&change.document_id);
            let matches = change
                .snapshot
                .as_ref()
                .map(|snapshot| self.filter.matches(snapshot))
                .unwrap_or(false);

            let change_type = match change.change_type {
                ChangeType::Added | ChangeType::Modified if matches => {
                    if was_visible {
                        ChangeType::Modified
                    } else {
                        self.visible.insert(change.document_id.clone());
                        ChangeType::Added
                    }
                }
                ChangeType::Added | ChangeType::Modified | ChangeType::Removed if was_visible => {
                    self.visible.remove(&change.document_id);
                    ChangeType::Removed
                }
                ChangeType::Unknown => ChangeType::Unknown,
                _ => continue,
            };

            out.push(RawChange {
                change_type,
                ..change.clone()
            });
        }

        out
    }
}
