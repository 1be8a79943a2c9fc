// src/sync/classifier.rs
//! Turns raw change-feed entries into typed domain events.

use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::store::{
    ChangeBatch, ChangeType, Collection, DocumentFilter, DocumentStore, RawChange, Subscription,
};
use crate::types::{Broadcast, BroadcastStatus, Persona};

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// A persona appeared in the stream (`Added`).
    PersonaCreated(Persona),
    /// A known persona was rewritten (`Modified`). Carries the full snapshot.
    PersonaStatusChanged(Persona),
    PersonaRemoved { persona_id: String },
    /// An active broadcast appeared in the stream (`Added`).
    BroadcastOpened(Broadcast),
    /// Progress on a still-active broadcast.
    BroadcastUpdated(Broadcast),
    /// Filled, cancelled, or gone.
    BroadcastClosed(Broadcast),
    /// The snapshot could not be decoded. Never silently dropped.
    DecodeError {
        collection: Collection,
        document_id: String,
        reason: String,
    },
}

impl DomainEvent {
    pub fn document_id(&self) -> &str {
        match self {
            Self::PersonaCreated(p) | Self::PersonaStatusChanged(p) => &p.persona_id,
            Self::PersonaRemoved { persona_id } => persona_id,
            Self::BroadcastOpened(b) | Self::BroadcastUpdated(b) | Self::BroadcastClosed(b) => {
                &b.broadcast_id
            }
            Self::DecodeError { document_id, .. } => document_id,
        }
    }

    /// Document version carried by the event, if any.
    pub fn version(&self) -> Option<u64> {
        match self {
            Self::PersonaCreated(p) | Self::PersonaStatusChanged(p) => Some(p.version),
            Self::BroadcastOpened(b) | Self::BroadcastUpdated(b) | Self::BroadcastClosed(b) => {
                Some(b.version)
            }
            Self::PersonaRemoved { .. } | Self::DecodeError { .. } => None,
        }
    }
}

fn with_id(snapshot: &Value, id_field: &str, id: &str) -> Value {
    let mut doc = snapshot.clone();
    if let Some(object) = doc.as_object_mut() {
        object.insert(id_field.to_string(), Value::from(id));
    }
    doc
}

/// Decodes a persona snapshot. The document id is authoritative over any
/// `personaId` stored in the body.
pub fn decode_persona(id: &str, snapshot: &Value) -> Result<Persona, SyncError> {
    serde_json::from_value(with_id(snapshot, "personaId", id)).map_err(|e| SyncError::Decode {
        collection: Collection::Personas.to_string(),
        id: id.to_string(),
        reason: e.to_string(),
    })
}

pub fn decode_broadcast(id: &str, snapshot: &Value) -> Result<Broadcast, SyncError> {
    serde_json::from_value(with_id(snapshot, "broadcastId", id)).map_err(|e| {
        SyncError::Decode {
            collection: Collection::Broadcasts.to_string(),
            id: id.to_string(),
            reason: e.to_string(),
        }
    })
}

pub struct ChangeClassifier;

impl ChangeClassifier {
    /// Classifies a batch. When one document changes several times within the
    /// batch only its last change is emitted, at the position of that change.
    pub fn classify_batch(batch: &[RawChange]) -> Vec<DomainEvent> {
        let mut seen = HashSet::new();
        let mut events: Vec<DomainEvent> = batch
            .iter()
            .rev()
            .filter(|change| seen.insert((change.collection, change.document_id.as_str())))
            .map(Self::classify)
            .collect();
        events.reverse();
        events
    }

    pub fn classify(change: &RawChange) -> DomainEvent {
        let decode_error = |reason: String| DomainEvent::DecodeError {
            collection: change.collection,
            document_id: change.document_id.clone(),
            reason,
        };

        if change.change_type == ChangeType::Unknown {
            return decode_error("unknown change type".to_string());
        }

        if change.collection == Collection::Personas && change.change_type == ChangeType::Removed {
            return DomainEvent::PersonaRemoved {
                persona_id: change.document_id.clone(),
            };
        }

        let Some(snapshot) = change.snapshot.as_ref() else {
            return decode_error("missing snapshot".to_string());
        };

        match change.collection {
            Collection::Personas => match decode_persona(&change.document_id, snapshot) {
                Ok(persona) if change.change_type == ChangeType::Added => {
                    DomainEvent::PersonaCreated(persona)
                }
                Ok(persona) => DomainEvent::PersonaStatusChanged(persona),
                Err(e) => decode_error(e.to_string()),
            },
            Collection::Broadcasts => match decode_broadcast(&change.document_id, snapshot) {
                Ok(broadcast) => match (change.change_type, broadcast.status) {
                    (ChangeType::Removed, _)
                    | (_, BroadcastStatus::Filled | BroadcastStatus::Cancelled) => {
                        DomainEvent::BroadcastClosed(broadcast)
                    }
                    (ChangeType::Added, BroadcastStatus::Active) => {
                        DomainEvent::BroadcastOpened(broadcast)
                    }
                    _ => DomainEvent::BroadcastUpdated(broadcast),
                },
                Err(e) => decode_error(e.to_string()),
            },
        }
    }
}

/// Lazy, restartable stream of domain events for one collection.
///
/// Opens its subscription on first poll. When the subscription goes stale
/// (disconnect, lag) it resubscribes and starts over with a full resync.
pub struct EventStream {
    store: Arc<dyn DocumentStore>,
    collection: Collection,
    filter: DocumentFilter,
    subscription: Option<Subscription>,
    pending: VecDeque<DomainEvent>,
    resyncs: u64,
}

impl EventStream {
    pub fn new(store: Arc<dyn DocumentStore>, collection: Collection, filter: DocumentFilter) -> Self {
        Self {
            store,
            collection,
            filter,
            subscription: None,
            pending: VecDeque::new(),
            resyncs: 0,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Number of subscriptions opened so far, the first one included.
    pub fn resync_count(&self) -> u64 {
        self.resyncs
    }

    /// Drops the current subscription. The next poll resubscribes.
    pub fn restart(&mut self) {
        self.subscription = None;
        self.pending.clear();
    }

    pub async fn next(&mut self) -> Option<DomainEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let batch = self.next_batch().await?;
            self.pending.extend(batch);
        }
    }

    /// Next non-empty batch of classified events, or `None` once the store
    /// has shut down.
    pub async fn next_batch(&mut self) -> Option<Vec<DomainEvent>> {
        loop {
            let raw = match self.next_raw_batch().await {
                Some(raw) => raw,
                None => return None,
            };
            let events = ChangeClassifier::classify_batch(&raw);
            if !events.is_empty() {
                return Some(events);
            }
        }
    }

    async fn next_raw_batch(&mut self) -> Option<ChangeBatch> {
        loop {
            if self.subscription.is_none() {
                match self
                    .store
                    .subscribe(self.collection, self.filter.clone())
                    .await
                {
                    Ok(subscription) => {
                        self.resyncs += 1;
                        if self.resyncs > 1 {
                            info!("Resubscribed to {} (resync #{})", self.collection, self.resyncs - 1);
                        }
                        self.subscription = Some(subscription);
                    }
                    Err(e) => {
                        warn!("Subscribe to {} failed: {}", self.collection, e);
                        tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
                        continue;
                    }
                }
            }

            let subscription = self.subscription.as_mut()?;
            match subscription.next_batch().await {
                Ok(Some(batch)) => return Some(batch),
                Ok(None) => {
                    debug!("{} feed closed", self.collection);
                    self.subscription = None;
                    return None;
                }
                Err(e) => {
                    warn!("{} subscription dropped: {}", self.collection, e);
                    self.subscription = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Location, PersonaStatus};
    use chrono::Utc;
    use serde_json::json;

    fn persona() -> Persona {
        Persona {
            persona_id: "p1".to_string(),
            user_id: "u1".to_string(),
            role: "Driver".to_string(),
            skills: vec!["License".to_string(), "Navigation".to_string()],
            location: Location::new(12.9716, 77.5946).with_address("MG Road"),
            status: PersonaStatus::Available,
            video_intro_url: Some("https://cdn.example/v.mp4".to_string()),
            version: 4,
            offered_by: None,
            offered_at: None,
            offer_expires_at: None,
            broadcast_id: None,
            hired_by: None,
            hired_at: None,
        }
    }

    fn raw(collection: Collection, id: &str, change_type: ChangeType, snapshot: Value) -> RawChange {
        RawChange {
            collection,
            document_id: id.to_string(),
            change_type,
            snapshot: Some(snapshot),
        }
    }

    #[test]
    fn test_persona_snapshot_round_trip() {
        let original = persona();
        let event = ChangeClassifier::classify(&raw(
            Collection::Personas,
            "p1",
            ChangeType::Added,
            original.to_document(),
        ));
        assert_eq!(event, DomainEvent::PersonaCreated(original));
    }

    #[test]
    fn test_missing_role_is_decode_error() {
        let mut doc = persona().to_document();
        doc.as_object_mut().unwrap().remove("role");

        let event = ChangeClassifier::classify(&raw(Collection::Personas, "p1", ChangeType::Modified, doc));
        match event {
            DomainEvent::DecodeError { document_id, reason, .. } => {
                assert_eq!(document_id, "p1");
                assert!(reason.contains("role"), "{reason}");
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_change_type_is_decode_error() {
        let event = ChangeClassifier::classify(&raw(
            Collection::Personas,
            "p1",
            ChangeType::Unknown,
            persona().to_document(),
        ));
        assert!(matches!(event, DomainEvent::DecodeError { .. }));
    }

    #[test]
    fn test_last_change_per_document_wins_within_batch() {
        let mut offered = persona();
        offered.status = PersonaStatus::Offered;
        offered.version = 5;

        let mut other = persona();
        other.persona_id = "p2".to_string();

        let batch = vec![
            raw(Collection::Personas, "p1", ChangeType::Added, persona().to_document()),
            raw(Collection::Personas, "p2", ChangeType::Added, other.to_document()),
            raw(Collection::Personas, "p1", ChangeType::Modified, offered.to_document()),
        ];

        let events = ChangeClassifier::classify_batch(&batch);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].document_id(), "p2");
        assert_eq!(events[1], DomainEvent::PersonaStatusChanged(offered));
    }

    #[test]
    fn test_broadcast_classification() {
        let doc = json!({
            "employerId": "e1",
            "role": "Dishwasher",
            "wage": "400",
            "targetCount": 2,
            "hiredCount": 0,
            "status": "ACTIVE",
            "location": {"lat": 12.97, "lng": 77.59},
            "createdAt": Utc::now(),
            "version": 1
        });

        let opened = ChangeClassifier::classify(&raw(Collection::Broadcasts, "b1", ChangeType::Added, doc.clone()));
        assert!(matches!(opened, DomainEvent::BroadcastOpened(ref b) if b.broadcast_id == "b1"));

        let updated = ChangeClassifier::classify(&raw(Collection::Broadcasts, "b1", ChangeType::Modified, doc.clone()));
        assert!(matches!(updated, DomainEvent::BroadcastUpdated(_)));

        let mut filled = doc;
        filled["status"] = json!("FILLED");
        let closed = ChangeClassifier::classify(&raw(Collection::Broadcasts, "b1", ChangeType::Modified, filled));
        assert!(matches!(closed, DomainEvent::BroadcastClosed(_)));
    }

    #[tokio::test]
    async fn test_event_stream_resyncs_after_disconnect() {
        let store = Arc::new(MemoryStore::new());
        let mut doc = persona().to_document();
        doc.as_object_mut().unwrap().remove("personaId");
        let id = store.create(Collection::Personas, doc).await.unwrap();

        let mut stream = EventStream::new(store.clone(), Collection::Personas, DocumentFilter::All);
        let first = stream.next().await.unwrap();
        assert!(matches!(first, DomainEvent::PersonaCreated(ref p) if p.persona_id == id));

        store.feed().disconnect_all();
        let again = stream.next().await.unwrap();
        assert!(matches!(again, DomainEvent::PersonaCreated(ref p) if p.persona_id == id));
        assert_eq!(stream.resync_count(), 2);
    }
}
