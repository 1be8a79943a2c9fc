// src/sync/broadcasts.rs
//! Broadcast lifecycle writes and the local board of open broadcasts.

use chrono::Utc;
use std::collections::HashMap;
use tracing::{info, warn};

use super::alerts::JobAlert;
use super::classifier::{decode_broadcast, DomainEvent};
use crate::error::{Result, SyncError};
use crate::store::{Collection, DocumentStore};
use crate::types::{Broadcast, BroadcastStatus, NewBroadcast};

/// Creates an ACTIVE broadcast with `hiredCount = 0`.
pub async fn open_broadcast(store: &dyn DocumentStore, request: &NewBroadcast) -> Result<Broadcast> {
    if request.target_count == 0 {
        return Err(SyncError::Validation(
            "targetCount must be at least 1".to_string(),
        ));
    }
    if request.role.trim().is_empty() || request.wage.trim().is_empty() {
        return Err(SyncError::Validation(
            "role and wage are required".to_string(),
        ));
    }

    let id = store
        .create(Collection::Broadcasts, request.to_document(Utc::now()))
        .await?;
    let stored = store.get(Collection::Broadcasts, &id).await?;
    let broadcast = decode_broadcast(&stored.id, &stored.data)?;

    info!(
        "Broadcast {} opened by {}: {} x{} at {}",
        broadcast.broadcast_id, broadcast.employer_id, broadcast.role, broadcast.target_count, broadcast.wage
    );
    Ok(broadcast)
}

/// Employer-issued cancel. Only ACTIVE broadcasts can be cancelled.
pub async fn cancel_broadcast(
    store: &dyn DocumentStore,
    broadcast_id: &str,
    expected_version: u64,
) -> Result<Broadcast> {
    let stored = store.get(Collection::Broadcasts, broadcast_id).await?;
    let current = decode_broadcast(&stored.id, &stored.data)?;

    if current.version != expected_version {
        return Err(SyncError::Conflict {
            collection: Collection::Broadcasts.to_string(),
            id: broadcast_id.to_string(),
            expected: expected_version,
            actual: current.version,
        });
    }
    if current.status != BroadcastStatus::Active {
        return Err(SyncError::BroadcastClosed {
            id: broadcast_id.to_string(),
            status: current.status,
        });
    }

    let updated = store
        .update(
            Collection::Broadcasts,
            broadcast_id,
            serde_json::json!({ "status": BroadcastStatus::Cancelled }),
            expected_version,
        )
        .await?;
    info!("Broadcast {} cancelled", broadcast_id);
    decode_broadcast(&updated.id, &updated.data)
}

/// Local projection of broadcasts, folded from broadcast events.
#[derive(Debug, Clone, Default)]
pub struct BroadcastBoard {
    broadcasts: HashMap<String, Broadcast>,
}

impl BroadcastBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold step. Returns a job alert the first time an open broadcast is seen.
    pub fn on_change(&mut self, event: &DomainEvent) -> Option<JobAlert> {
        let (broadcast, opened) = match event {
            DomainEvent::BroadcastOpened(b) => (b, true),
            DomainEvent::BroadcastUpdated(b) | DomainEvent::BroadcastClosed(b) => (b, false),
            _ => return None,
        };

        let first_sighting = match self.broadcasts.get(&broadcast.broadcast_id) {
            Some(current) if broadcast.version <= current.version => return None,
            Some(_) => false,
            None => true,
        };
        self.broadcasts
            .insert(broadcast.broadcast_id.clone(), broadcast.clone());

        if opened && first_sighting && broadcast.is_open() {
            return Some(JobAlert::for_broadcast(broadcast));
        }
        if opened && !first_sighting {
            warn!(
                "Broadcast {} re-announced at v{}; alert suppressed",
                broadcast.broadcast_id, broadcast.version
            );
        }
        None
    }

    /// Open broadcasts, newest first.
    pub fn open(&self) -> Vec<Broadcast> {
        let mut open: Vec<Broadcast> = self
            .broadcasts
            .values()
            .filter(|b| b.is_open())
            .cloned()
            .collect();
        open.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        open
    }

    pub fn get(&self, broadcast_id: &str) -> Option<&Broadcast> {
        self.broadcasts.get(broadcast_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Location;

    fn request(target: u32) -> NewBroadcast {
        NewBroadcast {
            employer_id: "e1".to_string(),
            role: "Security Guard".to_string(),
            wage: "500".to_string(),
            target_count: target,
            location: Location::new(12.9716, 77.5946),
            radius_km: Some(2.0),
        }
    }

    #[tokio::test]
    async fn test_open_and_cancel() {
        let store = MemoryStore::new();
        let broadcast = open_broadcast(&store, &request(3)).await.unwrap();
        assert_eq!(broadcast.status, BroadcastStatus::Active);
        assert_eq!(broadcast.hired_count, 0);
        assert_eq!(broadcast.version, 1);

        let cancelled = cancel_broadcast(&store, &broadcast.broadcast_id, 1).await.unwrap();
        assert_eq!(cancelled.status, BroadcastStatus::Cancelled);

        let err = cancel_broadcast(&store, &broadcast.broadcast_id, cancelled.version)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::BroadcastClosed { .. }));
    }

    #[tokio::test]
    async fn test_zero_target_rejected() {
        let store = MemoryStore::new();
        let err = open_broadcast(&store, &request(0)).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn test_board_alerts_once_per_broadcast() {
        let store = MemoryStore::new();
        let broadcast = open_broadcast(&store, &request(2)).await.unwrap();

        let mut board = BroadcastBoard::new();
        let alert = board
            .on_change(&DomainEvent::BroadcastOpened(broadcast.clone()))
            .unwrap();
        assert!(alert.body.contains("Security Guard"));
        assert!(alert.body.contains("500/hr"));

        // A resync replays the same ADDED event.
        assert!(board
            .on_change(&DomainEvent::BroadcastOpened(broadcast.clone()))
            .is_none());

        let mut filled = broadcast.clone();
        filled.status = BroadcastStatus::Filled;
        filled.hired_count = 2;
        filled.version = 3;
        assert!(board.on_change(&DomainEvent::BroadcastClosed(filled)).is_none());
        assert!(board.open().is_empty());
    }
}
