// src/error.rs
//! Typed failures surfaced by the store adapters, folds and state machine.
//!
//! Every store or state-machine call returns one of these as a value so that
//! callers can make per-item skip/continue decisions inside a batch.

use crate::types::{BroadcastStatus, PersonaStatus};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// Lost an optimistic-concurrency race. Re-read and decide again.
    #[error("version conflict on {collection}/{id}: expected v{expected}, store holds v{actual}")]
    Conflict {
        collection: String,
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid transition for persona {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: PersonaStatus,
        to: PersonaStatus,
    },

    #[error("broadcast {id} is {status} and accepts no further changes")]
    BroadcastClosed { id: String, status: BroadcastStatus },

    #[error("{collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("{collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("cannot decode {collection}/{id}: {reason}")]
    Decode {
        collection: String,
        id: String,
        reason: String,
    },

    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("notification delivery failed: {0}")]
    Notification(String),

    #[error("{field} cannot change once set")]
    ImmutableField { field: String },

    #[error("{0}")]
    Validation(String),
}

impl SyncError {
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn unavailable(reason: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable(reason.to_string())
    }

    /// Whether retrying (after a re-read) can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::StoreUnavailable(_) | Self::Extraction(_)
        )
    }

    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "CONFLICT",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::BroadcastClosed { .. } => "BROADCAST_CLOSED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Decode { .. } => "DECODE_ERROR",
            Self::Extraction(_) => "EXTRACTION_ERROR",
            Self::Auth(_) => "AUTH_ERROR",
            Self::Notification(_) => "NOTIFICATION_ERROR",
            Self::ImmutableField { .. } => "IMMUTABLE_FIELD",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
