// src/sync/mod.rs
//! Presence and offer-matching synchronization.
//!
//! Raw store changes are classified into domain events, folded into local
//! projections (candidates, broadcasts), and every write goes back through
//! the store's version guard.

pub mod alerts;
pub mod broadcasts;
pub mod classifier;
pub mod dispatcher;
pub mod echo;
pub mod engine;
pub mod offers;
pub mod registry;

pub use alerts::{Alert, HireWatch, HiredAlert, JobAlert, JOB_ALERT_TITLE};
pub use broadcasts::{cancel_broadcast, open_broadcast, BroadcastBoard};
pub use classifier::{decode_broadcast, decode_persona, ChangeClassifier, DomainEvent, EventStream};
pub use dispatcher::{
    BroadcastDispatcher, ExactMatcher, MatchOutcome, MatchResult, RoleMatcher, SkipReason,
    SubstringMatcher,
};
pub use echo::EchoGuard;
pub use engine::{ApplySummary, SyncEngine, SyncHandle};
pub use offers::{apply_transition, OfferPolicy, OfferStateMachine, Transition};
pub use registry::{FoldOutcome, PresenceRegistry};
