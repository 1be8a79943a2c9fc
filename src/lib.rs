//! Realtime presence, broadcast and offer synchronization for urgent gig hiring.
//!
//! Candidates publish a persona and go live; employers broadcast a job to
//! the nearest available people or hire one directly. Every state change is
//! a versioned write against a [`store::DocumentStore`], and every client
//! folds the store's change feed into a local view through [`sync::SyncEngine`].

pub mod auth;
pub mod cli;
pub mod core;
pub mod error;
pub mod extraction;
pub mod geo;
pub mod notify;
pub mod onboarding;
pub mod store;
pub mod sync;
pub mod types;
pub mod utils;
pub mod web;

pub use error::{Result, SyncError};
pub use store::{DocumentStore, MemoryStore, SqliteStore};
pub use sync::{OfferPolicy, SyncEngine, SyncHandle};
pub use web::start_web_server;
