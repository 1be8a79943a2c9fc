// src/sync/offers.rs
//! Per-persona offer cycle: AVAILABLE -> OFFERED -> HIRED, with decline,
//! expiry and re-activation back to AVAILABLE.
//!
//! Every transition is checked against the store's current document, never
//! against a local cache, and written with the caller's expected version so
//! that concurrent writers resolve at the store.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::classifier::decode_persona;
use crate::error::{Result, SyncError};
use crate::store::{Collection, DocumentStore};
use crate::types::{Persona, PersonaStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Offer {
        employer_id: String,
        broadcast_id: Option<String>,
        expires_at: DateTime<Utc>,
    },
    /// Candidate consents to a pending offer.
    Accept,
    /// Employer confirms their own pending offer.
    Confirm { employer_id: String },
    Decline,
    Expire,
    /// Employer retracts an offer it can no longer honour.
    Withdraw,
    Reactivate,
}

impl Transition {
    pub fn from_status(&self) -> PersonaStatus {
        match self {
            Self::Offer { .. } => PersonaStatus::Available,
            Self::Accept
            | Self::Confirm { .. }
            | Self::Decline
            | Self::Expire
            | Self::Withdraw => PersonaStatus::Offered,
            Self::Reactivate => PersonaStatus::Hired,
        }
    }

    pub fn target_status(&self) -> PersonaStatus {
        match self {
            Self::Offer { .. } => PersonaStatus::Offered,
            Self::Accept | Self::Confirm { .. } => PersonaStatus::Hired,
            Self::Decline | Self::Expire | Self::Withdraw | Self::Reactivate => {
                PersonaStatus::Available
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Accept => "accept",
            Self::Confirm { .. } => "confirm",
            Self::Decline => "decline",
            Self::Expire => "expire",
            Self::Withdraw => "withdraw",
            Self::Reactivate => "reactivate",
        }
    }

    fn patch(&self, current: &Persona, now: DateTime<Utc>) -> Value {
        let status = self.target_status();
        match self {
            Self::Offer {
                employer_id,
                broadcast_id,
                expires_at,
            } => json!({
                "status": status,
                "offeredBy": employer_id,
                "offeredAt": now,
                "offerExpiresAt": expires_at,
                "broadcastId": broadcast_id,
            }),
            Self::Accept | Self::Confirm { .. } => json!({
                "status": status,
                "hiredBy": current.offered_by,
                "hiredAt": now,
                "offerExpiresAt": Value::Null,
            }),
            Self::Decline | Self::Expire | Self::Withdraw => json!({
                "status": status,
                "offeredBy": Value::Null,
                "offeredAt": Value::Null,
                "offerExpiresAt": Value::Null,
                "broadcastId": Value::Null,
            }),
            Self::Reactivate => json!({
                "status": status,
                "offeredBy": Value::Null,
                "offeredAt": Value::Null,
                "broadcastId": Value::Null,
                "hiredBy": Value::Null,
                "hiredAt": Value::Null,
            }),
        }
    }
}

/// Applies one transition against the store.
///
/// Fails with `Conflict` when the stored version differs from
/// `expected_version` and with `InvalidTransition` when the stored status
/// does not permit the move. Neither is retried here.
pub async fn apply_transition(
    store: &dyn DocumentStore,
    persona_id: &str,
    expected_version: u64,
    transition: &Transition,
) -> Result<Persona> {
    let stored = store.get(Collection::Personas, persona_id).await?;
    let current = decode_persona(&stored.id, &stored.data)?;

    if current.version != expected_version {
        return Err(SyncError::Conflict {
            collection: Collection::Personas.to_string(),
            id: persona_id.to_string(),
            expected: expected_version,
            actual: current.version,
        });
    }

    let target = transition.target_status();
    if current.status != transition.from_status() || !current.status.can_transition_to(target) {
        return Err(SyncError::InvalidTransition {
            id: persona_id.to_string(),
            from: current.status,
            to: target,
        });
    }

    if let Transition::Confirm { employer_id } = transition {
        if current.offered_by.as_deref() != Some(employer_id.as_str()) {
            return Err(SyncError::Validation(format!(
                "persona {} holds no offer from {}",
                persona_id, employer_id
            )));
        }
    }

    let patch = transition.patch(&current, Utc::now());
    let updated = store
        .update(Collection::Personas, persona_id, patch, expected_version)
        .await?;
    let persona = decode_persona(&updated.id, &updated.data)?;

    info!(
        "Persona {} {} -> {} ({}, v{})",
        persona_id,
        current.status,
        persona.status,
        transition.name(),
        persona.version
    );
    Ok(persona)
}

#[derive(Debug, Clone)]
pub struct OfferPolicy {
    /// How long an offer stays pending before it lapses.
    pub offer_timeout: Duration,
    /// Follow every employer offer with an immediate employer confirm.
    pub auto_confirm: bool,
}

impl Default for OfferPolicy {
    fn default() -> Self {
        Self {
            offer_timeout: Duration::from_secs(300),
            auto_confirm: false,
        }
    }
}

type TimerMap = Arc<Mutex<HashMap<String, (u64, JoinHandle<()>)>>>;

/// Offer cycle driver with expiry timers.
pub struct OfferStateMachine {
    store: Arc<dyn DocumentStore>,
    policy: OfferPolicy,
    timers: TimerMap,
}

impl OfferStateMachine {
    pub fn new(store: Arc<dyn DocumentStore>, policy: OfferPolicy) -> Self {
        Self {
            store,
            policy,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn policy(&self) -> &OfferPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// AVAILABLE -> OFFERED, and arm the expiry timer.
    pub async fn offer(
        &self,
        persona_id: &str,
        expected_version: u64,
        employer_id: &str,
        broadcast_id: Option<&str>,
    ) -> Result<Persona> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.policy.offer_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let transition = Transition::Offer {
            employer_id: employer_id.to_string(),
            broadcast_id: broadcast_id.map(str::to_string),
            expires_at,
        };
        let persona =
            apply_transition(self.store.as_ref(), persona_id, expected_version, &transition)
                .await?;
        self.arm_expiry(&persona);
        Ok(persona)
    }

    /// Employer hire action: an offer, confirmed right away when the policy
    /// auto-confirms. With auto-confirm a failed confirm leaves the offer
    /// pending and the offered persona is returned.
    pub async fn hire(
        &self,
        persona_id: &str,
        expected_version: u64,
        employer_id: &str,
        broadcast_id: Option<&str>,
    ) -> Result<Persona> {
        let offered = self
            .offer(persona_id, expected_version, employer_id, broadcast_id)
            .await?;
        Ok(self.complete_hire(offered, employer_id).await)
    }

    /// Second half of `hire` for a freshly offered persona.
    pub async fn complete_hire(&self, offered: Persona, employer_id: &str) -> Persona {
        if !self.policy.auto_confirm {
            return offered;
        }

        match self
            .confirm(&offered.persona_id, offered.version, employer_id)
            .await
        {
            Ok(hired) => hired,
            Err(e) => {
                warn!(
                    "Auto-confirm of {} failed, offer left pending: {}",
                    offered.persona_id, e
                );
                offered
            }
        }
    }

    pub async fn accept(&self, persona_id: &str, expected_version: u64) -> Result<Persona> {
        self.resolve(persona_id, expected_version, Transition::Accept)
            .await
    }

    pub async fn confirm(
        &self,
        persona_id: &str,
        expected_version: u64,
        employer_id: &str,
    ) -> Result<Persona> {
        let transition = Transition::Confirm {
            employer_id: employer_id.to_string(),
        };
        self.resolve(persona_id, expected_version, transition).await
    }

    pub async fn decline(&self, persona_id: &str, expected_version: u64) -> Result<Persona> {
        self.resolve(persona_id, expected_version, Transition::Decline)
            .await
    }

    pub async fn withdraw(&self, persona_id: &str, expected_version: u64) -> Result<Persona> {
        self.resolve(persona_id, expected_version, Transition::Withdraw)
            .await
    }

    pub async fn expire(&self, persona_id: &str, expected_version: u64) -> Result<Persona> {
        self.resolve(persona_id, expected_version, Transition::Expire)
            .await
    }

    pub async fn reactivate(&self, persona_id: &str, expected_version: u64) -> Result<Persona> {
        apply_transition(
            self.store.as_ref(),
            persona_id,
            expected_version,
            &Transition::Reactivate,
        )
        .await
    }

    /// Number of armed expiry timers.
    pub fn pending_timers(&self) -> usize {
        self.timers.lock().map(|t| t.len()).unwrap_or(0)
    }

    async fn resolve(
        &self,
        persona_id: &str,
        expected_version: u64,
        transition: Transition,
    ) -> Result<Persona> {
        let persona =
            apply_transition(self.store.as_ref(), persona_id, expected_version, &transition)
                .await?;
        self.disarm(persona_id);
        Ok(persona)
    }

    fn disarm(&self, persona_id: &str) {
        if let Ok(mut timers) = self.timers.lock() {
            if let Some((_, handle)) = timers.remove(persona_id) {
                handle.abort();
            }
        }
    }

    fn arm_expiry(&self, offered: &Persona) {
        let store = Arc::clone(&self.store);
        let timers = Arc::clone(&self.timers);
        let persona_id = offered.persona_id.clone();
        let version = offered.version;
        let timeout = self.policy.offer_timeout;

        let task_id = persona_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            match apply_transition(store.as_ref(), &task_id, version, &Transition::Expire).await {
                Ok(_) => info!("Offer on {} lapsed after {:?}", task_id, timeout),
                Err(SyncError::Conflict { .. } | SyncError::InvalidTransition { .. }) => {
                    debug!("Expiry timer for {} v{} is stale", task_id, version)
                }
                Err(e) => warn!("Expiry of {} failed: {}", task_id, e),
            }

            if let Ok(mut timers) = timers.lock() {
                if matches!(timers.get(&task_id), Some((v, _)) if *v == version) {
                    timers.remove(&task_id);
                }
            }
        });

        match self.timers.lock() {
            Ok(mut timers) => {
                if let Some((_, previous)) = timers.insert(persona_id, (version, handle)) {
                    previous.abort();
                }
            }
            Err(_) => warn!("Offer timer table poisoned; expiry still armed"),
        }
    }
}

impl Drop for OfferStateMachine {
    fn drop(&mut self) {
        if let Ok(mut timers) = self.timers.lock() {
            for (_, (_, handle)) in timers.drain() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Location, NewPersona};

    async fn seeded() -> (Arc<MemoryStore>, String) {
        let store = Arc::new(MemoryStore::new());
        let id = store
            .create(
                Collection::Personas,
                NewPersona {
                    user_id: "u1".to_string(),
                    role: "Waiter".to_string(),
                    skills: vec!["Serving".to_string()],
                    location: Location::new(12.97, 77.59),
                    video_intro_url: Some("https://cdn.example/v.mp4".to_string()),
                }
                .to_document(),
            )
            .await
            .unwrap();
        (store, id)
    }

    fn machine(store: Arc<MemoryStore>, timeout: Duration) -> OfferStateMachine {
        OfferStateMachine::new(
            store,
            OfferPolicy {
                offer_timeout: timeout,
                auto_confirm: false,
            },
        )
    }

    #[tokio::test]
    async fn test_offer_accept_reactivate_cycle() {
        let (store, id) = seeded().await;
        let offers = machine(store, Duration::from_secs(60));

        let offered = offers.offer(&id, 1, "e1", None).await.unwrap();
        assert_eq!(offered.status, PersonaStatus::Offered);
        assert_eq!(offered.version, 2);
        assert_eq!(offered.offered_by.as_deref(), Some("e1"));
        assert_eq!(offers.pending_timers(), 1);

        let hired = offers.accept(&id, 2).await.unwrap();
        assert_eq!(hired.status, PersonaStatus::Hired);
        assert_eq!(hired.hired_by.as_deref(), Some("e1"));
        assert!(hired.hired_at.is_some());
        assert_eq!(offers.pending_timers(), 0);

        let again = offers.reactivate(&id, 3).await.unwrap();
        assert_eq!(again.status, PersonaStatus::Available);
        assert!(again.hired_by.is_none());
        assert_eq!(again.version, 4);
    }

    #[tokio::test]
    async fn test_stale_version_is_conflict() {
        let (store, id) = seeded().await;
        let offers = machine(store, Duration::from_secs(60));
        offers.offer(&id, 1, "e1", None).await.unwrap();

        let err = offers.offer(&id, 1, "e2", None).await.unwrap_err();
        assert!(matches!(err, SyncError::Conflict { expected: 1, actual: 2, .. }));
    }

    #[tokio::test]
    async fn test_disallowed_transition_is_invalid() {
        let (store, id) = seeded().await;
        let offers = machine(store, Duration::from_secs(60));

        let err = offers.accept(&id, 1).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidTransition {
                from: PersonaStatus::Available,
                to: PersonaStatus::Hired,
                ..
            }
        ));
        let err = offers.reactivate(&id, 1).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_confirm_requires_offering_employer() {
        let (store, id) = seeded().await;
        let offers = machine(store, Duration::from_secs(60));
        offers.offer(&id, 1, "e1", None).await.unwrap();

        let err = offers.confirm(&id, 2, "e2").await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let hired = offers.confirm(&id, 2, "e1").await.unwrap();
        assert_eq!(hired.status, PersonaStatus::Hired);
    }

    #[tokio::test]
    async fn test_decline_clears_offer() {
        let (store, id) = seeded().await;
        let offers = machine(store, Duration::from_secs(60));
        offers.offer(&id, 1, "e1", Some("b1")).await.unwrap();

        let declined = offers.decline(&id, 2).await.unwrap();
        assert_eq!(declined.status, PersonaStatus::Available);
        assert!(declined.offered_by.is_none());
        assert!(declined.broadcast_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_offer_lapses_after_timeout() {
        let (store, id) = seeded().await;
        let offers = machine(store.clone(), Duration::from_millis(50));
        offers.offer(&id, 1, "e1", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;

        let stored = store.get(Collection::Personas, &id).await.unwrap();
        let persona = decode_persona(&stored.id, &stored.data).unwrap();
        assert_eq!(persona.status, PersonaStatus::Available);
        assert_eq!(persona.version, 3);
        assert_eq!(offers.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_offer_does_not_lapse() {
        let (store, id) = seeded().await;
        let offers = machine(store.clone(), Duration::from_millis(50));
        offers.offer(&id, 1, "e1", None).await.unwrap();
        offers.accept(&id, 2).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;

        let stored = store.get(Collection::Personas, &id).await.unwrap();
        assert_eq!(stored.version, 3);
        assert_eq!(stored.data["status"], "HIRED");
    }

    #[tokio::test(start_paused = true)]
    async fn test_withdrawn_offer_clears_and_disarms() {
        let (store, id) = seeded().await;
        let offers = machine(store.clone(), Duration::from_millis(50));
        offers.offer(&id, 1, "e1", Some("b1")).await.unwrap();

        let withdrawn = offers.withdraw(&id, 2).await.unwrap();
        assert_eq!(withdrawn.status, PersonaStatus::Available);
        assert!(withdrawn.broadcast_id.is_none());
        assert_eq!(offers.pending_timers(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let stored = store.get(Collection::Personas, &id).await.unwrap();
        assert_eq!(stored.version, 3);
    }

    #[tokio::test]
    async fn test_auto_confirm_hires_immediately() {
        let (store, id) = seeded().await;
        let offers = OfferStateMachine::new(
            store,
            OfferPolicy {
                offer_timeout: Duration::from_secs(60),
                auto_confirm: true,
            },
        );

        let hired = offers.hire(&id, 1, "e1", None).await.unwrap();
        assert_eq!(hired.status, PersonaStatus::Hired);
        assert_eq!(hired.version, 3);
        assert_eq!(offers.pending_timers(), 0);
    }
}
