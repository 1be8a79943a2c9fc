// src/sync/dispatcher.rs
//! Fan-out of an urgent broadcast to the nearest matching candidates.

use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::classifier::decode_broadcast;
use super::offers::OfferStateMachine;
use crate::error::{Result, SyncError};
use crate::geo::haversine_m;
use crate::notify::{notify_and_log, Notification, NotificationGateway};
use crate::store::Collection;
use crate::types::{Broadcast, BroadcastStatus, Persona};
use crate::utils::normalize_text;

const PROGRESS_RETRIES: usize = 3;

/// Decides whether a persona fits the role a broadcast asks for.
pub trait RoleMatcher: Send + Sync {
    fn matches(&self, wanted_role: &str, persona: &Persona) -> bool;
}

/// Case-insensitive substring match in either direction against the role,
/// or the wanted role inside any skill.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubstringMatcher;

impl RoleMatcher for SubstringMatcher {
    fn matches(&self, wanted_role: &str, persona: &Persona) -> bool {
        let wanted = normalize_text(wanted_role);
        if wanted.is_empty() {
            return false;
        }
        let role = normalize_text(&persona.role);
        (!role.is_empty() && (role.contains(&wanted) || wanted.contains(&role)))
            || persona
                .skills
                .iter()
                .any(|skill| normalize_text(skill).contains(&wanted))
    }
}

/// Case-insensitive equality with the role or one of the skills.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactMatcher;

impl RoleMatcher for ExactMatcher {
    fn matches(&self, wanted_role: &str, persona: &Persona) -> bool {
        let wanted = normalize_text(wanted_role);
        normalize_text(&persona.role) == wanted
            || persona.skills.iter().any(|s| normalize_text(s) == wanted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Someone else changed the persona first.
    Conflict,
    /// The persona was no longer AVAILABLE at the store.
    NotAvailable,
    NotFound,
    /// The broadcast was cancelled while the offer was being placed.
    BroadcastClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// The store-confirmed persona after the offer (or hire).
    Offered(Box<Persona>),
    Skipped(SkipReason),
    /// Dispatch stopped at this candidate.
    Failed(SyncError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub persona_id: String,
    pub distance_m: f64,
    pub outcome: MatchOutcome,
}

impl MatchResult {
    pub fn is_offered(&self) -> bool {
        matches!(self.outcome, MatchOutcome::Offered(_))
    }

    /// The confirmed persona when this candidate was placed.
    pub fn placed(&self) -> Option<&Persona> {
        match &self.outcome {
            MatchOutcome::Offered(persona) => Some(persona.as_ref()),
            _ => None,
        }
    }
}

pub struct BroadcastDispatcher {
    offers: Arc<OfferStateMachine>,
    notifier: Arc<dyn NotificationGateway>,
    matcher: Arc<dyn RoleMatcher>,
}

impl BroadcastDispatcher {
    pub fn new(offers: Arc<OfferStateMachine>, notifier: Arc<dyn NotificationGateway>) -> Self {
        Self {
            offers,
            notifier,
            matcher: Arc::new(SubstringMatcher),
        }
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn RoleMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Matching available candidates within reach, nearest first. Ties break
    /// on persona id.
    pub fn rank(&self, broadcast: &Broadcast, pool: &[Persona]) -> Vec<(f64, Persona)> {
        let max_distance_m = broadcast.radius_km.map(|km| km * 1000.0);

        let mut ranked: Vec<(f64, Persona)> = pool
            .iter()
            .filter(|p| p.is_available())
            .filter(|p| self.matcher.matches(&broadcast.role, p))
            .map(|p| (haversine_m(&broadcast.location, &p.location), p.clone()))
            .filter(|(d, _)| max_distance_m.map_or(true, |max| *d <= max))
            .collect();

        ranked.sort_by(|(da, a), (db, b)| match da.total_cmp(db) {
            Ordering::Equal => a.persona_id.cmp(&b.persona_id),
            other => other,
        });
        ranked
    }

    /// Places offers in ranked order until the broadcast fills or the list
    /// runs out. `broadcast` is updated with the store-confirmed progress.
    ///
    /// Each opening is reserved on the stored broadcast before a persona is
    /// touched, so a stale `broadcast` copy or a second dispatcher can never
    /// place more offers than `targetCount`. A reservation that no candidate
    /// takes is given back. Placed offers are never rolled back, except one
    /// whose broadcast was cancelled while it was being placed.
    pub async fn dispatch(&self, broadcast: &mut Broadcast, pool: &[Persona]) -> Vec<MatchResult> {
        if !broadcast.is_open() {
            debug!(
                "Broadcast {} is {}; nothing to dispatch",
                broadcast.broadcast_id, broadcast.status
            );
            return Vec::new();
        }

        let ranked = self.rank(broadcast, pool);
        info!(
            "Dispatching broadcast {} ({}): {} candidates for {} openings",
            broadcast.broadcast_id,
            broadcast.role,
            ranked.len(),
            broadcast.remaining()
        );

        let mut results = Vec::new();
        let mut reserved = false;
        for (distance_m, candidate) in ranked {
            if !reserved {
                if !broadcast.is_open() {
                    break;
                }
                if let Err(e) = self.reserve_slot(broadcast).await {
                    match &e {
                        SyncError::BroadcastClosed { .. } => {
                            debug!("Broadcast {} closed: {}", broadcast.broadcast_id, e)
                        }
                        _ => warn!(
                            "Broadcast {} progress not saved, stopping dispatch: {}",
                            broadcast.broadcast_id, e
                        ),
                    }
                    break;
                }
                reserved = true;
            }

            let outcome = self.place(broadcast, &candidate).await;
            if let MatchOutcome::Skipped(reason) = &outcome {
                debug!("Skipping {}: {:?}", candidate.persona_id, reason);
            }
            let stop = matches!(
                outcome,
                MatchOutcome::Failed(_) | MatchOutcome::Skipped(SkipReason::BroadcastClosed)
            );
            let offered_version = match &outcome {
                MatchOutcome::Offered(persona) => Some(persona.version),
                _ => None,
            };

            results.push(MatchResult {
                persona_id: candidate.persona_id.clone(),
                distance_m,
                outcome,
            });

            if let Some(version) = offered_version {
                reserved = false;
                self.announce_offer(broadcast, &candidate.persona_id, version)
                    .await;
            }
            if stop {
                warn!(
                    "Dispatch of {} stopped at {}",
                    broadcast.broadcast_id, candidate.persona_id
                );
                break;
            }
        }

        if reserved {
            if let Err(e) = self.release_slot(broadcast).await {
                warn!(
                    "Unused opening on {} not given back: {}",
                    broadcast.broadcast_id, e
                );
            }
        }

        info!(
            "Broadcast {} now {}/{} ({})",
            broadcast.broadcast_id, broadcast.hired_count, broadcast.target_count, broadcast.status
        );
        results
    }

    /// Offers one candidate against an opening already reserved on
    /// `broadcast`.
    async fn place(&self, broadcast: &mut Broadcast, candidate: &Persona) -> MatchOutcome {
        let attempt = self
            .offers
            .offer(
                &candidate.persona_id,
                candidate.version,
                &broadcast.employer_id,
                Some(broadcast.broadcast_id.as_str()),
            )
            .await;

        let offered = match attempt {
            Ok(persona) => persona,
            Err(SyncError::Conflict { .. }) => return MatchOutcome::Skipped(SkipReason::Conflict),
            Err(SyncError::InvalidTransition { .. }) => {
                return MatchOutcome::Skipped(SkipReason::NotAvailable)
            }
            Err(SyncError::NotFound { .. }) => return MatchOutcome::Skipped(SkipReason::NotFound),
            Err(e) => return MatchOutcome::Failed(e),
        };

        // A cancel can land between the reservation and the offer.
        match self.refresh(broadcast).await {
            Ok(()) if broadcast.status == BroadcastStatus::Cancelled => {
                match self.offers.withdraw(&offered.persona_id, offered.version).await {
                    Ok(_) => return MatchOutcome::Skipped(SkipReason::BroadcastClosed),
                    Err(e) => warn!(
                        "Offer on {} outlived cancelled broadcast {}: {}",
                        offered.persona_id, broadcast.broadcast_id, e
                    ),
                }
            }
            Ok(()) => {}
            Err(e) => debug!("Broadcast {} not re-read: {}", broadcast.broadcast_id, e),
        }

        let placed = self
            .offers
            .complete_hire(offered, &broadcast.employer_id)
            .await;
        MatchOutcome::Offered(Box::new(placed))
    }

    async fn announce_offer(&self, broadcast: &Broadcast, persona_id: &str, version: u64) {
        let notification = Notification::for_write(
            persona_id,
            "You have a job offer",
            format!(
                "{} needed now. Pay: {}/hr. Respond before the offer lapses.",
                broadcast.role, broadcast.wage
            ),
            persona_id,
            version,
        );
        notify_and_log(self.notifier.as_ref(), notification).await;
    }

    async fn refresh(&self, broadcast: &mut Broadcast) -> Result<()> {
        let stored = self
            .offers
            .store()
            .get(Collection::Broadcasts, &broadcast.broadcast_id)
            .await?;
        *broadcast = decode_broadcast(&stored.id, &stored.data)?;
        Ok(())
    }

    /// Claims one opening on the stored broadcast. Fails with
    /// `BroadcastClosed` once the stored broadcast is filled or cancelled.
    async fn reserve_slot(&self, broadcast: &mut Broadcast) -> Result<()> {
        self.write_progress(broadcast, |b| {
            if !b.is_open() {
                return Err(SyncError::BroadcastClosed {
                    id: b.broadcast_id.clone(),
                    status: b.status,
                });
            }
            b.record_placement();
            Ok(())
        })
        .await
    }

    async fn release_slot(&self, broadcast: &mut Broadcast) -> Result<()> {
        self.write_progress(broadcast, |b| {
            b.release_placement();
            Ok(())
        })
        .await
    }

    /// Applies `step` to the broadcast and writes the new counters with a
    /// compare-and-swap, re-reading and re-applying on a version conflict.
    async fn write_progress<F>(&self, broadcast: &mut Broadcast, step: F) -> Result<()>
    where
        F: Fn(&mut Broadcast) -> Result<()> + Send + Sync,
    {
        let store = self.offers.store();
        let mut last_error = None;

        for _ in 0..PROGRESS_RETRIES {
            let mut next = broadcast.clone();
            step(&mut next)?;

            match store
                .update(
                    Collection::Broadcasts,
                    &broadcast.broadcast_id,
                    next.progress_patch(),
                    broadcast.version,
                )
                .await
            {
                Ok(stored) => {
                    *broadcast = decode_broadcast(&stored.id, &stored.data)?;
                    return Ok(());
                }
                Err(e @ SyncError::Conflict { .. }) => {
                    debug!("Broadcast {} moved on, re-reading: {}", broadcast.broadcast_id, e);
                    self.refresh(broadcast).await?;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SyncError::unavailable("broadcast progress retries exhausted")
        }))
    }
}
