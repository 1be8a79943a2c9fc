// src/sync/engine.rs
//! Ties the folds to the store: one ordered fold per entity type, fed by
//! the change streams and by this process's own confirmed writes, publishing
//! immutable registry snapshots.

use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::alerts::{Alert, HireWatch};
use super::broadcasts::{cancel_broadcast, open_broadcast, BroadcastBoard};
use super::classifier::{ChangeClassifier, DomainEvent, EventStream};
use super::dispatcher::{BroadcastDispatcher, MatchResult, RoleMatcher};
use super::echo::EchoGuard;
use super::offers::{OfferPolicy, OfferStateMachine};
use super::registry::{FoldOutcome, PresenceRegistry};
use crate::error::{Result, SyncError};
use crate::notify::{notify_and_log, Notification, NotificationGateway};
use crate::store::{Collection, DocumentFilter, DocumentStore, RawChange};
use crate::types::{Broadcast, NewBroadcast, Persona};

const ALERT_BUFFER: usize = 256;

#[derive(Default)]
struct EngineState {
    registry: PresenceRegistry,
    board: BroadcastBoard,
    echoes: EchoGuard,
    hires: HireWatch,
}

/// Counters for one applied batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplySummary {
    pub applied: usize,
    pub stale: usize,
    pub echoes: usize,
    pub decode_errors: usize,
}

pub struct SyncEngine {
    store: Arc<dyn DocumentStore>,
    offers: Arc<OfferStateMachine>,
    dispatcher: BroadcastDispatcher,
    notifier: Arc<dyn NotificationGateway>,
    state: RwLock<EngineState>,
    snapshots: watch::Sender<Arc<PresenceRegistry>>,
    alerts: broadcast::Sender<Alert>,
}

/// Running change-stream subscriptions. Dropping the handle unsubscribes;
/// writes already issued still complete.
pub struct SyncHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn unsubscribe(self) {}

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn NotificationGateway>,
        policy: OfferPolicy,
    ) -> Self {
        let offers = Arc::new(OfferStateMachine::new(Arc::clone(&store), policy));
        let dispatcher = BroadcastDispatcher::new(Arc::clone(&offers), Arc::clone(&notifier));
        let (snapshots, _) = watch::channel(Arc::new(PresenceRegistry::new()));
        let (alerts, _) = broadcast::channel(ALERT_BUFFER);

        Self {
            store,
            offers,
            dispatcher,
            notifier,
            state: RwLock::new(EngineState::default()),
            snapshots,
            alerts,
        }
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn RoleMatcher>) -> Self {
        self.dispatcher = self.dispatcher.with_matcher(matcher);
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn offers(&self) -> &Arc<OfferStateMachine> {
        &self.offers
    }

    /// Subscribes to both collections and folds their events until the
    /// returned handle is dropped.
    pub fn start(self: &Arc<Self>) -> SyncHandle {
        let tasks = [Collection::Personas, Collection::Broadcasts]
            .into_iter()
            .map(|collection| {
                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    let mut stream =
                        EventStream::new(Arc::clone(&engine.store), collection, DocumentFilter::All);
                    let mut subscriptions = stream.resync_count();
                    while let Some(events) = stream.next_batch().await {
                        engine.apply_events(&events).await;
                        if stream.resync_count() != subscriptions {
                            subscriptions = stream.resync_count();
                            engine.prune_after_resync(collection, &events);
                        }
                    }
                    info!("{} stream ended", collection);
                })
            })
            .collect();

        info!("Sync engine subscribed to personas and broadcasts");
        SyncHandle { tasks }
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, EngineState>> {
        self.state
            .read()
            .map_err(|_| SyncError::unavailable("sync state lock poisoned"))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, EngineState>> {
        self.state
            .write()
            .map_err(|_| SyncError::unavailable("sync state lock poisoned"))
    }

    /// Classifies and folds one raw batch.
    pub async fn apply_batch(&self, batch: &[RawChange]) -> ApplySummary {
        self.apply_events(&ChangeClassifier::classify_batch(batch))
            .await
    }

    /// Folds feed events. Own echoes are counted and skipped.
    pub async fn apply_events(&self, events: &[DomainEvent]) -> ApplySummary {
        self.fold(events, true).await
    }

    async fn fold(&self, events: &[DomainEvent], from_feed: bool) -> ApplySummary {
        let mut summary = ApplySummary::default();
        let mut raised = Vec::new();
        let mut registry_changed = false;

        {
            let mut state = match self.write_state() {
                Ok(state) => state,
                Err(e) => {
                    warn!("Dropping {} events: {}", events.len(), e);
                    return summary;
                }
            };

            for event in events {
                if let DomainEvent::DecodeError {
                    collection,
                    document_id,
                    reason,
                } = event
                {
                    warn!("Dropping undecodable {}/{}: {}", collection, document_id, reason);
                    summary.decode_errors += 1;
                    continue;
                }

                let collection = collection_of(event);
                if from_feed {
                    if let Some(version) = event.version() {
                        if state.echoes.is_echo(collection, event.document_id(), version) {
                            debug!("Echo of {}/{} v{}", collection, event.document_id(), version);
                            summary.echoes += 1;
                            continue;
                        }
                    }
                } else if let Some(version) = event.version() {
                    state.echoes.record(collection, event.document_id(), version);
                }

                if let Some(hired) = state.hires.on_change(event) {
                    raised.push(Alert::Hired(hired));
                }

                match collection {
                    Collection::Personas => match state.registry.on_change(event) {
                        FoldOutcome::Stale | FoldOutcome::Ignored => summary.stale += 1,
                        _ => {
                            registry_changed = true;
                            summary.applied += 1;
                        }
                    },
                    Collection::Broadcasts => {
                        let before = state.board.get(event.document_id()).map(|b| b.version);
                        if let Some(job) = state.board.on_change(event) {
                            raised.push(Alert::Job(job));
                        }
                        let after = state.board.get(event.document_id()).map(|b| b.version);
                        if before == after {
                            summary.stale += 1;
                        } else {
                            summary.applied += 1;
                        }
                    }
                }
            }

            if registry_changed {
                self.snapshots
                    .send_replace(Arc::new(state.registry.clone()));
            }
        }

        for alert in raised {
            self.deliver(alert).await;
        }
        summary
    }

    /// Drops bookkeeping a resync batch has made obsolete: echo records for
    /// documents the batch no longer carries and, for personas, tombstones.
    pub fn prune_after_resync(&self, collection: Collection, resync: &[DomainEvent]) {
        let present: HashSet<&str> = resync.iter().map(DomainEvent::document_id).collect();
        let mut state = match self.write_state() {
            Ok(state) => state,
            Err(e) => {
                warn!("Skipping {} prune: {}", collection, e);
                return;
            }
        };

        let echoes = state.echoes.retain(collection, |id| present.contains(id));
        let tombstones = match collection {
            Collection::Personas => state.registry.clear_tombstones(),
            Collection::Broadcasts => 0,
        };
        if echoes + tombstones > 0 {
            debug!(
                "Resync of {} dropped {} echo records and {} tombstones",
                collection, echoes, tombstones
            );
        }
    }

    async fn deliver(&self, alert: Alert) {
        let notification = match &alert {
            Alert::Job(job) => Notification::for_write(
                format!("nearby:{}", job.broadcast_id),
                job.title.clone(),
                job.body.clone(),
                &job.broadcast_id,
                0,
            ),
            Alert::Hired(hired) => Notification::for_write(
                hired.persona_id.clone(),
                "You're hired!",
                format!("{} hired you as {}.", hired.employer, hired.role),
                &hired.persona_id,
                hired.version,
            ),
        };
        // No receivers is fine; the push gateway still gets it.
        let _ = self.alerts.send(alert);
        notify_and_log(self.notifier.as_ref(), notification).await;
    }

    async fn apply_confirmed_persona(&self, persona: &Persona) {
        self.fold(&[DomainEvent::PersonaStatusChanged(persona.clone())], false)
            .await;
    }

    async fn apply_confirmed_broadcast(&self, broadcast: &Broadcast, created: bool) {
        let event = if created && broadcast.is_open() {
            DomainEvent::BroadcastOpened(broadcast.clone())
        } else if broadcast.is_open() {
            DomainEvent::BroadcastUpdated(broadcast.clone())
        } else {
            DomainEvent::BroadcastClosed(broadcast.clone())
        };
        self.fold(&[event], false).await;
    }

    // ---- reads ----

    pub fn available_candidates(&self, filter: Option<&str>) -> Result<Vec<Persona>> {
        Ok(self.read_state()?.registry.available_candidates(filter))
    }

    pub fn persona(&self, persona_id: &str) -> Result<Persona> {
        self.read_state()?.registry.get(persona_id).cloned()
    }

    pub fn open_broadcasts(&self) -> Result<Vec<Broadcast>> {
        Ok(self.read_state()?.board.open())
    }

    pub fn broadcast(&self, broadcast_id: &str) -> Result<Broadcast> {
        self.read_state()?
            .board
            .get(broadcast_id)
            .cloned()
            .ok_or_else(|| SyncError::not_found(Collection::Broadcasts.as_str(), broadcast_id))
    }

    /// Latest immutable registry snapshot.
    pub fn snapshot(&self) -> Arc<PresenceRegistry> {
        self.snapshots.borrow().clone()
    }

    pub fn watch_snapshots(&self) -> watch::Receiver<Arc<PresenceRegistry>> {
        self.snapshots.subscribe()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.alerts.subscribe()
    }

    /// Raise a hired alert when this persona is later modified into HIRED.
    pub fn watch_persona(&self, persona_id: &str) -> Result<()> {
        self.write_state()?.hires.watch(persona_id);
        Ok(())
    }

    // ---- writes; local state changes only after the store confirms ----

    /// Persists a persona created elsewhere (onboarding) into the local fold.
    pub async fn adopt_persona(&self, persona: &Persona) {
        self.fold(&[DomainEvent::PersonaCreated(persona.clone())], false)
            .await;
    }

    /// Employer hire action on a single candidate.
    pub async fn offer(&self, persona_id: &str, expected_version: u64, employer_id: &str) -> Result<Persona> {
        let persona = self
            .offers
            .hire(persona_id, expected_version, employer_id, None)
            .await?;
        self.apply_confirmed_persona(&persona).await;
        Ok(persona)
    }

    pub async fn accept(&self, persona_id: &str, expected_version: u64) -> Result<Persona> {
        let persona = self.offers.accept(persona_id, expected_version).await?;
        self.apply_confirmed_persona(&persona).await;
        Ok(persona)
    }

    pub async fn confirm(&self, persona_id: &str, expected_version: u64, employer_id: &str) -> Result<Persona> {
        let persona = self
            .offers
            .confirm(persona_id, expected_version, employer_id)
            .await?;
        self.apply_confirmed_persona(&persona).await;
        Ok(persona)
    }

    pub async fn decline(&self, persona_id: &str, expected_version: u64) -> Result<Persona> {
        let persona = self.offers.decline(persona_id, expected_version).await?;
        self.apply_confirmed_persona(&persona).await;
        Ok(persona)
    }

    pub async fn reactivate(&self, persona_id: &str, expected_version: u64) -> Result<Persona> {
        let persona = self.offers.reactivate(persona_id, expected_version).await?;
        self.apply_confirmed_persona(&persona).await;
        Ok(persona)
    }

    pub async fn create_broadcast(&self, request: &NewBroadcast) -> Result<Broadcast> {
        let broadcast = open_broadcast(self.store.as_ref(), request).await?;
        self.apply_confirmed_broadcast(&broadcast, true).await;
        Ok(broadcast)
    }

    pub async fn cancel_broadcast(&self, broadcast_id: &str, expected_version: u64) -> Result<Broadcast> {
        let broadcast = cancel_broadcast(self.store.as_ref(), broadcast_id, expected_version).await?;
        self.apply_confirmed_broadcast(&broadcast, false).await;
        Ok(broadcast)
    }

    /// Creates a broadcast and dispatches it against the current candidate
    /// view. The view only picks candidates; every offer is version-checked
    /// at the store.
    pub async fn create_broadcast_and_dispatch(
        &self,
        request: &NewBroadcast,
    ) -> Result<(Broadcast, Vec<MatchResult>)> {
        let mut broadcast = self.create_broadcast(request).await?;
        let pool = self.available_candidates(None)?;
        let results = self.dispatcher.dispatch(&mut broadcast, &pool).await;

        let placed: Vec<DomainEvent> = results
            .iter()
            .filter_map(MatchResult::placed)
            .map(|persona| DomainEvent::PersonaStatusChanged(persona.clone()))
            .collect();
        self.fold(&placed, false).await;
        self.apply_confirmed_broadcast(&broadcast, false).await;
        Ok((broadcast, results))
    }
}

fn collection_of(event: &DomainEvent) -> Collection {
    match event {
        DomainEvent::PersonaCreated(_)
        | DomainEvent::PersonaStatusChanged(_)
        | DomainEvent::PersonaRemoved { .. } => Collection::Personas,
        DomainEvent::BroadcastOpened(_)
        | DomainEvent::BroadcastUpdated(_)
        | DomainEvent::BroadcastClosed(_) => Collection::Broadcasts,
        DomainEvent::DecodeError { collection, .. } => *collection,
    }
}
