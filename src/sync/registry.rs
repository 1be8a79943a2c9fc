// src/sync/registry.rs
//! Presence registry: the local projection of which candidates are available.
//!
//! A best-effort cache built by folding domain events. It is never consulted
//! for write decisions; those go through the store's version guard.

use std::collections::HashMap;
use tracing::debug;

use super::classifier::DomainEvent;
use crate::error::{Result, SyncError};
use crate::store::Collection;
use crate::types::Persona;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    Inserted,
    Updated,
    Removed,
    /// Older or equal version than what is held locally.
    Stale,
    /// Not a persona event.
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    personas: HashMap<String, Persona>,
    /// Last version seen for removed personas, so late events cannot revive them.
    tombstones: HashMap<String, u64>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold step.
    pub fn on_change(&mut self, event: &DomainEvent) -> FoldOutcome {
        match event {
            DomainEvent::PersonaCreated(persona) | DomainEvent::PersonaStatusChanged(persona) => {
                self.upsert(persona)
            }
            DomainEvent::PersonaRemoved { persona_id } => match self.personas.remove(persona_id) {
                Some(previous) => {
                    self.tombstones.insert(persona_id.clone(), previous.version);
                    FoldOutcome::Removed
                }
                None => FoldOutcome::Stale,
            },
            _ => FoldOutcome::Ignored,
        }
    }

    fn upsert(&mut self, incoming: &Persona) -> FoldOutcome {
        if let Some(&removed_at) = self.tombstones.get(&incoming.persona_id) {
            if incoming.version <= removed_at {
                return FoldOutcome::Stale;
            }
            self.tombstones.remove(&incoming.persona_id);
        }

        match self.personas.get_mut(&incoming.persona_id) {
            Some(current) if incoming.version > current.version => {
                debug!(
                    "Persona {} v{} -> v{} ({} -> {})",
                    incoming.persona_id, current.version, incoming.version, current.status, incoming.status
                );
                *current = incoming.clone();
                FoldOutcome::Updated
            }
            Some(_) => FoldOutcome::Stale,
            None => {
                // Unknown id on a status change is an implicit create.
                self.personas
                    .insert(incoming.persona_id.clone(), incoming.clone());
                FoldOutcome::Inserted
            }
        }
    }

    /// Available candidates, optionally filtered by a case-insensitive
    /// substring of role or any skill. Ordered by persona id.
    pub fn available_candidates(&self, filter: Option<&str>) -> Vec<Persona> {
        let mut out: Vec<Persona> = self
            .personas
            .values()
            .filter(|p| p.is_available())
            .filter(|p| filter.map_or(true, |q| p.matches_query(q)))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.persona_id.cmp(&b.persona_id));
        out
    }

    pub fn get(&self, persona_id: &str) -> Result<&Persona> {
        self.personas
            .get(persona_id)
            .ok_or_else(|| SyncError::not_found(Collection::Personas.as_str(), persona_id))
    }

    /// Forgets removed personas. After a resync no pre-removal event can
    /// still be in flight.
    pub fn clear_tombstones(&mut self) -> usize {
        let cleared = self.tombstones.len();
        self.tombstones.clear();
        cleared
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}
