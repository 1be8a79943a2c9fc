// src/sync/alerts.rs
//! Candidate-facing alerts derived from the event folds.

use serde::Serialize;
use std::collections::HashMap;

use super::classifier::DomainEvent;
use crate::types::{Broadcast, PersonaStatus};
use crate::utils::non_blank;

pub const JOB_ALERT_TITLE: &str = "URGENT JOB NEARBY!";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAlert {
    pub broadcast_id: String,
    pub title: String,
    pub body: String,
}

impl JobAlert {
    pub fn for_broadcast(broadcast: &Broadcast) -> Self {
        let role = non_blank(Some(broadcast.role.as_str()), "Worker");
        let wage = non_blank(Some(broadcast.wage.as_str()), "Standard");
        Self {
            broadcast_id: broadcast.broadcast_id.clone(),
            title: JOB_ALERT_TITLE.to_string(),
            body: format!("Wanted: {role}. Pay: {wage}/hr. Tap to Apply!"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HiredAlert {
    pub persona_id: String,
    pub role: String,
    pub employer: String,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Alert {
    Job(JobAlert),
    Hired(HiredAlert),
}

/// Watches a candidate's own personas and raises an alert when one of them
/// is modified into HIRED. The initial resync only sets the baseline.
#[derive(Debug, Default)]
pub struct HireWatch {
    watched: HashMap<String, Option<(u64, PersonaStatus)>>,
}

impl HireWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(&mut self, persona_id: impl Into<String>) {
        self.watched.entry(persona_id.into()).or_insert(None);
    }

    pub fn is_watching(&self, persona_id: &str) -> bool {
        self.watched.contains_key(persona_id)
    }

    pub fn on_change(&mut self, event: &DomainEvent) -> Option<HiredAlert> {
        let (persona, modified) = match event {
            DomainEvent::PersonaCreated(p) => (p, false),
            DomainEvent::PersonaStatusChanged(p) => (p, true),
            _ => return None,
        };

        let slot = self.watched.get_mut(&persona.persona_id)?;
        let previous = *slot;
        if let Some((version, _)) = previous {
            if persona.version <= version {
                return None;
            }
        }
        *slot = Some((persona.version, persona.status));

        let was_hired = matches!(previous, Some((_, PersonaStatus::Hired)));
        if modified && persona.status == PersonaStatus::Hired && !was_hired {
            return Some(HiredAlert {
                persona_id: persona.persona_id.clone(),
                role: non_blank(Some(persona.role.as_str()), "Staff").to_string(),
                employer: non_blank(persona.hired_by.as_deref(), "A Shop Owner").to_string(),
                version: persona.version,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BroadcastStatus, Location, Persona};
    use chrono::Utc;

    fn persona(status: PersonaStatus, version: u64) -> Persona {
        Persona {
            persona_id: "p1".to_string(),
            user_id: "u1".to_string(),
            role: "Driver".to_string(),
            skills: vec![],
            location: Location::new(0.0, 0.0),
            status,
            video_intro_url: None,
            version,
            offered_by: None,
            offered_at: None,
            offer_expires_at: None,
            broadcast_id: None,
            hired_by: Some("Ramesh Sweets".to_string()),
            hired_at: None,
        }
    }

    #[test]
    fn test_job_alert_defaults() {
        let broadcast = Broadcast {
            broadcast_id: "b1".to_string(),
            employer_id: "e1".to_string(),
            role: " ".to_string(),
            wage: "".to_string(),
            target_count: 1,
            hired_count: 0,
            status: BroadcastStatus::Active,
            location: Location::new(0.0, 0.0),
            created_at: Utc::now(),
            radius_km: None,
            version: 1,
        };
        let alert = JobAlert::for_broadcast(&broadcast);
        assert_eq!(alert.body, "Wanted: Worker. Pay: Standard/hr. Tap to Apply!");
    }

    #[test]
    fn test_hired_alert_only_on_modification() {
        let mut watch = HireWatch::new();
        watch.watch("p1");

        // Resync of an already-hired persona does not alert.
        assert!(watch
            .on_change(&DomainEvent::PersonaCreated(persona(PersonaStatus::Hired, 3)))
            .is_none());

        assert!(watch
            .on_change(&DomainEvent::PersonaStatusChanged(persona(PersonaStatus::Available, 4)))
            .is_none());
        assert!(watch
            .on_change(&DomainEvent::PersonaStatusChanged(persona(PersonaStatus::Offered, 5)))
            .is_none());

        let alert = watch
            .on_change(&DomainEvent::PersonaStatusChanged(persona(PersonaStatus::Hired, 6)))
            .unwrap();
        assert_eq!(alert.role, "Driver");
        assert_eq!(alert.employer, "Ramesh Sweets");

        // Echo of the same version is ignored.
        assert!(watch
            .on_change(&DomainEvent::PersonaStatusChanged(persona(PersonaStatus::Hired, 6)))
            .is_none());
    }

    #[test]
    fn test_unwatched_personas_are_ignored() {
        let mut watch = HireWatch::new();
        assert!(watch
            .on_change(&DomainEvent::PersonaStatusChanged(persona(PersonaStatus::Hired, 2)))
            .is_none());
    }
}
