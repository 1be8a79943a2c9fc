// src/types/persona.rs
//! Candidate work-offer profile and its hiring status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Location;

/// Hiring status of a persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersonaStatus {
    /// Open to offers.
    Available,
    /// Holding a single pending offer.
    Offered,
    /// Hired. Terminal for the current offer cycle.
    Hired,
}

impl PersonaStatus {
    /// Checks whether the offer cycle permits moving to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: PersonaStatus) -> bool {
        use PersonaStatus::{Available, Hired, Offered};
        matches!(
            (self, next),
            (Available, Offered) | (Offered, Hired) | (Offered, Available) | (Hired, Available)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Offered => "OFFERED",
            Self::Hired => "HIRED",
        }
    }
}

impl fmt::Display for PersonaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub persona_id: String,
    pub user_id: String,
    pub role: String,
    /// Ordered by relevance as spoken.
    #[serde(default)]
    pub skills: Vec<String>,
    pub location: Location,
    pub status: PersonaStatus,
    #[serde(default)]
    pub video_intro_url: Option<String>,
    pub version: u64,
    #[serde(default)]
    pub offered_by: Option<String>,
    #[serde(default)]
    pub offered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub offer_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub broadcast_id: Option<String>,
    #[serde(default)]
    pub hired_by: Option<String>,
    #[serde(default)]
    pub hired_at: Option<DateTime<Utc>>,
}

impl Persona {
    pub fn is_available(&self) -> bool {
        self.status == PersonaStatus::Available
    }

    /// Case-insensitive substring match against role or any skill.
    /// A blank query matches everything.
    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }

        self.role.to_lowercase().contains(&needle)
            || self
                .skills
                .iter()
                .any(|skill| skill.to_lowercase().contains(&needle))
    }

    /// Document body as persisted in the store.
    pub fn to_document(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Persona fields supplied by the onboarding flow, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPersona {
    pub user_id: String,
    pub role: String,
    pub skills: Vec<String>,
    pub location: Location,
    #[serde(default)]
    pub video_intro_url: Option<String>,
}

impl NewPersona {
    pub fn to_document(&self) -> serde_json::Value {
        serde_json::json!({
            "userId": self.user_id,
            "role": self.role,
            "skills": self.skills,
            "location": self.location,
            "status": PersonaStatus::Available,
            "videoIntroUrl": self.video_intro_url,
        })
    }
}
