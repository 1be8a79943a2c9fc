// src/onboarding.rs
//! Candidate onboarding: sign in, say what you do, attach a video, publish.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::{IdentityProvider, Session};
use crate::error::{Result, SyncError};
use crate::extraction::{ExtractedProfile, TextExtractor};
use crate::store::{Collection, DocumentStore};
use crate::sync::decode_persona;
use crate::types::{Location, NewPersona, Persona};
use crate::utils::clean_list;

/// Persona id derived from the owning user, so a second persona for the same
/// user collides at the store.
pub fn persona_id_for(user_id: &str) -> String {
    let key = format!("persona:{user_id}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
        .simple()
        .to_string()
}

/// Per-session state threaded through the onboarding calls.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_id: String,
    pub token: String,
    /// Set once the session has published its persona.
    pub persona_id: Option<String>,
}

impl SessionContext {
    pub fn from_session(session: &Session) -> Self {
        Self {
            user_id: session.user_id.clone(),
            token: session.token.clone(),
            persona_id: None,
        }
    }

    /// Context for a caller authenticated by token on a later request.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: String::new(),
            persona_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDraft {
    pub role: String,
    pub skills: Vec<String>,
    pub location: Location,
    #[serde(default)]
    pub video_intro_url: Option<String>,
}

impl ProfileDraft {
    pub fn from_extracted(profile: ExtractedProfile, location: Location) -> Self {
        Self {
            role: profile.role,
            skills: profile.skills,
            location,
            video_intro_url: None,
        }
    }

    pub fn with_video(mut self, url: impl Into<String>) -> Self {
        self.video_intro_url = Some(url.into());
        self
    }
}

pub struct CandidateOnboarding {
    store: Arc<dyn DocumentStore>,
    extractor: Arc<dyn TextExtractor>,
}

impl CandidateOnboarding {
    pub fn new(store: Arc<dyn DocumentStore>, extractor: Arc<dyn TextExtractor>) -> Self {
        Self { store, extractor }
    }

    pub fn sign_in(&self, identity: &IdentityProvider) -> Result<SessionContext> {
        let session = identity.sign_in_anonymous()?;
        Ok(SessionContext::from_session(&session))
    }

    /// Extracts role and skills from spoken text. Extraction failures are
    /// surfaced, never turned into an empty profile.
    pub async fn parse(&self, spoken_text: &str) -> Result<ExtractedProfile> {
        self.extractor.extract(spoken_text).await
    }

    /// Creates the session's persona as AVAILABLE at version 1 and records
    /// its id in the context.
    pub async fn publish(&self, ctx: &mut SessionContext, draft: &ProfileDraft) -> Result<Persona> {
        if let Some(existing) = &ctx.persona_id {
            return Err(SyncError::Validation(format!(
                "session already published persona {existing}"
            )));
        }

        let video = draft
            .video_intro_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                SyncError::Validation("attach an intro video before publishing".to_string())
            })?;

        let role = draft.role.trim();
        if role.is_empty() {
            return Err(SyncError::Validation("role is required".to_string()));
        }

        if let Some(existing) = self.find_user_persona(&ctx.user_id).await? {
            ctx.persona_id = Some(existing.persona_id.clone());
            return Err(SyncError::Validation(format!(
                "user already has persona {}",
                existing.persona_id
            )));
        }

        let new_persona = NewPersona {
            user_id: ctx.user_id.clone(),
            role: role.to_string(),
            skills: clean_list(&draft.skills),
            location: draft.location.clone(),
            video_intro_url: Some(video.to_string()),
        };

        let persona_id = persona_id_for(&ctx.user_id);
        let id = match self
            .store
            .create_with_id(Collection::Personas, &persona_id, new_persona.to_document())
            .await
        {
            Ok(id) => id,
            Err(SyncError::AlreadyExists { .. }) => {
                ctx.persona_id = Some(persona_id.clone());
                return Err(SyncError::Validation(format!(
                    "user already has persona {persona_id}"
                )));
            }
            Err(e) => return Err(e),
        };
        let stored = self.store.get(Collection::Personas, &id).await?;
        let persona = decode_persona(&stored.id, &stored.data)?;

        ctx.persona_id = Some(persona.persona_id.clone());
        info!("Persona {} published for {} as {}", persona.persona_id, ctx.user_id, persona.role);
        Ok(persona)
    }

    /// Sets the intro video of a published persona. Once set it cannot be
    /// replaced or cleared; re-sending the same URL is a no-op.
    pub async fn attach_video(
        &self,
        persona_id: &str,
        url: &str,
        expected_version: u64,
    ) -> Result<Persona> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SyncError::ImmutableField {
                field: "videoIntroUrl".to_string(),
            });
        }

        let stored = self.store.get(Collection::Personas, persona_id).await?;
        let current = decode_persona(&stored.id, &stored.data)?;
        match current.video_intro_url.as_deref() {
            Some(existing) if existing == url => return Ok(current),
            Some(_) => {
                return Err(SyncError::ImmutableField {
                    field: "videoIntroUrl".to_string(),
                })
            }
            None => {}
        }

        let updated = self
            .store
            .update(
                Collection::Personas,
                persona_id,
                serde_json::json!({ "videoIntroUrl": url }),
                expected_version,
            )
            .await?;
        decode_persona(&updated.id, &updated.data)
    }

    pub async fn find_user_persona(&self, user_id: &str) -> Result<Option<Persona>> {
        let documents = self.store.list(Collection::Personas).await?;
        Ok(documents
            .into_iter()
            .filter(|doc| doc.data.get("userId").and_then(|v| v.as_str()) == Some(user_id))
            .find_map(|doc| decode_persona(&doc.id, &doc.data).ok()))
    }
}
