#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quickhire_sync::error::{Result, SyncError};
use quickhire_sync::extraction::{ExtractedProfile, TextExtractor};
use quickhire_sync::notify::{Delivery, Notification, NotificationGateway};
use quickhire_sync::store::{Collection, DocumentStore};
use quickhire_sync::types::{Location, NewPersona};

pub const ORIGIN: (f64, f64) = (12.9716, 77.5946);

/// Roughly `meters` due north of [`ORIGIN`].
pub fn north_of_origin(meters: f64) -> Location {
    Location::new(ORIGIN.0 + meters / 111_195.0, ORIGIN.1)
}

pub async fn seed_persona(store: &dyn DocumentStore, user_id: &str, role: &str, at: Location) -> String {
    store
        .create(
            Collection::Personas,
            NewPersona {
                user_id: user_id.to_string(),
                role: role.to_string(),
                skills: vec![],
                location: at,
                video_intro_url: Some(format!("https://videos.test/{user_id}.mp4")),
            }
            .to_document(),
        )
        .await
        .unwrap()
}

pub async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|n| n.title.clone()).collect()
    }
}

#[async_trait]
impl NotificationGateway for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<Delivery> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(Delivery::Delivered)
    }
}

/// Answers every request with the same profile, or fails.
pub struct FixedExtractor(pub Option<ExtractedProfile>);

impl FixedExtractor {
    pub fn role(role: &str, skills: &[&str]) -> Arc<Self> {
        Arc::new(Self(Some(ExtractedProfile {
            role: role.to_string(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
        })))
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self(None))
    }
}

#[async_trait]
impl TextExtractor for FixedExtractor {
    async fn extract(&self, _spoken_text: &str) -> Result<ExtractedProfile> {
        self.0
            .clone()
            .ok_or_else(|| SyncError::Extraction("service unavailable".to_string()))
    }
}
