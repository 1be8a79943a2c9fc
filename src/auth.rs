// src/auth.rs
//! Anonymous sessions: HS256 tokens issued on sign-in and checked on every
//! authenticated request.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::{Request, State};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::config_manager::AuthSettings;
use crate::error::{Result, SyncError};

const ISSUER: &str = "quickhire";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    /// Anonymous user id.
    pub sub: String,
    pub anonymous: bool,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub expires_at: chrono::DateTime<Utc>,
}

pub struct IdentityProvider {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl IdentityProvider {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours.max(1)),
        }
    }

    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::new(&settings.session_secret, settings.session_ttl_hours)
    }

    /// Issues a session for a fresh anonymous user.
    pub fn sign_in_anonymous(&self) -> Result<Session> {
        let now = Utc::now();
        let expires_at = now + self.ttl;
        let user_id = Uuid::new_v4().simple().to_string();

        let claims = Claims {
            iss: ISSUER.to_string(),
            sub: user_id.clone(),
            anonymous: true,
            exp: expires_at.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SyncError::Auth(format!("failed to sign session: {e}")))?;

        info!("Anonymous session issued for {}", user_id);
        Ok(Session {
            token,
            user_id,
            expires_at,
        })
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| SyncError::Auth(e.to_string()))
    }
}

/// Caller identity resolved from the `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: String,
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    TokenVerificationFailed,
    NotConfigured,
}

impl AuthError {
    pub fn message(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "Authorization token required",
            AuthError::InvalidToken => "Invalid authorization token format",
            AuthError::TokenVerificationFailed => "Session expired or invalid",
            AuthError::NotConfigured => "Identity provider not configured",
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionUser {
    type Error = AuthError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let provider = match req.guard::<&State<IdentityProvider>>().await {
            Outcome::Success(provider) => provider,
            Outcome::Error((status, _)) => {
                return Outcome::Error((status, AuthError::NotConfigured))
            }
            Outcome::Forward(f) => return Outcome::Forward(f),
        };

        let token = match req.headers().get_one("Authorization") {
            Some(header) => match header.strip_prefix("Bearer ") {
                Some(token) => token,
                None => {
                    warn!("Invalid Authorization header format");
                    return Outcome::Error((Status::Unauthorized, AuthError::InvalidToken));
                }
            },
            None => {
                warn!("Missing Authorization header");
                return Outcome::Error((Status::Unauthorized, AuthError::MissingToken));
            }
        };

        match provider.verify(token) {
            Ok(claims) => Outcome::Success(SessionUser {
                user_id: claims.sub,
            }),
            Err(e) => {
                warn!("Session verification failed: {}", e);
                Outcome::Error((Status::Unauthorized, AuthError::TokenVerificationFailed))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_and_verify() {
        let provider = IdentityProvider::new("test-secret", 24);
        let session = provider.sign_in_anonymous().unwrap();

        let claims = provider.verify(&session.token).unwrap();
        assert_eq!(claims.sub, session.user_id);
        assert!(claims.anonymous);
    }

    #[test]
    fn test_each_sign_in_is_a_new_user() {
        let provider = IdentityProvider::new("test-secret", 24);
        let a = provider.sign_in_anonymous().unwrap();
        let b = provider.sign_in_anonymous().unwrap();
        assert_ne!(a.user_id, b.user_id);
    }

    #[test]
    fn test_foreign_or_garbled_tokens_are_rejected() {
        let issuer = IdentityProvider::new("secret-a", 24);
        let other = IdentityProvider::new("secret-b", 24);
        let session = issuer.sign_in_anonymous().unwrap();

        assert!(matches!(other.verify(&session.token), Err(SyncError::Auth(_))));
        assert!(matches!(issuer.verify("not.a.token"), Err(SyncError::Auth(_))));
    }
}
