// src/extraction.rs
//! Spoken text -> {role, skills} through an OpenAI-compatible chat endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::core::config_manager::ServiceConfig;
use crate::error::{Result, SyncError};
use crate::utils::clean_list;

const SYSTEM_PROMPT: &str = "You are a recruiter AI.\n\
Extract 'role' (job title) and 'skills' (array of strings) from the user's spoken text.\n\
Keep skills in the order they were spoken.\n\
Output MUST be a valid JSON object.\n\
Example: { \"role\": \"Driver\", \"skills\": [\"License\", \"Navigation\"] }";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedProfile {
    pub role: String,
    pub skills: Vec<String>,
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, spoken_text: &str) -> Result<ExtractedProfile>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    skills: Vec<serde_json::Value>,
}

pub struct ChatExtractionClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatExtractionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }

    pub fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        Self::new(
            config.extraction_url.clone(),
            config.extraction_api_key.clone(),
            config.extraction_model.clone(),
            Duration::from_secs(config.timeout_seconds),
        )
    }
}

#[async_trait]
impl TextExtractor for ChatExtractionClient {
    async fn extract(&self, spoken_text: &str) -> Result<ExtractedProfile> {
        if spoken_text.trim().is_empty() {
            return Err(SyncError::Extraction("nothing was said".to_string()));
        }

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: spoken_text,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            temperature: 0.0,
        };

        info!("Sending extraction request ({} chars) to {}", spoken_text.len(), self.model);

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::Extraction(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Extraction(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            error!("Extraction API error {}: {}", status, body);
            return Err(SyncError::Extraction(format!(
                "service returned {status}"
            )));
        }

        debug!("Extraction response: {}", body);
        let profile = parse_completion(&body)?;
        info!("Extracted role '{}' with {} skills", profile.role, profile.skills.len());
        Ok(profile)
    }
}

/// Parses a chat-completions body down to the profile in its first choice.
pub fn parse_completion(body: &str) -> Result<ExtractedProfile> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| SyncError::Extraction(format!("malformed completion: {e}")))?;

    let content = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| SyncError::Extraction("empty choices".to_string()))?
        .message
        .content
        .unwrap_or_default();

    parse_profile_content(&content)
}

/// Parses the model's message content. Markdown code fences are unwrapped.
pub fn parse_profile_content(content: &str) -> Result<ExtractedProfile> {
    let json = strip_code_fence(content);
    if json.is_empty() {
        return Err(SyncError::Extraction("model returned no content".to_string()));
    }

    let raw: RawProfile = serde_json::from_str(json)
        .map_err(|e| SyncError::Extraction(format!("model returned invalid JSON: {e}")))?;

    let role = raw
        .role
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| SyncError::Extraction("no role in model output".to_string()))?;

    let skills: Vec<String> = raw
        .skills
        .into_iter()
        .filter_map(|s| match s {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        })
        .collect();

    Ok(ExtractedProfile {
        role,
        skills: clean_list(&skills),
    })
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an info string such as `json` on the opening fence.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(content: &str) -> String {
        serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
        .to_string()
    }

    #[test]
    fn test_parses_profile_and_keeps_skill_order() {
        let body = completion(r#"{"role": " Driver ", "skills": ["License", "", "Navigation"]}"#);
        let profile = parse_completion(&body).unwrap();
        assert_eq!(profile.role, "Driver");
        assert_eq!(profile.skills, vec!["License", "Navigation"]);
    }

    #[test]
    fn test_unwraps_code_fence() {
        let content = "```json\n{\"role\": \"Cook\", \"skills\": [\"Tandoor\"]}\n```";
        let profile = parse_profile_content(content).unwrap();
        assert_eq!(profile.role, "Cook");
        assert_eq!(profile.skills, vec!["Tandoor"]);
    }

    #[test]
    fn test_missing_role_is_error_not_empty_profile() {
        let err = parse_profile_content(r#"{"skills": ["Cleaning"]}"#).unwrap_err();
        assert!(matches!(err, SyncError::Extraction(_)));

        let err = parse_profile_content(r#"{"role": "  ", "skills": []}"#).unwrap_err();
        assert!(matches!(err, SyncError::Extraction(_)));
    }

    #[test]
    fn test_malformed_responses_are_errors() {
        assert!(matches!(
            parse_completion("not json"),
            Err(SyncError::Extraction(_))
        ));
        assert!(matches!(
            parse_completion(r#"{"choices": []}"#),
            Err(SyncError::Extraction(_))
        ));
        assert!(matches!(
            parse_completion(&completion("Sure! The role is driver.")),
            Err(SyncError::Extraction(_))
        ));
    }

    #[test]
    fn test_missing_skills_default_to_empty() {
        let profile = parse_profile_content(r#"{"role": "Helper"}"#).unwrap();
        assert!(profile.skills.is_empty());
    }
}
