// src/core/config_manager.rs
//! Unified configuration: optional `config.yaml` overlaid by environment variables.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_EXTRACTION_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_EXTRACTION_MODEL: &str = "llama-3.3-70b-versatile";

#[derive(Debug, Clone)]
pub struct ConfigManager {
    pub environment: EnvironmentConfig,
    pub service: ServiceConfig,
    pub sync: SyncConfig,
    pub auth: AuthSettings,
}

#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    pub name: String,
    pub database_path: PathBuf,
    pub port: u16,
}

/// External text extraction service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub extraction_url: String,
    pub extraction_api_key: Option<String>,
    pub extraction_model: String,
    pub timeout_seconds: u64,
    pub notify_webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub offer_timeout_seconds: u64,
    /// Employer action confirms the hire without a candidate accept step.
    pub auto_confirm_hires: bool,
    pub broadcast_radius_km: Option<f64>,
}

impl SyncConfig {
    pub fn offer_timeout(&self) -> Duration {
        Duration::from_secs(self.offer_timeout_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub session_secret: String,
    pub session_ttl_hours: i64,
}

/// One environment section of `config.yaml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub database_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub extraction_url: Option<String>,
    pub extraction_model: Option<String>,
    pub extraction_timeout_seconds: Option<u64>,
    pub offer_timeout_seconds: Option<u64>,
    pub auto_confirm_hires: Option<bool>,
    pub broadcast_radius_km: Option<f64>,
    pub session_ttl_hours: Option<i64>,
    pub notify_webhook_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    local: Option<FileConfig>,
    #[serde(default)]
    production: Option<FileConfig>,
}

impl ConfigManager {
    /// Load all configurations
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yaml"))
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let env_name = Self::get_environment();
        info!("Loading configuration for environment: {}", env_name);

        let file = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            Self::parse_file(&content, &env_name)?
        } else {
            FileConfig::default()
        };

        Self::from_layers(&env_name, file, |key| std::env::var(key).ok())
    }

    fn get_environment() -> String {
        std::env::var("QUICKHIRE_ENV")
            .or_else(|_| std::env::var("ENVIRONMENT"))
            .unwrap_or_else(|_| "local".to_string())
    }

    /// Picks the section for `env_name` out of a `config.yaml` body.
    pub fn parse_file(content: &str, env_name: &str) -> Result<FileConfig> {
        let config_file: ConfigFile =
            serde_yaml::from_str(content).context("Failed to parse config.yaml")?;

        let section = match env_name {
            "production" => config_file.production,
            _ => config_file.local,
        };
        Ok(section.unwrap_or_default())
    }

    /// Merges file values with environment overrides. Environment wins.
    pub fn from_layers<F>(env_name: &str, file: FileConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_u64 = |key: &str| -> Result<Option<u64>> {
            lookup(key)
                .map(|v| {
                    v.parse::<u64>()
                        .with_context(|| format!("{} must be a non-negative integer", key))
                })
                .transpose()
        };

        let port = match lookup("QUICKHIRE_PORT") {
            Some(v) => v
                .parse::<u16>()
                .context("QUICKHIRE_PORT must be a valid port number")?,
            None => file.port.unwrap_or(8000),
        };

        let environment = EnvironmentConfig {
            name: env_name.to_string(),
            database_path: lookup("QUICKHIRE_DATABASE_PATH")
                .map(PathBuf::from)
                .or(file.database_path)
                .unwrap_or_else(|| PathBuf::from("quickhire.db")),
            port,
        };

        let service = ServiceConfig {
            extraction_url: lookup("EXTRACTION_API_URL")
                .or(file.extraction_url)
                .unwrap_or_else(|| DEFAULT_EXTRACTION_URL.to_string()),
            extraction_api_key: lookup("EXTRACTION_API_KEY").filter(|k| !k.trim().is_empty()),
            extraction_model: lookup("EXTRACTION_MODEL")
                .or(file.extraction_model)
                .unwrap_or_else(|| DEFAULT_EXTRACTION_MODEL.to_string()),
            timeout_seconds: parse_u64("EXTRACTION_TIMEOUT_SECONDS")?
                .or(file.extraction_timeout_seconds)
                .unwrap_or(10),
            notify_webhook_url: lookup("NOTIFY_WEBHOOK_URL").or(file.notify_webhook_url),
        };

        let auto_confirm_hires = match lookup("QUICKHIRE_AUTO_CONFIRM") {
            Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
            None => file.auto_confirm_hires.unwrap_or(false),
        };

        let sync = SyncConfig {
            offer_timeout_seconds: parse_u64("OFFER_TIMEOUT_SECONDS")?
                .or(file.offer_timeout_seconds)
                .unwrap_or(300),
            auto_confirm_hires,
            broadcast_radius_km: file.broadcast_radius_km.or(Some(2.0)),
        };

        let session_secret = match lookup("QUICKHIRE_SESSION_SECRET") {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("QUICKHIRE_SESSION_SECRET not set; sessions will not survive a restart");
                uuid::Uuid::new_v4().to_string()
            }
        };

        let auth = AuthSettings {
            session_secret,
            session_ttl_hours: file.session_ttl_hours.unwrap_or(24),
        };

        Ok(Self {
            environment,
            service,
            sync,
            auth,
        })
    }

    /// Ensure the database directory exists
    pub async fn ensure_directories(&self) -> Result<()> {
        if let Some(db_parent) = self.environment.database_path.parent() {
            if !db_parent.as_os_str().is_empty() {
                crate::utils::ensure_dir_exists(db_parent).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ConfigManager::from_layers("local", FileConfig::default(), lookup(&[])).unwrap();
        assert_eq!(config.environment.port, 8000);
        assert_eq!(config.environment.database_path, PathBuf::from("quickhire.db"));
        assert_eq!(config.service.extraction_model, DEFAULT_EXTRACTION_MODEL);
        assert_eq!(config.service.timeout_seconds, 10);
        assert_eq!(config.sync.offer_timeout_seconds, 300);
        assert!(!config.sync.auto_confirm_hires);
        assert_eq!(config.sync.broadcast_radius_km, Some(2.0));
        assert!(config.service.extraction_api_key.is_none());
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = ConfigManager::parse_file(
            r#"
local:
  port: 9000
  offer_timeout_seconds: 60
  auto_confirm_hires: true
production:
  port: 80
"#,
            "local",
        )
        .unwrap();
        assert_eq!(file.port, Some(9000));

        let config = ConfigManager::from_layers(
            "local",
            file,
            lookup(&[("QUICKHIRE_PORT", "9100"), ("EXTRACTION_API_KEY", "k")]),
        )
        .unwrap();
        assert_eq!(config.environment.port, 9100);
        assert_eq!(config.sync.offer_timeout_seconds, 60);
        assert!(config.sync.auto_confirm_hires);
        assert_eq!(config.service.extraction_api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_production_section_selected() {
        let file = ConfigManager::parse_file("production:\n  port: 80\n", "production").unwrap();
        assert_eq!(file.port, Some(80));
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let result = ConfigManager::from_layers(
            "local",
            FileConfig::default(),
            lookup(&[("QUICKHIRE_PORT", "not-a-port")]),
        );
        assert!(result.is_err());
    }
}
