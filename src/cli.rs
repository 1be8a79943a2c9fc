// src/cli.rs
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use crate::core::{ConfigManager, Database};
use crate::extraction::{ChatExtractionClient, TextExtractor};
use crate::store::{ChangeType, Collection, DocumentStore, RawChange, SqliteStore};
use crate::sync::{ChangeClassifier, PresenceRegistry};

#[derive(Parser)]
#[command(name = "quickhire")]
#[command(about = "Realtime presence and offer matching for urgent gig hiring")]
pub struct QuickHireCli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to config.yaml
    #[arg(long, global = true, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP API
    Serve,
    /// Extract role and skills from spoken text
    Extract { text: String },
    /// List available candidates, optionally filtered by role or skill
    Candidates {
        #[arg(long, short)]
        query: Option<String>,
    },
    /// Create the database and run migrations
    Init,
}

pub async fn handle_command(cli: QuickHireCli) -> Result<()> {
    let config = ConfigManager::load_from(&cli.config)?;

    match cli.command {
        Command::Serve => crate::web::start_web_server(config).await,
        Command::Extract { text } => {
            let client = ChatExtractionClient::from_config(&config.service)?;
            match client.extract(&text).await {
                Ok(profile) => {
                    println!("{}", serde_json::to_string_pretty(&profile)?);
                    Ok(())
                }
                Err(e) => {
                    error!("Extraction failed: {}", e);
                    Err(e.into())
                }
            }
        }
        Command::Candidates { query } => {
            config.ensure_directories().await?;
            let store = SqliteStore::open(&config.environment.database_path).await?;
            let registry = load_registry(&store).await?;

            let candidates = registry.available_candidates(query.as_deref());
            info!("{} available candidates", candidates.len());
            for persona in candidates {
                println!(
                    "{}  {:<20} v{:<3} {}",
                    persona.persona_id,
                    persona.role,
                    persona.version,
                    persona.skills.join(", ")
                );
            }
            Ok(())
        }
        Command::Init => {
            config.ensure_directories().await?;
            let db = Database::new(&config.environment.database_path)
                .await
                .context("Failed to open database")?;
            db.health_check().await?;
            info!(
                "Database ready at {}",
                config.environment.database_path.display()
            );
            Ok(())
        }
    }
}

/// Builds a registry from a one-shot read of the persona collection.
async fn load_registry(store: &dyn DocumentStore) -> Result<PresenceRegistry> {
    let documents = store.list(Collection::Personas).await?;
    let batch: Vec<RawChange> = documents
        .into_iter()
        .map(|doc| RawChange {
            collection: Collection::Personas,
            document_id: doc.id,
            change_type: ChangeType::Added,
            snapshot: Some(doc.data),
        })
        .collect();

    let mut registry = PresenceRegistry::new();
    for event in ChangeClassifier::classify_batch(&batch) {
        registry.on_change(&event);
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Location, NewPersona};

    #[test]
    fn test_parses_subcommands() {
        let cli = QuickHireCli::try_parse_from(["quickhire", "candidates", "--query", "cook"]).unwrap();
        assert!(matches!(cli.command, Command::Candidates { query: Some(ref q) } if q == "cook"));
        assert!(!cli.log_json);

        let cli = QuickHireCli::try_parse_from(["quickhire", "--log-json", "serve"]).unwrap();
        assert!(cli.log_json);
        assert!(matches!(cli.command, Command::Serve));
    }

    #[tokio::test]
    async fn test_load_registry_skips_undecodable_documents() {
        let store = MemoryStore::new();
        store
            .create(
                Collection::Personas,
                NewPersona {
                    user_id: "u1".to_string(),
                    role: "Cook".to_string(),
                    skills: vec![],
                    location: Location::new(0.0, 0.0),
                    video_intro_url: None,
                }
                .to_document(),
            )
            .await
            .unwrap();
        store
            .create(Collection::Personas, serde_json::json!({"status": "AVAILABLE"}))
            .await
            .unwrap();

        let registry = load_registry(&store).await.unwrap();
        assert_eq!(registry.len(), 1);
    }
}
