use anyhow::Result;
use clap::Parser;
use quickhire_sync::cli::{handle_command, QuickHireCli};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "quickhire_sync=info,quickhire=info,rocket::server=off";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = QuickHireCli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))?;

    // Initialize logging first
    if cli.log_json {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(false),
            )
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init();
    }

    handle_command(cli).await
}
