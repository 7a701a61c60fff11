//! Operator CLI for the tutor backend and the transcript hand-off

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tutor_session::backend::{
    BackendClient, CachedCatalog, HttpLedger, HttpPackageCatalog, HttpTokenBroker, PackageId,
};
use tutor_session::config::SessionConfig;
use tutor_session::runtime::{Ledger, PackageCatalog, TokenBroker, TranscriptStore};
use tutor_session::store::SqliteTranscriptStore;

#[derive(Parser)]
#[command(name = "tutor-session", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List purchasable session packages
    Packages,
    /// Show the current coin balance
    Balance,
    /// Request transport credentials from the token broker
    Token {
        /// Display name presented to the broker
        #[arg(long)]
        name: Option<String>,
    },
    /// Charge and obtain credentials in one call
    StartLegacy {
        #[arg(long)]
        package: String,
    },
    /// Print the last transcript hand-off
    Feedback,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tutor_session=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let config = SessionConfig::from_env();

    match cli.command {
        Command::Packages => {
            let client = BackendClient::from_config(&config)?;
            let catalog = CachedCatalog::new(
                Arc::new(HttpPackageCatalog::new(client)),
                config.catalog_ttl,
            );
            let packages = catalog.fetch_packages().await?;
            println!("{}", serde_json::to_string_pretty(&packages)?);
        }
        Command::Balance => {
            let ledger = HttpLedger::new(BackendClient::from_config(&config)?);
            println!("{}", ledger.refresh().await?);
        }
        Command::Token { name } => {
            let name = name
                .or_else(|| config.display_name.clone())
                .unwrap_or_default();
            config.require_token_endpoint()?;
            let broker = HttpTokenBroker::from_config(&config)?;
            let grant = broker.acquire_token(&name).await?;
            // The token itself stays out of the output
            println!(
                "{}",
                serde_json::json!({
                    "routingAddress": grant.routing_address,
                    "hasToken": !grant.token.is_empty(),
                })
            );
        }
        Command::StartLegacy { package } => {
            let client = BackendClient::from_config(&config)?;
            let legacy = client.start_session(&PackageId::new(package)).await?;
            println!(
                "{}",
                serde_json::json!({
                    "roomName": legacy.room_name,
                    "participantName": legacy.participant_name,
                    "routingAddress": legacy.grant.routing_address,
                })
            );
        }
        Command::Feedback => {
            if let Some(parent) = config.db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(path = %config.db_path.display(), "Opening hand-off store");
            let store = SqliteTranscriptStore::open(&config.db_path)?;
            match store.load().await? {
                Some(entries) => println!("{}", serde_json::to_string_pretty(&entries)?),
                None => println!("No conversation to review"),
            }
        }
    }

    Ok(())
}
