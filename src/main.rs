use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use nutriflow::config::{load_config, Config};
use nutriflow::dedup::ScanPipeline;
use nutriflow::embedding::create_embedding_provider;
use nutriflow::llm::create_chat_provider;
use nutriflow::models::UserProfile;
use nutriflow::ocr::VisionOcr;
use nutriflow::orchestrator::Orchestrator;
use nutriflow::server::{self, AppState};
use nutriflow::store::{MenuStore, PgStore};
use nutriflow::{billing, db, migrate};

#[derive(Parser)]
#[command(name = "nutriflow", version, about = "Menu scanning and nutrition analysis backend")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "nutriflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or update the database schema.
    Init,
    /// Analyze a saved menu text file and print the result.
    Analyze {
        /// File containing OCR'd menu text.
        text_file: PathBuf,
        #[arg(long, value_delimiter = ',')]
        goals: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        restrictions: Vec<String>,
    },
    /// Run the full scan flow for one image: OCR, dedup, persist.
    Scan {
        image_file: PathBuf,
        /// User the scan belongs to.
        #[arg(long)]
        user: Uuid,
    },
    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nutriflow=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Init => {
            let pool = db::connect(&config).await?;
            migrate::run(&pool).await?;
            println!("Schema is up to date");
        }
        Command::Analyze {
            text_file,
            goals,
            restrictions,
        } => {
            let text = std::fs::read_to_string(&text_file)?;
            let provider: Arc<dyn nutriflow::llm::ChatProvider> =
                Arc::from(create_chat_provider(&config.llm)?);
            let orchestrator =
                Orchestrator::new(provider, config.llm.clone(), config.ranker.clone());
            let profile = UserProfile {
                goals,
                restrictions,
                recent_patterns: Vec::new(),
            };
            let analysis = orchestrator.analyze(&text, &profile).await;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Command::Scan { image_file, user } => {
            let image = std::fs::read(&image_file)?;
            let pipeline = build_pipeline(&config).await?;
            let outcome = pipeline.save_scan(user, &image).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Serve => {
            let provider: Arc<dyn nutriflow::llm::ChatProvider> =
                Arc::from(create_chat_provider(&config.llm)?);
            let orchestrator = Orchestrator::new(
                provider.clone(),
                config.llm.clone(),
                config.ranker.clone(),
            );

            let pool = db::connect(&config).await?;
            let store: Arc<dyn MenuStore> = Arc::new(PgStore::new(pool));
            let ocr = Arc::new(VisionOcr::new(&config.ocr)?);
            let embeddings = create_embedding_provider(&config.embedding)?;
            let pipeline = ScanPipeline::new(
                store.clone(),
                provider,
                ocr,
                embeddings,
                config.structuring.clone(),
                config.dedup.clone(),
            );

            let stripe = match billing::StripeClient::new() {
                Ok(client) => Some(client),
                Err(err) => {
                    tracing::warn!(error = %err, "Billing disabled");
                    None
                }
            };
            let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET").ok();
            if webhook_secret.is_none() {
                tracing::warn!("STRIPE_WEBHOOK_SECRET not set, webhook endpoint disabled");
            }

            let state = Arc::new(AppState {
                orchestrator,
                pipeline,
                store,
                stripe,
                billing: config.billing.clone(),
                webhook_secret,
            });
            server::serve(state, &config.server.bind).await?;
        }
    }
    Ok(())
}

async fn build_pipeline(config: &Config) -> Result<ScanPipeline> {
    let pool = db::connect(config).await?;
    let store: Arc<dyn MenuStore> = Arc::new(PgStore::new(pool));
    let provider: Arc<dyn nutriflow::llm::ChatProvider> =
        Arc::from(create_chat_provider(&config.llm)?);
    let ocr = Arc::new(VisionOcr::new(&config.ocr)?);
    let embeddings = create_embedding_provider(&config.embedding)?;
    Ok(ScanPipeline::new(
        store,
        provider,
        ocr,
        embeddings,
        config.structuring.clone(),
        config.dedup.clone(),
    ))
}
