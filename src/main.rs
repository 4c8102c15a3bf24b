use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{error, info, warn};

use chainhook_ingest::chainhook::PipelineError;
use chainhook_ingest::config;
use chainhook_ingest::database;
use chainhook_ingest::metrics::start_metrics_server;
use chainhook_ingest::{IngestError, WebhookService, WebhookServiceBuilder};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Newline-delimited webhook bodies to ingest (defaults to stdin)
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before anything reads the environment
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config_path = args.config.unwrap_or_else(config::default_config_path);
    info!("Using configuration file: {:?}", config_path);

    let config = match config::load_config(&config_path) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(IngestError::from(e).into());
        }
    };

    info!(
        "Stream '{}' with {} handler(s)",
        config.stream,
        config.handlers.len()
    );

    if config.metrics.enabled {
        let _metrics_server = start_metrics_server(config.metrics.port).await?;
    } else {
        info!("Metrics server disabled");
    }

    let pool = if config.database.enabled {
        let pool = database::establish_connection(config.database.max_connections).await?;
        database::run_migrations(&pool).await?;
        Some(pool)
    } else {
        None
    };

    let service = WebhookServiceBuilder::from_config(&config, pool).await?;
    info!(
        "Chainhook ingestion ready at tip #{}",
        service.current_tip().height
    );

    let ingest = async {
        match &args.input {
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("Failed to open input {path:?}"))?;
                ingest_lines(&service, file).await
            }
            None => ingest_lines(&service, tokio::io::stdin()).await,
        }
    };

    tokio::select! {
        result = ingest => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    info!(
        "Stopped at tip #{} (version {})",
        service.current_tip().height,
        service.current_tip().version
    );
    Ok(())
}

/// Feed each non-empty line to the service and print its acknowledgement
async fn ingest_lines<R: AsyncRead + Unpin>(service: &WebhookService, reader: R) -> Result<()> {
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match service.handle(line.as_bytes()).await {
            Ok(ack) => {
                info!(
                    "{} ({}) tip #{}",
                    ack.status.as_str(),
                    ack.status.http_status(),
                    ack.tip_height
                );
                println!("{}", serde_json::to_string(&ack)?);
            }
            Err(PipelineError::Halted) => {
                error!("Service halted after a commit conflict, stopping ingestion");
                return Err(PipelineError::Halted.into());
            }
            Err(e @ PipelineError::CommitConflict { .. }) => {
                error!("{}", e);
                return Err(e.into());
            }
            Err(e) => warn!("Delivery not acknowledged: {}", e),
        }
    }

    Ok(())
}
