//! Reward Relayer
//!
//! Consumes reward events from Kafka, records them in Postgres keyed by
//! location, and mints each reward on chain.

mod auth;
mod config;
mod kafka;
mod rpc;
mod server;
mod shutdown;
mod state;

use clap::{Parser, ValueEnum};
use config::{ConfigLoader, get_database_url};
use ethers::signers::Signer;
use ethers::middleware::SignerMiddleware;
use kafka::KafkaEventSource;
use relayer_core::chain::EthersChainClient;
use relayer_core::entities::reward::address_to_string;
use relayer_core::framework::DatabaseProcessor;
use relayer_core::relayer::{Relayer, RelayerParts};
use relayer_core::store::PgRewardStore;
use rpc::new_retrying_provider;
use server::{build_router, run_server};
use shutdown::{shutdown_signal, spawn_drain_deadline};
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Reward Relayer - Kafka to chain reward settlement
#[derive(Parser, Debug)]
#[command(name = "relayer-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./relayer-config.toml")]
    config: PathBuf,

    /// Override the telemetry listen address (e.g., 0.0.0.0:10000)
    #[arg(short = 't', long)]
    telemetry_listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Postgres connection URL
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// File holding the Postgres connection URL (takes precedence)
    #[arg(long, env = "DATABASE_URL_FILE")]
    database_url_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(args.log_format);

    tracing::info!("Starting relayer-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ConfigLoader::new(&args.config, args.telemetry_listen)
        .load()
        .map_err(|e| {
            tracing::error!("Failed to load configuration: {}", e);
            e
        })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let database_url = get_database_url(args.database_url, args.database_url_file.as_deref())
        .map_err(|e| {
            tracing::error!("Failed to resolve database URL: {}", e);
            e
        })?;

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    // Signer and chain client
    let wallet = auth::build_wallet(&config.auth, config.chain.chain_id).map_err(|e| {
        tracing::error!("Failed to load signing key: {}", e);
        e
    })?;
    let provider = new_retrying_provider(config.chain.rpc_url.clone(), config.chain.retry);
    let signer = Arc::new(SignerMiddleware::new(provider, wallet.clone()));
    let chain = EthersChainClient::new(signer, config.chain.reward_token);

    let rpc_chain_id = chain.chain_id().await.map_err(|e| {
        tracing::error!("Failed to reach RPC endpoint: {}", e);
        e
    })?;
    if rpc_chain_id != config.chain.chain_id {
        anyhow::bail!(
            "RPC endpoint is on chain {rpc_chain_id}, configuration expects {}",
            config.chain.chain_id
        );
    }
    tracing::info!(
        chain_id = rpc_chain_id,
        signer = %address_to_string(&wallet.address()),
        token = %address_to_string(&chain.token_address()),
        "Chain client ready"
    );

    let source = KafkaEventSource::new(&config.kafka).map_err(|e| {
        tracing::error!("Failed to create Kafka consumer: {}", e);
        e
    })?;

    // Pipeline
    let cancel = CancellationToken::new();
    let relayer = Relayer::new(
        RelayerParts {
            source: Arc::new(source),
            store: Arc::new(PgRewardStore::new(DatabaseProcessor::new(db_pool))),
            chain: Arc::new(chain),
        },
        config.relayer_config(wallet.address()),
        cancel.clone(),
    );

    let telemetry = tokio::spawn(run_server(
        build_router(AppState::new(relayer.clone())),
        config.telemetry_listen,
        cancel.clone(),
    ));

    let served = tokio::select! {
        served = relayer.serve() => served,
        _ = shutdown_signal() => Ok(()),
    };
    if let Err(e) = &served {
        tracing::error!("Relayer failed: {}", e);
    }

    let deadline = spawn_drain_deadline(cancel.clone(), config.shutdown_timeout);
    let errors = relayer.stop(false).await;
    deadline.abort();
    for e in &errors {
        tracing::error!("Error during shutdown: {}", e);
    }

    cancel.cancel();
    match telemetry.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Telemetry server failed: {}", e),
        Err(e) => tracing::error!("Telemetry server task failed: {}", e),
    }
    tracing::info!("Relayer shutdown complete");

    served.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,rdkafka=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
