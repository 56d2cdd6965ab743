//! Transfer Indexer CLI
//!
//! Entry point for the indexer binary. Provides subcommands for:
//! - `run` - Start the indexer (backfill + live tail + API)
//! - `migrate` - Run database migrations
//! - `version` - Show version information

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use transfer_indexer::api::{self, AppState, BroadcastSink, IpRateLimiter};
use transfer_indexer::config::Settings;
use transfer_indexer::error::{AppError, InfraError, Result};
use transfer_indexer::indexer::{BackfillEngine, LiveTailer};
use transfer_indexer::ports::{EventSink, EventStore};
use transfer_indexer::rpc::{ChainClient, RpcGateway, RpcTransport};
use transfer_indexer::store::SqliteStore;

/// ERC-20 Transfer Event Indexer
#[derive(Parser, Debug)]
#[command(name = "transfer-indexer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the indexer
    Run,

    /// Run database migrations
    Migrate,

    /// Show version information
    Version,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Fatal error");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    if matches!(cli.command, Commands::Version) {
        println!("transfer-indexer {}", transfer_indexer::VERSION);
        return Ok(());
    }

    let settings = Settings::load().map_err(InfraError::Config)?;
    init_tracing(&settings, cli.verbose);
    settings
        .validate()
        .map_err(|errors| AppError::Config(errors.join("; ")))?;

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| AppError::Initialization(format!("failed to start runtime: {e}")))?;

    match cli.command {
        Commands::Run => runtime.block_on(run_indexer(settings)),
        Commands::Migrate => runtime.block_on(run_migrations(settings)),
        Commands::Version => Ok(()),
    }
}

fn init_tracing(settings: &Settings, verbose: bool) {
    let default_directive = if verbose {
        "debug"
    } else {
        settings.log_level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_migrations(settings: Settings) -> Result<()> {
    let store = SqliteStore::connect(&settings.db_name).await?;
    store.run_migrations().await?;
    info!(db = %settings.db_name, "Migrations applied");
    Ok(())
}

async fn run_indexer(settings: Settings) -> Result<()> {
    info!(
        version = transfer_indexer::VERSION,
        "Starting transfer indexer"
    );

    let contract = settings.contract()?;
    let shutdown = CancellationToken::new();

    // Store
    let store = Arc::new(SqliteStore::connect(&settings.db_name).await?);
    store.run_migrations().await?;

    // Upstream access: one gateway, everything goes through it
    let transport = Arc::new(RpcTransport::new(
        settings.rpc_url.as_str(),
        settings.request_timeout(),
    )?);
    let gateway = Arc::new(RpcGateway::spawn(
        transport,
        settings.gateway_config(),
        shutdown.clone(),
    ));
    let chain = Arc::new(ChainClient::new(gateway));

    match chain.chain_id().await {
        Ok(chain_id) => info!(chain_id, rpc_url = %settings.rpc_url, "Connected to upstream"),
        Err(err) => warn!(error = %err, "Could not read chain id at startup"),
    }

    // Live push channel
    let (events_tx, _) = broadcast::channel(api::EVENT_CHANNEL_CAPACITY);
    let sink: Arc<dyn EventSink> = Arc::new(BroadcastSink::new(events_tx.clone()));

    // Live tailer runs from the moment of subscription
    let tailer = LiveTailer::new(Arc::clone(&chain), Arc::clone(&store), contract)
        .with_poll_interval(settings.poll_interval());
    let tailer_shutdown = shutdown.clone();
    let tailer_task = tokio::spawn(async move {
        if let Err(err) = tailer.subscribe(sink, tailer_shutdown).await {
            error!(error = %err, "Live tailer failed");
        }
    });

    // Backfill sweeps history to the head captured at startup
    let backfill = BackfillEngine::new(
        Arc::clone(&chain),
        Arc::clone(&store),
        contract,
        settings.backfill_settings(),
    );
    let backfill_shutdown = shutdown.clone();
    let backfill_task = tokio::spawn(async move {
        if let Err(err) = backfill.run(backfill_shutdown).await {
            error!(error = %err, "Backfill failed");
        }
    });

    // API server
    let state = AppState {
        store: store as Arc<dyn EventStore>,
        events_tx,
        limiter: IpRateLimiter::new(
            settings.api_rate_limit_per_second,
            settings.api_rate_limit_burst,
        ),
    };
    let router = api::router(state);

    let bind_addr = format!("{}:{}", settings.api_host, settings.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Initialization(format!("failed to bind {bind_addr}: {e}")))?;
    info!(addr = %bind_addr, "API listening");

    // Signal-driven shutdown
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned())
    .await
    .map_err(|e| AppError::Initialization(format!("API server error: {e}")))?;

    shutdown.cancel();
    let _ = tailer_task.await;
    let _ = backfill_task.await;

    info!("Indexer stopped");
    Ok(())
}
