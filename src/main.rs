use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use content_gateway::config::GatewayConfig;
use content_gateway::content::MemoryContentStore;
use content_gateway::dispatch::Dispatcher;
use content_gateway::identity::MemoryDirectory;
use content_gateway::rate_limit::RateLimiter;
use content_gateway::server::{build_router, GatewayState};
use content_gateway::metrics;

#[derive(Parser)]
#[command(
    name = "content-gateway",
    version,
    about = "Permission-gated RPC gateway for a content store"
)]
struct Cli {
    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway server
    Serve {
        /// Listen port (overrides config)
        #[arg(long)]
        port: Option<u16>,
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,
        /// Path to a JSON config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Path to the identities JSON file (overrides config)
        #[arg(long)]
        identities: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Serve {
            port,
            bind,
            config,
            identities,
        } => serve(port, bind, config, identities).await,
    }
}

async fn serve(
    port: Option<u16>,
    bind: Option<String>,
    config_file: Option<PathBuf>,
    identities: Option<PathBuf>,
) -> Result<()> {
    let mut config = GatewayConfig::load(config_file.as_deref())
        .map_err(|err| anyhow::anyhow!(err.to_string()))
        .context("failed to load configuration")?;
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(bind) = bind {
        config.bind = bind;
    }
    if let Some(path) = identities {
        config.identities_file = Some(path);
    }

    let directory = match &config.identities_file {
        Some(path) => {
            let directory = MemoryDirectory::load_from_file(path)
                .map_err(|err| anyhow::anyhow!(err.to_string()))
                .with_context(|| format!("failed to load identities from {}", path.display()))?;
            info!(entries = directory.len(), path = %path.display(), "identity directory loaded");
            directory
        }
        None => {
            warn!("no identities file configured, every authentication will fail");
            MemoryDirectory::default()
        }
    };

    metrics::register_metrics();

    let limiter = Arc::new(RateLimiter::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(directory),
        Arc::new(MemoryContentStore::new()),
        limiter.clone(),
        config.limits,
        config.debug,
    ));
    let state = GatewayState::new(dispatcher, config.upload_max_bytes);
    state.health.mark_live();

    spawn_reaper(limiter, config.limits.retention_secs, config.limits.reap_interval_secs);

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.bind, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "gateway listening");
    state.health.mark_ready();

    let router = build_router(state);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server exited with error")?;

    Ok(())
}

fn spawn_reaper(limiter: Arc<RateLimiter>, retention_secs: u64, interval_secs: u64) {
    if interval_secs == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = limiter.reap(Duration::from_secs(retention_secs));
            if removed > 0 {
                info!(removed, "reaped idle rate windows");
            }
        }
    });
}
