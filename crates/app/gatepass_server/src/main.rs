//! Gatepass API server binary.
//!
//! Serves the HTTP API over PostgreSQL when a database URL is configured, or
//! over the in-memory store otherwise.

use std::sync::Arc;

use clap::Parser;
use gatepass_api::AppState;
use gatepass_api::config::ApiConfig;
use gatepass_core::GateEngine;
use gatepass_core::config::EngineConfig;
use gatepass_core::store::{GateStore, MemoryStore, PgStore};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "gatepass_server", about = "Gatepass API server")]
struct Args {
    /// Port to listen on on 127.0.0.1; overrides `BIND_ADDR` (0 = ephemeral).
    #[arg(long)]
    port: Option<u16>,

    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 10)]
    max_connections: u32,

    /// Use the in-memory store even if a database URL is set. State is lost on
    /// exit.
    #[arg(long, default_value_t = false)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,gatepass_api=debug,gatepass_core=debug")
            }),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env();
    if let Some(port) = args.port {
        config.bind_addr = format!("127.0.0.1:{port}");
    }
    config.database_url = args.database_url.filter(|_| !args.memory);

    let store: Arc<dyn GateStore> = match &config.database_url {
        Some(url) => {
            info!(
                max_connections = args.max_connections,
                "configuring connection pool"
            );
            let pool = PgPoolOptions::new()
                .max_connections(args.max_connections)
                .acquire_timeout(std::time::Duration::from_secs(30))
                .connect(url)
                .await?;

            info!("running database migrations");
            gatepass_core::migrate::migrate(&pool).await?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            warn!("no database configured, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let engine_config = EngineConfig::from_env();
    info!(
        token_ttl_secs = engine_config.token_ttl.num_seconds(),
        campus_offset = %engine_config.campus_offset,
        "engine configured"
    );
    let state = AppState {
        engine: GateEngine::new(store, engine_config),
        config: config.clone(),
    };

    let app = gatepass_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "REST API listening");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
            }
            shutdown.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
