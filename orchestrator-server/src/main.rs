//! Orchestrator server - HTTP API and event stream over the orchestrator
//! library.

mod routes;
mod sse;
mod state;
mod ticker;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use orchestrator::io::config::load_config;
use orchestrator::io::init::OrchestratorPaths;
use orchestrator::io::store::StoreHealth;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "orchestrator-server")]
#[command(about = "HTTP API and event stream for the project orchestrator")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Project root (contains .orchestrator/)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Advance active projects every N seconds; off when unset
    #[arg(long)]
    heartbeat_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("orchestrator_server=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let root = args.root.canonicalize().unwrap_or(args.root);
    info!(root = %root.display(), "starting orchestrator-server");

    let paths = OrchestratorPaths::new(&root);
    let config = load_config(&paths.config_path)?;
    let state = AppState::open(root, config).await?;
    if let StoreHealth::Degraded { reason } = &state.health {
        warn!(%reason, "store degraded, changes will not persist");
    }

    if let Some(secs) = args.heartbeat_secs.filter(|secs| *secs > 0) {
        ticker::start_heartbeat(state.clone(), Duration::from_secs(secs));
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", routes::api_router())
        .route("/events", get(sse::events_handler))
        .layer(cors)
        .with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    state.close().await;
    Ok(())
}
