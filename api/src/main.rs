//! Pentest API server and run follower.

mod client;
mod error;
mod routes;
mod sse;
mod state;
mod views;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use pentest_runner::core::cursor::ClientCursor;
use pentest_runner::follow::follow_run;
use pentest_runner::io::config::load_config;
use pentest_runner::io::http_probe::HttpProbeFactory;
use pentest_runner::logging;
use pentest_runner::registry::RunRegistry;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::client::HttpSnapshotSource;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "pentest")]
#[command(about = "Run login-form penetration tests and stream their progress")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the test API
    Serve(ServeArgs),
    /// Follow a test on a running server until it finishes
    Watch(WatchArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Engine configuration file
    #[arg(long, default_value = "pentest.toml")]
    config: PathBuf,

    /// Directory containing static UI files
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

#[derive(Args)]
struct WatchArgs {
    /// Test id returned by `POST /tests`
    test_id: String,

    /// Base URL of the API server
    #[arg(long, default_value = "http://127.0.0.1:3001/")]
    server: String,

    /// Engine configuration file (follower cadence)
    #[arg(long, default_value = "pentest.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("pentest_api=info,pentest_runner=info");

    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Watch(args) => watch(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    let executors = HttpProbeFactory::new(config.probe.clone())?;
    let registry = RunRegistry::new(Arc::new(executors), config.driver_config());
    let state = AppState::new(registry, config.stream_keep_alive());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = routes::api_router().layer(cors).with_state(state);

    if let Some(ui_dir) = args.ui_dir {
        if ui_dir.exists() {
            info!(ui_dir = %ui_dir.display(), "serving static UI files");
            app = app.fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
        } else {
            info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
        }
    }

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .context("parse bind address")?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn watch(args: WatchArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    let source = HttpSnapshotSource::new(&args.server, &args.test_id)?;
    info!(url = %source.url(), "following test");

    let mut cursor = ClientCursor::new();
    let run = follow_run(&source, &mut cursor, &config.follow_config(), |event| {
        println!(
            "[{}] {} {:?}: {}",
            event.sequence,
            event.timestamp.format("%H:%M:%S"),
            event.event_type,
            event.message
        );
    })
    .await;

    println!(
        "test {} {} ({} findings, {} events)",
        run.id,
        run.status,
        run.findings.len(),
        cursor.last_seq
    );
    Ok(())
}
