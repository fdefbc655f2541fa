//! # loom-demo
//!
//! Demo server: serves a static directory at `/`, the RPC router at `/ws`,
//! `/health` and Prometheus `/metrics`, and broadcasts a periodic `tick`.

#![deny(unsafe_code)]

mod handlers;
mod logging;
mod settings;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::get;
use clap::Parser;
use loom_server::Loom;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::settings::Settings;

/// Loom RPC router demo server.
#[derive(Parser, Debug)]
#[command(name = "loom-demo", about = "Loom RPC router demo server")]
struct Cli {
    /// Settings file (JSON). Missing file means defaults.
    #[arg(long, env = "LOOM_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Directory served at `/`.
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (e.g. `debug`).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Command-line flags win over file and environment.
    fn apply(self, settings: &mut Settings) {
        if let Some(host) = self.host {
            settings.server.host = host;
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(dir) = self.static_dir {
            settings.server.static_dir = dir;
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load settings before logging: the log level comes from them
    let mut settings =
        settings::load_settings(cli.config.as_deref()).context("failed to load settings")?;
    cli.apply(&mut settings);

    logging::init_subscriber(&settings.logging.level, settings.logging.json);
    let metrics = telemetry::install_recorder()?;

    let mut loom = Loom::new(settings.loom.clone());
    handlers::register(&mut loom);
    loom.on_connect(|client| {
        info!(client_id = %client.id(), broadcast = client.broadcast_enabled(), "hello from new client");
    });
    loom.on_disconnect(|client| {
        info!(client_id = %client.id(), dropped = client.dropped_count(), "client left");
    });
    let loom = Arc::new(loom);

    let shutdown = CancellationToken::new();
    let ticker = (settings.demo.tick_interval_secs > 0).then(|| {
        tokio::spawn(handlers::run_ticker(
            loom.clone(),
            Duration::from_secs(settings.demo.tick_interval_secs),
            shutdown.clone(),
        ))
    });

    let app = loom
        .router()
        .route(
            "/metrics",
            get(move || {
                let metrics = metrics.clone();
                async move { metrics.render() }
            }),
        )
        .fallback_service(ServeDir::new(&settings.server.static_dir))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        addr = %listener.local_addr()?,
        ws_path = %settings.loom.path,
        static_dir = %settings.server.static_dir.display(),
        routes = ?loom.handlers().routes(),
        "loom demo listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(loom.clone(), shutdown.clone()))
        .await
        .context("server error")?;

    if let Some(ticker) = ticker {
        let _ = ticker.await;
    }
    info!("server stopped");
    Ok(())
}

/// Resolve on Ctrl-C, then stop the ticker and end every session.
async fn shutdown_signal(loom: Arc<Loom>, shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
    shutdown.cancel();
    loom.shutdown();
}
