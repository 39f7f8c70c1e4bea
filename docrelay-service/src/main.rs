use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

mod api;
mod config;
mod error;
mod extraction;
mod intake;
mod response;
mod service;
mod storage;

use crate::config::load_config;
use crate::service::RelayService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!("Starting docrelay service v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Configuration loaded"
    );

    // Working directories for uploads and extraction output
    std::fs::create_dir_all(&config.storage.uploads_dir)?;
    std::fs::create_dir_all(&config.storage.outputs_dir)?;
    std::fs::create_dir_all(&config.storage.scratch_dir)?;

    // Fails on missing credentials before anything is served
    let service = Arc::new(RelayService::new(&config)?);
    info!(
        extraction = %config.extraction.base_url,
        dropbox_namespace = %config.dropbox.namespace,
        "Service initialized"
    );

    let app = api::router(service, &config);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("docrelay_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
