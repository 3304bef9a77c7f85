//! Demo server for interactive tasks over WebSocket.
//!
//! Run with: cargo run -p taskgate-server
//!
//! Then open http://localhost:3000 in your browser.

mod config;
mod work;

use std::sync::Arc;

use anyhow::Context;
use axum::{response::Html, routing::get, Router};
use taskgate_core::TaskHistory;
use taskgate_session::{
    storage::{JsonFileHistory, MemoryHistory},
    ConnectionRegistry,
};
use taskgate_transport::{create_router, UploadStore};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{config::ServerConfig, work::NotesWork};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    tracing::debug!(?config, "Loaded configuration");

    let history: Arc<dyn TaskHistory> = match &config.history_file {
        Some(path) => {
            let history = JsonFileHistory::open(path)
                .await
                .with_context(|| format!("Failed to open history at {}", path.display()))?
                .with_recent_limit(config.recent_dirs);
            tracing::info!("Task history stored in {}", path.display());
            Arc::new(history)
        }
        None => {
            tracing::info!("Task history kept in memory");
            Arc::new(MemoryHistory::with_recent_limit(config.recent_dirs))
        }
    };

    let uploads = UploadStore::new(&config.upload_dir);
    let registry = Arc::new(
        ConnectionRegistry::new(Arc::new(NotesWork::new(uploads.clone()))).with_history(history),
    );

    let app = Router::new()
        .route("/", get(index_handler))
        .merge(create_router(registry, uploads))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    tracing::info!("Server listening on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = include_str!("index.html");
