//! Blighted Scroll - a Telegram bot keeping one living list per chat
//!
//! Each chat has a single "scroll" message. Replying to it appends an item;
//! the old scroll is deleted and a fresh one posted at the bottom of the chat.

mod anchor;
mod config;
mod render;
mod runtime;
mod state_machine;
mod store;
mod transport;

use config::Config;
use runtime::RuntimeManager;
use state_machine::ScrollContext;
use std::sync::Arc;
use store::{JsonFileBackend, Store};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{LoggingTransport, TelegramTransport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is fine; the environment may already be populated
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blighted_scroll=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(config = ?config, "Configuration loaded");

    let store = Arc::new(Store::load(JsonFileBackend::new(config.data_path.clone())).await?);

    let mut telegram =
        TelegramTransport::new(&config.auth_token, &config.api_base, config.poll_timeout)?;
    let username = telegram.identify().await?;
    tracing::info!(bot = %username, "Connected to Telegram");
    let telegram = Arc::new(telegram);
    let transport = Arc::new(LoggingTransport::new(telegram.clone()));

    let manager = RuntimeManager::new(
        store,
        transport,
        ScrollContext::new(config.auto_delete_replies),
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown requested");
        signal.cancel();
    });

    tracing::info!("Blighted Scroll polling for updates");
    manager.run_polling(telegram.as_ref(), shutdown).await;
    manager.shutdown().await;

    Ok(())
}
