//! Shopchat relay server -- lightweight conversation message relay.
//!
//! An axum WebSocket server that accepts message submissions, assigns
//! server identifiers, and broadcasts accepted messages to every subscriber
//! of the conversation, the submitter included.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin shopchat-relay
//!
//! # Run on custom address
//! cargo run --bin shopchat-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! SHOPCHAT_RELAY_ADDR=127.0.0.1:8080 cargo run --bin shopchat-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use shopchat_relay::config::{RelayCliArgs, RelayConfig};
use shopchat_relay::history::HistoryStore;
use shopchat_relay::relay::{self, RelayState};

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level; log to a file when
    // one is configured, stderr otherwise. The appender guard must outlive
    // the server so buffered log lines are flushed on exit.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    let _appender_guard = match &config.log_file {
        Some(path) => {
            let directory = path.parent().unwrap_or(std::path::Path::new("."));
            let file_name = path.file_name().unwrap_or(std::ffi::OsStr::new("relay.log"));
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
            None
        }
    };

    tracing::info!(addr = %config.bind_addr, "starting shopchat relay server");

    let history = HistoryStore::with_max_per_conversation(config.max_history_per_conversation);
    let state = Arc::new(RelayState::with_history(history));

    match relay::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
