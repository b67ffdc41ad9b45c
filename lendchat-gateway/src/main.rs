//! `LendChat` gateway: WebSocket endpoint for chat sessions and services.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin lendchat-gateway
//!
//! # Run on custom address
//! cargo run --bin lendchat-gateway -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! GATEWAY_ADDR=127.0.0.1:8080 cargo run --bin lendchat-gateway
//! ```

use std::sync::Arc;

use clap::Parser;
use lendchat_gateway::config::{GatewayCliArgs, GatewayConfig};
use lendchat_gateway::gateway::{self, GatewayState};
use lendchat_gateway::rooms::RoomDirectory;
use lendchat_gateway::store::MessageLog;

#[tokio::main]
async fn main() {
    let cli = GatewayCliArgs::parse();

    let config = match GatewayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting lendchat gateway");

    let state = Arc::new(GatewayState::with_config(
        config.limits.max_payload_size,
        RoomDirectory::with_max_rooms(config.limits.max_rooms),
        MessageLog::with_max_room_history(config.limits.max_room_history),
    ));

    match gateway::start_server_with_state(&config.bind_addr.to_string(), state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "gateway listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "gateway task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start gateway");
            std::process::exit(1);
        }
    }
}
