//! `LendChat`: chat with the other side of a loan post from the terminal.
//!
//! Connects to a gateway, opens the private chat with `--with` about
//! `--post`, prints the history and every message that arrives, and sends
//! each line typed on stdin. Configuration via CLI flags, environment
//! variables, or config file (`~/.config/lendchat/config.toml`).
//!
//! ```bash
//! cargo run --bin lendchat -- --gateway-url ws://127.0.0.1:9100/ws \
//!     --identity lender-1 --username Lena --post post-7 --with borrower-9
//! ```

use std::io;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use lendchat::config::{CliArgs, ClientConfig};
use lendchat::services::remote::GatewayServices;
use lendchat::session::{ChatSession, SendOutcome, SessionUpdate};
use lendchat::transport::websocket::WsConnector;
use lendchat_proto::message::Message;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let target = config
        .chat_target()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    tracing::info!(
        gateway = %target.gateway_url,
        identity = %target.user.identity,
        post_id = %target.post_id,
        with = %target.with,
        "lendchat starting"
    );

    let services = GatewayServices::connect_with_timeouts(
        target.gateway_url.as_str(),
        &target.user.identity,
        config.connect_timeout,
        config.handshake_timeout,
    )
    .await
    .map_err(io::Error::other)?;
    let services = Arc::new(services);

    let connector = WsConnector::new(target.gateway_url.as_str())
        .with_timeouts(config.connect_timeout, config.handshake_timeout);
    let (session, mut notices) = ChatSession::new(
        connector,
        Arc::clone(&services),
        Arc::clone(&services),
        Arc::clone(&services),
        config.session,
    );
    session.set_current_user(Some(target.user.clone()));

    session.open().await;
    let room_id = session
        .open_chat(&target.with, &target.post_id)
        .await
        .map_err(io::Error::other)?;
    println!("-- chat with {} about {} (room {room_id})", target.with, target.post_id);

    // History is newest first; print it in reading order.
    for message in session.messages().iter().rev() {
        print_message(message, &config.timestamp_format);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                session.set_body(line);
                match session.send_message().await {
                    SendOutcome::Sent => {}
                    SendOutcome::NotOpen => eprintln!("-- not connected, message dropped"),
                    SendOutcome::Invalid(e) => eprintln!("-- message not sent: {e}"),
                    SendOutcome::NoUser | SendOutcome::Failed => {}
                }
            }
            update = session.process_next_event() => match update {
                Some(SessionUpdate::MessageReceived(message)) => {
                    print_message(&message, &config.timestamp_format);
                }
                Some(SessionUpdate::Opened) => println!("-- connected"),
                Some(SessionUpdate::Closed) => println!("-- disconnected"),
                Some(SessionUpdate::Failed(reason)) => println!("-- connection error: {reason}"),
                Some(SessionUpdate::Unchanged) => {}
                None => break,
            },
            Some(notice) = notices.recv() => eprintln!("-- {notice}"),
        }
    }

    tracing::info!("lendchat exiting");
    Ok(())
}

/// Initialize file-based logging.
///
/// Logs are written to a file so they don't interleave with the chat on
/// stdout. Returns a guard that must be held for the lifetime of the
/// program to ensure logs are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("lendchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

fn print_message(message: &Message, timestamp_format: &str) {
    let time = i64::try_from(message.created_at.as_millis())
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map_or_else(
            || message.created_at.to_string(),
            |t| {
                t.with_timezone(&chrono::Local)
                    .format(timestamp_format)
                    .to_string()
            },
        );
    println!("[{time}] {}: {}", message.username, message.body);
}
