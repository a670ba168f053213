//! Interactive chat client over a resilient connection.
//!
//! Demonstrates:
//! - Building an orchestrator for chat and notification hubs
//! - Following a credential store for token rotation
//! - Connectivity and error callbacks
//! - Typed chat and notification subscriptions
//! - Sending while offline (calls are queued and flushed on reconnect)
//!
//! Usage:
//!   cargo run --example chat_client -- --chat wss://host/hubs/chat --token TOKEN
//!   cargo run --example chat_client -- --chat ws://localhost:5000/hubs/chat \
//!       --notifications ws://localhost:5000/hubs/notifications --token TOKEN --debug
//!
//! Type `to <user> <text>` to send a private message, `read-all` to mark
//! notifications read, `status` for a snapshot and `quit` to exit.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use anyhow::{Context, bail};
use realtime_link::{
    ConnectionOrchestrator, Credential, CredentialStore, InitOptions, SessionOptions,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Arguments
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
struct Args {
    chat: Option<String>,
    notifications: Option<String>,
    token: Option<String>,
    debug: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = Self::default();
        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--chat" => args.chat = iter.next(),
                "--notifications" => args.notifications = iter.next(),
                "--token" => args.token = iter.next(),
                "--debug" => args.debug = true,
                _ => {}
            }
        }
        args
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "realtime_link=debug"
    } else {
        "realtime_link=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    println!("=== Realtime Link: Chat Client ===\n");

    let token = args.token.clone().context("--token is required")?;
    if args.chat.is_none() && args.notifications.is_none() {
        bail!("at least one of --chat or --notifications is required");
    }

    // ========================================================================
    // Build
    // ========================================================================

    let mut builder = ConnectionOrchestrator::builder()
        .chat_options(SessionOptions::chat().with_status_log_interval(Duration::from_secs(60)));
    if let Some(url) = &args.chat {
        builder = builder.chat_endpoint(url);
    }
    if let Some(url) = &args.notifications {
        builder = builder.notifications_endpoint(url);
    }
    let orchestrator = builder.build()?;

    orchestrator.on_connectivity_change(|name, online| {
        println!("[{name}] {}", if online { "online" } else { "offline" });
    });
    orchestrator.on_error(|name, error| {
        println!("[{name}] error: {error}");
    });

    if let Some(chat) = orchestrator.chat() {
        chat.on_message(|message| {
            println!("<{}> {}", message.sender_id, message.content);
            Ok(())
        });
    }
    if let Some(notifications) = orchestrator.notifications() {
        notifications.on_notification(|notification| {
            let text = notification.message().unwrap_or("(no message)");
            println!("[notification] {}: {text}", notification.kind);
            Ok(())
        });
    }

    // ========================================================================
    // Connect
    // ========================================================================

    let store = CredentialStore::with_credential(Credential::new(&token));
    orchestrator.watch_credentials(&store);

    let options = InitOptions {
        enable_chat: args.chat.is_some(),
        enable_notifications: args.notifications.is_some(),
    };
    let status = orchestrator.initialize(Credential::new(&token), options).await?;
    println!("[Connect] state: {}\n", status.state);

    // ========================================================================
    // Input Loop
    // ========================================================================

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line.split_once(' ') {
            _ if line == "quit" => break,
            _ if line == "status" => {
                println!("{}", serde_json::to_string_pretty(&orchestrator.status())?);
            }
            _ if line == "read-all" => match orchestrator.notifications() {
                Some(notifications) => notifications.mark_all_as_read().await?,
                None => println!("notifications not configured"),
            },
            Some(("token", value)) => store.set(Credential::new(value)),
            Some(("to", rest)) => {
                let Some((user, text)) = rest.split_once(' ') else {
                    println!("usage: to <user> <text>");
                    continue;
                };
                let Some(chat) = orchestrator.chat() else {
                    println!("chat not configured");
                    continue;
                };
                // Resolves once delivered, possibly after a reconnect.
                match chat.send_private_message(user, text).await {
                    Ok(_) => println!("        ✓ sent"),
                    Err(e) => println!("        ✗ {e}"),
                }
            }
            _ => println!("commands: to <user> <text> | token <value> | read-all | status | quit"),
        }
    }

    orchestrator.disconnect().await;
    println!("\n=== Done ===");
    Ok(())
}
