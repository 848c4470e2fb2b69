//! ripple - streaming chat client

mod commands;
mod config;
mod ui;
mod utils;

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use clap::Parser;
use ripple_client::{ClientConfig, ClientEvent, ClientHandle, WebSocketTransport};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

use commands::CommandResult;

/// ripple - chat with a streaming WebSocket backend
#[derive(Parser, Debug)]
#[command(name = "ripple")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Endpoint to connect to (default: ws://localhost:8080/ws)
    #[arg(short, long)]
    url: Option<String>,

    /// Send a single message, print the reply, and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Seconds to wait for the reply in --command mode
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Start interactive mode without connecting
    #[arg(long)]
    no_connect: bool,

    /// Automatic reconnect attempts before giving up
    #[arg(long)]
    max_reconnect_attempts: Option<u32>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("ripple=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        let path = config::Config::init().context("Error creating config")?;
        println!("Config file created at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let cfg = config::Config::load();

    // Merge config with CLI args (CLI takes precedence)
    let url = args
        .url
        .or(cfg.url.clone())
        .unwrap_or_else(|| ripple_client::DEFAULT_URL.to_string());
    ripple_client::websocket::validate_ws_url(&url)?;

    let mut reconnect = cfg.reconnect_policy();
    if let Some(max_attempts) = args.max_reconnect_attempts {
        reconnect.max_attempts = max_attempts;
    }
    tracing::debug!("Using endpoint {} with {:?}", url, reconnect);

    let client = ripple_client::spawn(
        ClientConfig {
            url: url.clone(),
            reconnect,
        },
        Arc::new(WebSocketTransport::new()),
    );

    if let Some(text) = args.command {
        return run_command(&client, &text, Duration::from_secs(args.timeout)).await;
    }

    let auto_connect = !args.no_connect && cfg.auto_connect.unwrap_or(true);
    run_interactive(&client, url, auto_connect).await
}

/// Connect, send one message, print the reply as it streams, and exit
async fn run_command(client: &ClientHandle, text: &str, timeout: Duration) -> anyhow::Result<()> {
    let mut events = client.subscribe();
    client.connect()?;

    let result = tokio::time::timeout(timeout, exchange(client, text, &mut events))
        .await
        .map_err(|_| anyhow!("No reply within {}s", timeout.as_secs()))
        .and_then(|r| r);

    client.disconnect().ok();
    result
}

async fn exchange(
    client: &ClientHandle,
    text: &str,
    events: &mut broadcast::Receiver<ClientEvent>,
) -> anyhow::Result<()> {
    client.wait_for_state(|s| s.is_connected()).await?;
    if !client.send_message(text).await {
        bail!("Message was not sent");
    }

    let mut streamed = false;
    loop {
        match events.recv().await {
            Ok(ClientEvent::MessageDelta { delta, .. }) => {
                streamed = true;
                print!("{}", delta);
                io::stdout().flush().ok();
            }
            Ok(ClientEvent::MessageFinalized { message }) => {
                if streamed {
                    println!();
                } else {
                    println!("{}", message.content);
                }
                return Ok(());
            }
            Ok(ClientEvent::Disconnected) => bail!("Connection closed before a reply arrived"),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Missed {} events", skipped);
            }
            Err(RecvError::Closed) => bail!("Client stopped"),
        }
    }
}

async fn run_interactive(
    client: &ClientHandle,
    mut url: String,
    auto_connect: bool,
) -> anyhow::Result<()> {
    if io::stderr().is_terminal() {
        eprintln!("ripple ({})", url);
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    let mut events = client.subscribe();
    let printer = tokio::spawn(async move {
        let mut printer = ui::EventPrinter::new();
        loop {
            match events.recv().await {
                Ok(event) => printer.print(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Display lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    if auto_connect {
        client.connect()?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let Some(result) = commands::execute_command(input) else {
            if !client.send_message(input).await {
                eprintln!("[Not connected; message kept locally. Use /connect to reconnect.]");
            }
            continue;
        };

        match result {
            CommandResult::Connect => {
                if client.is_connected() {
                    println!("Already connected to {}", url);
                } else {
                    client.connect()?;
                }
            }
            CommandResult::Disconnect => client.disconnect()?,
            CommandResult::ShowUrl => println!("{}", url),
            CommandResult::SetUrl(new_url) => match client.set_url(new_url.as_str()).await {
                Ok(()) => {
                    println!("Endpoint set to {} (used on next connect)", new_url);
                    url = new_url;
                }
                Err(e) => println!("{}", e),
            },
            CommandResult::Status => {
                println!("{} ({})", client.connection_state().label(), url);
                println!("{} messages", client.messages().len());
            }
            CommandResult::History => println!("{}", ui::format_history(&client.messages())),
            CommandResult::Clear => {
                client.clear_messages()?;
                println!("Started a new chat.");
            }
            CommandResult::Message(msg) => println!("{}", msg),
            CommandResult::Exit => break,
            CommandResult::Unknown(cmd) => {
                println!("Unknown command: /{}", cmd);
                println!("Type /help for available commands.");
            }
        }
    }

    client.disconnect().ok();
    printer.abort();
    Ok(())
}
