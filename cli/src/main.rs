// blemesh — command-line front end for the BLE mesh core
//
// Offline commands work directly against the local store. `simulate` spins
// up several nodes on an in-process radio to watch flooding happen.

mod config;

use anyhow::{Context, Result};
use blemesh_core::{
    EventSink, IdentityProvider, LoopbackAir, MeshHandle, MeshNode, MeshService, MessageEnvelope,
    MessageType, PeerRecord, PeerStatus, Recipient, RelayDecision, RouteOutcome, RouterEvent,
};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "blemesh")]
#[command(about = "BLE Mesh — offline flood messaging over advertisements", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter, overrides RUST_LOG and the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize storage and identity
    Init,
    /// Show identity information
    Identity {
        /// Replace the key pair and device id
        #[arg(long)]
        regenerate: bool,
    },
    /// Store a message for broadcast (offline mode)
    Send {
        message: String,
        /// Recipient device id; broadcast when omitted
        #[arg(long)]
        to: Option<String>,
    },
    /// View message history
    History {
        #[arg(short, long)]
        peer: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// List known peers
    Peers,
    /// Give a known peer a display name
    Rename { id: String, name: String },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run several nodes over an in-process radio
    Simulate {
        #[arg(short, long, default_value = "3")]
        nodes: usize,
        /// Link nodes in a line instead of all in range
        #[arg(long)]
        chain: bool,
        /// Times each radio reports every advertisement it hears
        #[arg(short, long, default_value = "5")]
        repeats: usize,
        #[arg(short, long, default_value = "Hello")]
        message: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let _guard = init_logging(
        cli.log_level.as_deref(),
        &config.log_level,
        cli.log_file.as_deref(),
    )?;

    match cli.command {
        Commands::Init => cmd_init(&config),
        Commands::Identity { regenerate } => cmd_identity(&config, regenerate),
        Commands::Send { message, to } => cmd_send_offline(&config, &message, to),
        Commands::History { peer, limit } => cmd_history(&config, peer, limit),
        Commands::Peers => cmd_peers(&config),
        Commands::Rename { id, name } => cmd_rename(&config, &id, &name),
        Commands::Config { action } => cmd_config(config, action),
        Commands::Simulate {
            nodes,
            chain,
            repeats,
            message,
        } => cmd_simulate(&config, nodes, chain, repeats, &message).await,
    }
}

fn init_logging(
    flag: Option<&str>,
    configured: &str,
    log_file: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let filter = match flag {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(configured)),
    };
    let stderr = fmt::layer().with_writer(std::io::stderr);

    let Some(path) = log_file else {
        tracing_subscriber::registry().with(filter).with(stderr).init();
        return Ok(None);
    };

    let file_name = path.file_name().context("Log file path has no file name")?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Ok(Some(guard))
}

fn open_node(config: &config::Config) -> Result<MeshNode> {
    let storage = config.storage_dir()?;
    MeshNode::open(&storage)
        .with_context(|| format!("Failed to open storage at {}", storage.display()))
}

fn cmd_init(config: &config::Config) -> Result<()> {
    println!("{}", "Initializing BLE Mesh...".bold());
    println!();
    println!(
        "  {} Configuration: {}",
        "✓".green(),
        config::Config::config_file()?.display()
    );

    let node = open_node(config)?;
    println!("  {} Storage: {}", "✓".green(), config.storage_dir()?.display());
    println!("  {} Identity ready", "✓".green());
    println!();

    print_identity(&node);
    println!();
    println!("{}", "Next steps:".bold());
    println!(
        "  • Send a message:  {}",
        "blemesh send \"hi\"".bright_green()
    );
    println!(
        "  • Try the mesh:    {}",
        "blemesh simulate --nodes 3".bright_green()
    );
    Ok(())
}

fn cmd_identity(config: &config::Config, regenerate: bool) -> Result<()> {
    let mut node = open_node(config)?;
    if regenerate {
        let previous = node.device_id().to_string();
        node.regenerate_identity().context("Failed to regenerate identity")?;
        info!("Identity regenerated, was {}", previous);
        println!("{} Replaced identity {}", "✓".green(), previous.dimmed());
    }
    print_identity(&node);
    Ok(())
}

fn print_identity(node: &MeshNode) {
    println!("{}", "Identity Information".bold());
    println!("  Device ID:  {}", node.device_id().bright_cyan());
    println!(
        "  Public Key: {}",
        node.identity().public_key_hex().bright_yellow()
    );
}

fn cmd_send_offline(config: &config::Config, message: &str, to: Option<String>) -> Result<()> {
    let node = open_node(config)?;
    let (events, _rx) = EventSink::channel();
    let mut router = node.router(config.mesh.clone(), events)?;

    let receiver = to
        .as_deref()
        .map(Recipient::parse)
        .unwrap_or(Recipient::Broadcast);
    let now = blemesh_core::current_timestamp_ms();
    let outcome = router
        .send_message(message, receiver, MessageType::Text, now)
        .context("Failed to store message")?;

    let RouteOutcome::Accepted { envelope, relay } = outcome else {
        anyhow::bail!("Message was not accepted");
    };
    info!("Stored outgoing {} for {}", envelope.id, envelope.receiver);
    println!(
        "{} Stored {} (ttl {})",
        "✓".green(),
        envelope.id.bright_cyan(),
        envelope.ttl
    );
    match relay {
        RelayDecision::Broadcast(bytes) => println!(
            "  Ready to advertise: {} ({} bytes)",
            String::from_utf8_lossy(&bytes).bright_yellow(),
            bytes.len()
        ),
        RelayDecision::TooLarge { len } => println!(
            "  {} Too long for one advertisement ({} bytes), kept locally",
            "!".yellow(),
            len
        ),
        RelayDecision::TtlExhausted | RelayDecision::Unencodable => {
            println!("  Not relayed")
        }
    }
    Ok(())
}

fn cmd_history(config: &config::Config, peer: Option<String>, limit: usize) -> Result<()> {
    let node = open_node(config)?;
    let messages = node.storage().message_store();
    let peers = node.storage().peer_store();

    let list = match &peer {
        Some(peer) => messages
            .conversations(node.device_id())?
            .remove(&peer.to_ascii_uppercase())
            .unwrap_or_default(),
        None => messages.all()?,
    };

    if list.is_empty() {
        println!("No messages.");
        return Ok(());
    }

    for msg in list.iter().take(limit) {
        let from = if msg.sender_id == node.device_id() {
            "me".bright_green().to_string()
        } else {
            peers
                .get(&msg.sender_id)?
                .map(|p| p.name)
                .unwrap_or_else(|| msg.sender_id.clone())
                .bright_cyan()
                .to_string()
        };
        print_message(msg, &from);
    }
    Ok(())
}

fn print_message(msg: &MessageEnvelope, from: &str) {
    println!(
        "{} {} → {}: {} {}",
        format_timestamp(msg.timestamp).dimmed(),
        from,
        msg.receiver,
        msg.content,
        format!("[ttl {} hops {}]", msg.ttl, msg.hops).dimmed()
    );
}

fn cmd_peers(config: &config::Config) -> Result<()> {
    let node = open_node(config)?;
    let peers = node.storage().peer_store().all()?;
    if peers.is_empty() {
        println!("No peers seen yet.");
        return Ok(());
    }
    for peer in &peers {
        print_peer(peer);
    }
    Ok(())
}

fn print_peer(peer: &PeerRecord) {
    let status = match peer.status {
        PeerStatus::Connected => "connected".green(),
        PeerStatus::Disconnected => "disconnected".red(),
    };
    println!(
        "  • {} {} {} (last seen {})",
        peer.id.bright_cyan(),
        peer.name.bold(),
        status,
        format_timestamp(peer.last_seen)
    );
}

fn cmd_rename(config: &config::Config, id: &str, name: &str) -> Result<()> {
    let node = open_node(config)?;
    let (events, _rx) = EventSink::channel();
    let mut router = node.router(config.mesh.clone(), events)?;
    let peer = router
        .rename_peer(&id.to_ascii_uppercase(), name)
        .with_context(|| format!("Unknown peer: {}", id))?;
    println!("{} {} is now {}", "✓".green(), peer.id, peer.name.bold());
    Ok(())
}

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} {} = {}", "✓".green(), key, value);
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("Unknown config key: {}", key),
        },
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            for (key, value) in config.list() {
                println!("  {:<26} {}", key, value.bright_cyan());
            }
        }
    }
    Ok(())
}

async fn cmd_simulate(
    config: &config::Config,
    nodes: usize,
    chain: bool,
    repeats: usize,
    message: &str,
) -> Result<()> {
    if nodes < 2 {
        anyhow::bail!("Need at least two nodes to simulate");
    }

    let mut mesh = config.mesh.clone();
    mesh.housekeeping_interval_ms = mesh.housekeeping_interval_ms.min(200);

    info!(
        "Simulating {} nodes ({}), {} repeats per frame",
        nodes,
        if chain { "chain" } else { "all in range" },
        repeats
    );
    let air = LoopbackAir::new();
    let names: Vec<String> = (0..nodes).map(|i| format!("node-{}", i)).collect();
    if chain {
        for pair in names.windows(2) {
            air.link(&pair[0], &pair[1]);
        }
    }

    println!("{}", "Starting simulated mesh...".bold());
    let mut handles: Vec<(String, MeshHandle)> = Vec::new();
    for name in &names {
        let node = MeshNode::in_memory();
        let (events, mut rx) = EventSink::channel();
        let router = node.router(mesh.clone(), events)?;
        let radio = Arc::new(air.radio(name).with_repeats(repeats));
        let handle = MeshService::start(router, radio).await?;

        let label = name.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let RouterEvent::NewMessage(msg) = event {
                    println!(
                        "  {} {} stored {} from {}",
                        "←".bright_blue(),
                        label,
                        msg.content.bright_yellow(),
                        msg.sender_id
                    );
                }
            }
        });

        println!(
            "  {} {} is {}",
            "✓".green(),
            name,
            handle.device_id().bright_cyan()
        );
        handles.push((name.clone(), handle));
    }

    // Let presence advertisements settle
    tokio::time::sleep(Duration::from_millis(500)).await;

    let (origin, sender) = &handles[0];
    println!();
    println!("{} {} sends {:?}", "→".bright_green(), origin, message);
    sender
        .send_message(message, Recipient::Broadcast, MessageType::Text)
        .await
        .context("Send failed")?;

    tokio::time::sleep(Duration::from_millis(1_000)).await;

    println!();
    println!("{}", "Results".bold());
    for (name, handle) in &handles {
        let messages = handle.messages().await?;
        let peers = handle.peers().await?;
        debug!("{} holds {} messages", handle.device_id(), messages.len());
        println!(
            "  {:<8} {} messages, {} peers",
            name,
            messages.len(),
            peers.len()
        );
    }

    for (name, handle) in &handles {
        if let Err(e) = handle.shutdown().await {
            warn!("Failed to stop {}: {}", name, e);
        }
    }
    Ok(())
}

fn format_timestamp(timestamp_ms: u64) -> String {
    use chrono::{DateTime, Local, Utc};

    let dt = DateTime::from_timestamp_millis(timestamp_ms as i64).unwrap_or_else(Utc::now);
    let local: DateTime<Local> = dt.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}
