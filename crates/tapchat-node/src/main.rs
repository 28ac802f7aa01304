//! tapchat -- one-to-one proximity chat over the local network.
//!
//! Usage:
//!   tapchat                       # Chat with default config
//!   tapchat --name Alice run      # Chat as Alice
//!   tapchat peers                 # Browse once and print peers as JSON
//!   tapchat config                # Print the effective config

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tapchat_node::config::NodeConfig;
use tapchat_node::console::run_console;
use tapchat_node::lan_discovery::browse;
use tapchat_node::{expand_tilde, AppContext, LanDiscovery, DEFAULT_CONFIG_PATH};
use tapchat_session::spawn_session;
use tokio::io::BufReader;

#[derive(Parser)]
#[command(name = "tapchat", about = "One-to-one proximity chat")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Display name announced to peers (overrides config and TAPCHAT_NAME)
    #[arg(short, long)]
    name: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start discovery and chat (default)
    Run,
    /// Browse the network once and list peers
    Peers,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with the chat on stdout
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tapchat_node=info,tapchat_session=info".into());
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = expand_tilde(&cli.config);
    let mut cfg = NodeConfig::load_or_default(&config_path)?;
    cfg.apply_env();
    if let Some(name) = &cli.name {
        cfg.set_name(name);
    }

    match cli.command {
        Some(Commands::Run) | None => run_chat(cfg).await?,
        Some(Commands::Peers) => list_peers(cfg).await?,
        Some(Commands::Config) => print!("{}", toml::to_string_pretty(&cfg)?),
    }

    Ok(())
}

async fn run_chat(cfg: NodeConfig) -> anyhow::Result<()> {
    let adapter = Arc::new(LanDiscovery::bind(cfg.lan_config()?).await?);
    tracing::info!(name = %cfg.node.name, addr = %adapter.local_addr()?, "tapchat starting");

    let (session, task) = spawn_session(adapter, cfg.session_config());
    let mut ctx = AppContext::new(cfg, session);
    let stdin = BufReader::new(tokio::io::stdin());

    tokio::select! {
        result = run_console(&mut ctx, stdin, std::io::stdout()) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down...");
            ctx.session.stop().await?;
        }
    }

    // Last handle gone: the session task winds down on its own
    drop(ctx);
    let _ = task.await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn list_peers(cfg: NodeConfig) -> anyhow::Result<()> {
    // Probe without binding the chat sockets, so this works next to a running node
    let lan = cfg.lan_config()?;
    let peers = browse(rand::random(), &lan.browse_targets, lan.browse_timeout).await?;
    println!("{}", serde_json::to_string_pretty(&peers)?);
    Ok(())
}
