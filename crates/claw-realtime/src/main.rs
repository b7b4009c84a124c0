//! claw-realtime - realtime connection client
//!
//! Connects to a realtime endpoint and either watches lifecycle events and
//! messages or sends a single payload.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use claw_realtime::{
    BroadcastBus, BusEvent, ClientConfig, EventBus, LifecycleEvent, RealtimeClient, StartOutcome,
    StaticTokenGate,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "claw-realtime")]
#[command(about = "Resilient realtime WebSocket client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Connection options shared by subcommands.
#[derive(clap::Args)]
struct ConnectArgs {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Explicit WebSocket address, overrides the origin
    #[arg(long)]
    address: Option<String>,

    /// Origin of the hosting application
    #[arg(long)]
    origin: Option<String>,

    /// Session token
    #[arg(long, env = "CLAW_REALTIME_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

impl ConnectArgs {
    fn load(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ClientConfig::default(),
        };
        if let Some(origin) = &self.origin {
            config = config.with_origin(origin.clone());
        }
        if let Some(address) = &self.address {
            config = config.with_address(address.clone());
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print lifecycle events and messages until interrupted
    Watch {
        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Connect, send one JSON payload, and close
    Send {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Payload to send, e.g. '{"channel":"chat","body":"hi"}'
        payload: String,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "realtime.json")]
        output: PathBuf,

        /// Origin of the hosting application
        #[arg(long, default_value = "https://localhost")]
        origin: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("claw_realtime=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch { connect } => watch(connect).await?,
        Commands::Send { connect, payload } => send(connect, payload).await?,
        Commands::InitConfig { output, origin } => init_config(output, origin)?,
    }

    Ok(())
}

fn connect_client(args: &ConnectArgs) -> (RealtimeClient, Arc<BroadcastBus>) {
    let bus = Arc::new(BroadcastBus::default());
    let gate = Arc::new(StaticTokenGate::new(args.token.clone()));
    let client = RealtimeClient::new(gate, Arc::clone(&bus) as Arc<dyn EventBus>);
    (client, bus)
}

async fn watch(args: ConnectArgs) -> anyhow::Result<()> {
    let config = args.load()?;
    let (client, bus) = connect_client(&args);
    let mut events = bus.subscribe();

    // Opening is reported on the bus; the start future is not needed here.
    drop(client.start(config)?);
    info!("watching, press Ctrl-C to stop");

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(published) => {
                    let terminal = print_event(&published.channel, &published.event);
                    if terminal {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event consumer lagging"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, closing");
                client.close()?;
                break;
            }
        }
    }

    Ok(())
}

/// Print one event. Returns whether no more events will follow.
fn print_event(channel: &str, event: &BusEvent) -> bool {
    match event {
        BusEvent::Lifecycle(LifecycleEvent::Reconnecting { attempt, delay, .. }) => {
            println!("[{channel}] attempt {attempt} in {}ms", delay.as_millis());
            false
        }
        BusEvent::Lifecycle(LifecycleEvent::Disconnected { cause }) => {
            println!("[{channel}] {cause}");
            false
        }
        BusEvent::Lifecycle(LifecycleEvent::ConnectionLost { reason }) => {
            println!("[{channel}] {reason:?}");
            true
        }
        BusEvent::Lifecycle(lifecycle) => {
            println!("[{channel}]");
            lifecycle.is_terminal()
        }
        BusEvent::Message(message) => {
            match serde_json::to_string(message) {
                Ok(json) => println!("[{channel}] {json}"),
                Err(e) => warn!(error = %e, "cannot render message"),
            }
            false
        }
    }
}

async fn send(args: ConnectArgs, payload: String) -> anyhow::Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(&payload).context("payload must be valid JSON")?;

    let mut config = args.load()?;
    config.reconnection.enabled = false;
    let (client, _bus) = connect_client(&args);

    match client.start(config)?.await {
        StartOutcome::Opened => {}
        other => anyhow::bail!("connection did not open: {other:?}"),
    }

    client.send(&value)?;
    info!("payload sent");
    client.close()?;
    client.closed().await;
    Ok(())
}

fn init_config(output: PathBuf, origin: String) -> anyhow::Result<()> {
    let config = ClientConfig::default().with_origin(origin);
    config.validate()?;

    std::fs::write(&output, config.to_json_pretty()?)
        .with_context(|| format!("writing {}", output.display()))?;

    println!("Config written to {}", output.display());
    println!();
    println!("Then run:");
    println!("  claw-realtime watch --config {}", output.display());

    Ok(())
}
