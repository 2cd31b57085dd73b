use anyhow::{anyhow, Context, Result};
use clap::Parser;
use portgate::{AgentConfig, M2mManager, PortForwardManager, TcpTransport};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "portgate-agent", about = "Port-forwarding agent for managed devices")]
struct AgentArgs {
    /// Path to the agent configuration file
    #[arg(long, default_value = "portgate.toml")]
    config: PathBuf,

    /// Override the control-channel address, e.g. "127.0.0.1:8443"
    #[arg(long)]
    server: Option<String>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// `host:port` the control channel connects to, taken from the channel URL
/// unless overridden on the command line.
fn control_addr(config: &AgentConfig) -> Result<String> {
    let rest = config
        .channel_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(&config.channel_url);
    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.is_empty() {
        return Err(anyhow!("no host in channel_url '{}'", config.channel_url));
    }
    Ok(if authority.contains(':') {
        authority.to_string()
    } else {
        format!("{authority}:8000")
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AgentArgs::parse();
    portgate::logging::init(args.verbose);

    let config = AgentConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let registry = config.registry().context("invalid service configuration")?;
    let tunnel_host = config.tunnel_host()?;

    let manager = PortForwardManager::init(
        Arc::new(TcpTransport),
        registry,
        config.local_host.clone(),
        tunnel_host,
    );
    let m2m = M2mManager::new(
        config.channel_url.clone(),
        config.serial.clone(),
        Arc::clone(&manager),
    );

    let addr = match args.server {
        Some(server) => server,
        None => control_addr(&config)?,
    };
    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect control channel at {addr}"))?;
    info!(addr = %addr, serial = %m2m.identity(), "control channel connected");

    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        tokio::select! {
            read = reader.read_line(&mut line) => {
                match read {
                    Ok(0) => {
                        info!("control channel closed by peer");
                        break;
                    }
                    Ok(_) => {
                        let raw = line.trim();
                        if raw.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(raw) {
                            Ok(instruction) => {
                                let sender = instruction
                                    .get("sender")
                                    .and_then(Value::as_str)
                                    .unwrap_or("control-plane")
                                    .to_string();
                                m2m.on_instruction(&sender, instruction).await;
                            }
                            Err(e) => warn!(error = %e, "undecodable instruction, ignoring"),
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "control channel read error");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
        }
    }

    manager.shutdown();
    Ok(())
}
