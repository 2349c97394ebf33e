//! 打字竞速客户端
//!
//! 用法:
//! - `race-client join <host:port> <username> [config.toml]`
//! - `race-client discover [config.toml]`

use anyhow::{bail, Context, Result};
use race_client::{ClientEvent, ClientSession, DiscoveryConfig, DiscoveryListener, JoinOutcome};
use race_protocol::NetworkConfig;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: race-client join <host:port> <username> [config.toml]\n       race-client discover [config.toml]";

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("race_client=debug".parse()?)
                .add_directive("race_protocol=debug".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("join") => {
            let (Some(addr), Some(username)) = (args.get(1), args.get(2)) else {
                bail!(USAGE);
            };
            let config = load_config(args.get(3))?;
            join(&config, addr, username).await
        }
        Some("discover") => {
            let config = load_config(args.get(1))?;
            discover(&config).await
        }
        _ => bail!(USAGE),
    }
}

fn load_config(path: Option<&String>) -> Result<NetworkConfig> {
    match path {
        Some(path) => NetworkConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path)),
        None => Ok(NetworkConfig::default()),
    }
}

async fn join(config: &NetworkConfig, addr: &str, username: &str) -> Result<()> {
    let (host, port) = addr
        .rsplit_once(':')
        .context("address must be host:port")?;
    let port: u16 = port.parse().context("invalid port")?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut session = ClientSession::new(config.transport()).with_events(events_tx);

    let handshake = session
        .connect(host, port, username)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    match handshake.outcome().await? {
        JoinOutcome::Registered => info!("Joined {} as {}", addr, username),
        JoinOutcome::Denied(reason) => {
            warn!("Join denied: {}", reason);
            return Ok(());
        }
    }

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                match event {
                    Some(ClientEvent::Disconnected { reason }) => {
                        info!("Disconnected: {}", reason);
                        break;
                    }
                    Some(event) => info!("{:?}", event),
                    None => break,
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    session.close().await;
    Ok(())
}

async fn discover(config: &NetworkConfig) -> Result<()> {
    let mut listener = DiscoveryListener::new(DiscoveryConfig::from(config));
    let addr = listener.start().await?;
    info!("Looking for servers on {}", addr);

    let mut servers = listener.watch_servers();
    loop {
        tokio::select! {
            changed = servers.changed() => {
                if changed.is_err() {
                    break;
                }
                let list = listener.current_servers();
                info!("{} server(s) visible", list.len());
                for server in &list {
                    info!("  {} - {}", server.address, server.name);
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    listener.stop().await;
    Ok(())
}
