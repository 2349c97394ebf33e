//! 打字竞速服务端
//!
//! 用法: `race-server [config.toml]`

use anyhow::Result;
use race_protocol::NetworkConfig;
use race_server::GameHost;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("race_server=debug".parse()?)
                .add_directive("race_protocol=debug".parse()?),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => NetworkConfig::from_file(&path)?,
        None => NetworkConfig::default(),
    };

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut host = GameHost::from_config(&config).with_events(events_tx);

    let addr = host.start_hosting(config.game_port).await?;
    info!("Hosting '{}' on {}", config.server_name, addr);

    loop {
        tokio::select! {
            Some(event) = events_rx.recv() => {
                info!("{:?}", event);
            }

            // 监听 Ctrl+C 信号
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    host.stop_hosting().await;
    info!("Server shutdown complete");

    Ok(())
}
