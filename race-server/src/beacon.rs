//! 局域网广播信标
//!
//! 托管期间定期向发现端口发送 `<service_tag><server_name>` 数据报。

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use race_protocol::discovery::encode_advertisement;
use race_protocol::{
    NetworkConfig, Result, BEACON_INTERVAL, DEFAULT_DISCOVERY_PORT, DEFAULT_SERVER_NAME,
    DEFAULT_SERVICE_TAG,
};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// 信标配置
#[derive(Debug, Clone)]
pub struct BeaconConfig {
    /// 广播目标地址
    pub target: SocketAddr,
    pub service_tag: String,
    pub server_name: String,
    /// 发送间隔
    pub interval: Duration,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            target: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::BROADCAST,
                DEFAULT_DISCOVERY_PORT,
            )),
            service_tag: DEFAULT_SERVICE_TAG.to_string(),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            interval: BEACON_INTERVAL,
        }
    }
}

impl From<&NetworkConfig> for BeaconConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            target: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::BROADCAST,
                config.discovery_port,
            )),
            service_tag: config.service_tag.clone(),
            server_name: config.server_name.clone(),
            interval: config.beacon_interval(),
        }
    }
}

/// 运行中的信标
pub struct Beacon {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Beacon {
    /// 绑定临时端口并开始广播，第一条数据报立即发出
    pub async fn start(config: BeaconConfig) -> Result<Self> {
        let bind_addr: SocketAddr = if config.target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.set_broadcast(true)?;
        info!(
            "Advertising '{}' to {} every {:?}",
            config.server_name, config.target, config.interval
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(beacon_loop(socket, config, shutdown_rx));

        Ok(Self { shutdown_tx, task })
    }

    /// 停止广播并等待任务退出
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!("Beacon task failed: {}", e);
        }
        debug!("Beacon stopped");
    }
}

async fn beacon_loop(
    socket: UdpSocket,
    config: BeaconConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let datagram = encode_advertisement(&config.service_tag, &config.server_name);
    // 间隔为零时 interval 会 panic
    let mut ticker = tokio::time::interval(config.interval.max(Duration::from_millis(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match socket.send_to(&datagram, config.target).await {
                    Ok(_) => trace!("Beacon sent to {}", config.target),
                    Err(e) => debug!("Beacon send failed: {}", e),
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use race_protocol::discovery::parse_advertisement;

    #[tokio::test]
    async fn test_beacon_sends_tagged_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = BeaconConfig {
            target: receiver.local_addr().unwrap(),
            server_name: "Lobby 1".to_string(),
            interval: Duration::from_millis(50),
            ..BeaconConfig::default()
        };

        let beacon = Beacon::start(config).await.unwrap();

        let mut buf = [0u8; 512];
        for _ in 0..2 {
            let (n, _) =
                tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
                    .await
                    .unwrap()
                    .unwrap();
            assert_eq!(
                parse_advertisement(DEFAULT_SERVICE_TAG, &buf[..n]),
                Some("Lobby 1")
            );
        }

        beacon.stop().await;
    }

    #[tokio::test]
    async fn test_zero_interval_still_advertises() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = BeaconConfig {
            target: receiver.local_addr().unwrap(),
            server_name: "Eager".to_string(),
            interval: Duration::ZERO,
            ..BeaconConfig::default()
        };

        let beacon = Beacon::start(config).await.unwrap();

        let mut buf = [0u8; 512];
        for _ in 0..3 {
            let (n, _) =
                tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
                    .await
                    .unwrap()
                    .unwrap();
            assert_eq!(
                parse_advertisement(DEFAULT_SERVICE_TAG, &buf[..n]),
                Some("Eager")
            );
        }

        // 任务仍在运行，停止时能正常退出
        assert!(!beacon.task.is_finished());
        tokio::time::timeout(Duration::from_secs(1), beacon.stop())
            .await
            .unwrap();
    }

    #[test]
    fn test_config_from_network() {
        let network = NetworkConfig {
            discovery_port: 40000,
            server_name: "Den".to_string(),
            ..NetworkConfig::default()
        };
        let config = BeaconConfig::from(&network);
        assert_eq!(config.target.port(), 40000);
        assert_eq!(config.server_name, "Den");
        assert_eq!(config.interval, network.beacon_interval());
    }
}
