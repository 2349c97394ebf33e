//! 局域网服务器发现
//!
//! 监听任务独占服务器列表，每次变化后通过 watch 通道发布一份副本，
//! UI 只读取副本。清扫按过期窗口的一半定期进行，与数据报到达无关。

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use race_protocol::discovery::parse_advertisement;
use race_protocol::{
    DiscoveredServer, NetworkConfig, Result, ServerList, DEFAULT_DISCOVERY_PORT,
    DEFAULT_SERVICE_TAG, ERROR_BACKOFF, EXPIRY_WINDOW, MAX_DATAGRAM_LEN,
};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// 发现配置
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// 监听地址
    pub bind_addr: SocketAddr,
    pub service_tag: String,
    /// 过期窗口
    pub expiry_window: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::UNSPECIFIED,
                DEFAULT_DISCOVERY_PORT,
            )),
            service_tag: DEFAULT_SERVICE_TAG.to_string(),
            expiry_window: EXPIRY_WINDOW,
        }
    }
}

impl From<&NetworkConfig> for DiscoveryConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::UNSPECIFIED,
                config.discovery_port,
            )),
            service_tag: config.service_tag.clone(),
            expiry_window: config.expiry_window(),
        }
    }
}

struct Running {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// 发现监听器
pub struct DiscoveryListener {
    config: DiscoveryConfig,
    servers: Arc<watch::Sender<Vec<DiscoveredServer>>>,
    running: Option<Running>,
}

impl DiscoveryListener {
    pub fn new(config: DiscoveryConfig) -> Self {
        let (servers, _) = watch::channel(Vec::new());
        Self {
            config,
            servers: Arc::new(servers),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// 绑定发现端口并开始监听；已在运行时直接返回
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if let Some(running) = &self.running {
            return Ok(running.local_addr);
        }

        let socket = UdpSocket::bind(self.config.bind_addr).await?;
        socket.set_broadcast(true)?;
        let local_addr = socket.local_addr()?;
        info!("Discovery listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(listen_loop(
            socket,
            self.config.service_tag.clone(),
            ServerList::new(self.config.expiry_window),
            Arc::clone(&self.servers),
            shutdown_rx,
        ));

        self.running = Some(Running {
            local_addr,
            shutdown_tx,
            task,
        });
        Ok(local_addr)
    }

    /// 停止监听并清空列表，可重复调用
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.task.await {
            error!("Discovery task failed: {}", e);
        }
        self.servers.send_replace(Vec::new());
        debug!("Discovery on {} stopped", running.local_addr);
    }

    /// 当前可见的服务器（按首次发现顺序）
    pub fn current_servers(&self) -> Vec<DiscoveredServer> {
        let window = self.config.expiry_window;
        self.servers
            .borrow()
            .iter()
            .filter(|server| server.last_seen.elapsed() < window)
            .cloned()
            .collect()
    }

    /// 订阅列表变化
    pub fn watch_servers(&self) -> watch::Receiver<Vec<DiscoveredServer>> {
        self.servers.subscribe()
    }
}

impl Drop for DiscoveryListener {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(true);
            running.task.abort();
        }
    }
}

async fn listen_loop(
    socket: UdpSocket,
    service_tag: String,
    mut list: ServerList,
    servers: Arc<watch::Sender<Vec<DiscoveredServer>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = [0u8; MAX_DATAGRAM_LEN];
    let sweep_interval = (list.expiry_window() / 2).max(Duration::from_millis(1));
    let mut sweep = tokio::time::interval(sweep_interval);

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, from)) => {
                        let Some(name) = parse_advertisement(&service_tag, &buf[..len]) else {
                            trace!("Ignoring datagram from {}", from);
                            continue;
                        };

                        let now = Instant::now();
                        if list.upsert(from.ip(), name, now) {
                            info!("Discovered server '{}' at {}", name, from.ip());
                        }
                        servers.send_replace(list.snapshot(now));
                    }
                    Err(e) => {
                        debug!("Discovery recv error: {}", e);
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
            }

            _ = sweep.tick() => {
                let now = Instant::now();
                let expired = list.sweep(now);
                if !expired.is_empty() {
                    for server in &expired {
                        info!("Server '{}' at {} expired", server.name, server.address);
                    }
                    servers.send_replace(list.snapshot(now));
                }
            }

            _ = shutdown_rx.changed() => break,
        }
    }
}
