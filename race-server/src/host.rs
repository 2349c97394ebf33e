//! 托管入口
//!
//! 把会话接入端和广播信标绑在一起，供 UI 层开关“托管”。

use std::net::SocketAddr;
use std::sync::Arc;

use race_protocol::{NetworkConfig, Result};
use tokio::sync::mpsc;
use tracing::warn;

use crate::beacon::{Beacon, BeaconConfig};
use crate::registry::SessionRegistry;
use crate::server::{AcceptorConfig, ServerEvent, SessionAcceptor};

pub struct GameHost {
    acceptor: SessionAcceptor,
    beacon_config: BeaconConfig,
    beacon: Option<Beacon>,
}

impl GameHost {
    pub fn new(acceptor_config: AcceptorConfig, beacon_config: BeaconConfig) -> Self {
        Self {
            acceptor: SessionAcceptor::new(acceptor_config),
            beacon_config,
            beacon: None,
        }
    }

    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(AcceptorConfig::from(config), BeaconConfig::from(config))
    }

    /// 注入事件通道
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        self.acceptor = self.acceptor.with_events(tx);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.acceptor.registry()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.local_addr()
    }

    pub fn is_hosting(&self) -> bool {
        self.acceptor.is_running()
    }

    pub fn is_advertising(&self) -> bool {
        self.beacon.is_some()
    }

    /// 开始托管：绑定端口后再开始广播
    ///
    /// 广播失败只记录日志，不影响已经在监听的会话。
    pub async fn start_hosting(&mut self, port: u16) -> Result<SocketAddr> {
        let addr = self.acceptor.start(port).await?;

        if self.beacon.is_none() {
            match Beacon::start(self.beacon_config.clone()).await {
                Ok(beacon) => self.beacon = Some(beacon),
                Err(e) => warn!("Hosting on {} without discovery beacon: {}", addr, e),
            }
        }

        Ok(addr)
    }

    /// 停止广播和接入，可重复调用
    pub async fn stop_hosting(&mut self) {
        if let Some(beacon) = self.beacon.take() {
            beacon.stop().await;
        }
        self.acceptor.stop().await;
    }
}
