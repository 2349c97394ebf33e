//! 配置加载
//!
//! 所有字段都有默认值，TOML 文件只需写要覆盖的项:
//! ```toml
//! game_port = 30000
//! server_name = "Office LAN"
//! capacity = 2
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ProtocolError, Result};
use crate::transport::TransportConfig;
use crate::{
    BEACON_INTERVAL_MS, CONNECT_TIMEOUT_SECS, DEFAULT_CAPACITY, DEFAULT_DISCOVERY_PORT,
    DEFAULT_GAME_PORT, DEFAULT_SERVER_NAME, DEFAULT_SERVICE_TAG, EXPIRY_WINDOW_MS,
};

/// 网络配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// 游戏 TCP 端口
    pub game_port: u16,
    /// 发现 UDP 端口
    pub discovery_port: u16,
    /// 广播前缀
    pub service_tag: String,
    /// 广播的服务器名称
    pub server_name: String,
    /// 房主自己的用户名，其他玩家不能使用
    pub host_username: Option<String>,
    /// 远程玩家上限
    pub capacity: usize,
    pub beacon_interval_ms: u64,
    pub expiry_window_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            game_port: DEFAULT_GAME_PORT,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            service_tag: DEFAULT_SERVICE_TAG.to_string(),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            host_username: None,
            capacity: DEFAULT_CAPACITY,
            beacon_interval_ms: BEACON_INTERVAL_MS,
            expiry_window_ms: EXPIRY_WINDOW_MS,
            connect_timeout_ms: CONNECT_TIMEOUT_SECS * 1000,
        }
    }
}

impl NetworkConfig {
    /// 从 TOML 文本解析
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ProtocolError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// 检查取值范围
    pub fn validate(&self) -> Result<()> {
        if self.service_tag.is_empty() {
            return Err(ProtocolError::Config("service_tag must not be empty".into()));
        }
        if self.beacon_interval_ms == 0 {
            return Err(ProtocolError::Config("beacon_interval_ms must be > 0".into()));
        }
        if self.expiry_window_ms == 0 {
            return Err(ProtocolError::Config("expiry_window_ms must be > 0".into()));
        }
        if self.beacon_interval_ms >= self.expiry_window_ms {
            return Err(ProtocolError::Config(
                "beacon_interval_ms must be shorter than expiry_window_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn beacon_interval(&self) -> Duration {
        Duration::from_millis(self.beacon_interval_ms)
    }

    pub fn expiry_window(&self) -> Duration {
        Duration::from_millis(self.expiry_window_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// 对应的传输层配置
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: self.connect_timeout(),
            ..TransportConfig::default()
        }
    }
}
