//! 打字竞速游戏网络会话协议库
//!
//! 包含:
//! - 数据包类型定义 (Packet, PacketKind, DenyReason)
//! - 行帧编解码 (encode / decode, PacketReader / PacketWriter)
//! - 传输层抽象 (Transport trait)
//! - 连接封装 (Connection)
//! - 局域网发现数据格式与过期列表 (ServerList)
//! - 配置 (NetworkConfig)

mod packet;
mod constants;
mod transport;
mod codec;
mod connection;
mod config;
mod error;
pub mod discovery;

pub use packet::{validate_username, DenyReason, Packet, PacketKind};
pub use constants::*;
pub use transport::{Transport, TransportListener, TransportConfig, TcpTransport, TcpListener};
pub use codec::{decode, encode, PacketReader, PacketWriter};
pub use connection::Connection;
pub use config::NetworkConfig;
pub use discovery::{DiscoveredServer, ServerList};
pub use error::{DecodeError, ProtocolError, Result};
