//! 打字竞速游戏客户端
//!
//! - 客户端会话 (ClientSession)：连接、加入握手、读循环
//! - 局域网服务器发现 (DiscoveryListener)

mod discovery;
mod session;

pub use discovery::{DiscoveryConfig, DiscoveryListener};
pub use session::{
    connect_to_server, ClientEvent, ClientSession, JoinHandshake, JoinOutcome, SessionState,
};
