//! 打字竞速游戏服务端
//!
//! - 会话接入端 (SessionAcceptor)：监听、每连接一个任务、加入握手
//! - 玩家登记表 (SessionRegistry)
//! - 局域网广播信标 (Beacon)
//! - 托管入口 (GameHost)

mod beacon;
mod host;
mod registry;
mod server;

pub use beacon::{Beacon, BeaconConfig};
pub use host::GameHost;
pub use registry::SessionRegistry;
pub use server::{AcceptorConfig, ServerEvent, SessionAcceptor};
