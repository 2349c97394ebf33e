//! 协议常量定义

use std::time::Duration;

/// 字段分隔符（ASCII Unit Separator）
pub const FIELD_SEPARATOR: u8 = 0x1F;

/// 行结束符
pub const LINE_TERMINATOR: u8 = b'\n';

/// 单行（一个数据包）最大长度，包含结束符
pub const MAX_LINE_LEN: usize = 4096;

/// 用户名最大长度
pub const MAX_USERNAME_LEN: usize = 20;

/// 默认游戏端口（TCP）
pub const DEFAULT_GAME_PORT: u16 = 25565;

/// 默认发现端口（UDP 广播）
pub const DEFAULT_DISCOVERY_PORT: u16 = 25566;

/// 默认服务标识前缀
pub const DEFAULT_SERVICE_TAG: &str = "TypeRace:";

/// 默认服务器名称
pub const DEFAULT_SERVER_NAME: &str = "TypeRace Server";

/// 默认可加入的远程玩家数
pub const DEFAULT_CAPACITY: usize = 4;

/// 发现数据报最大长度
pub const MAX_DATAGRAM_LEN: usize = 512;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 广播间隔（毫秒）
pub const BEACON_INTERVAL_MS: u64 = 1000;

/// 过期窗口（毫秒）- 超过此时间未收到广播则从列表移除
pub const EXPIRY_WINDOW_MS: u64 = 5000;

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

/// 广播间隔 Duration
pub const BEACON_INTERVAL: Duration = Duration::from_millis(BEACON_INTERVAL_MS);

/// 过期窗口 Duration
pub const EXPIRY_WINDOW: Duration = Duration::from_millis(EXPIRY_WINDOW_MS);

/// 套接字持续出错时的重试间隔
pub const ERROR_BACKOFF: Duration = Duration::from_millis(100);
