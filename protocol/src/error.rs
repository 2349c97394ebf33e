//! 错误类型定义

use thiserror::Error;

/// 数据包解码错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// 格式错误：缺少分隔符、序号无法解析或负载不是 UTF-8
    #[error("Malformed packet: {0}")]
    Malformed(String),

    /// 序号超出已知消息类型范围
    #[error("Unknown packet kind: {0}")]
    UnknownKind(String),
}

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 解码错误
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// 单行超长
    #[error("Line too long: {size} bytes (max: {max})")]
    LineTooLong { size: usize, max: usize },

    /// 负载包含分隔符或换行
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// 会话已连接或正在连接
    #[error("Session already connected")]
    AlreadyConnected,

    /// 配置错误
    #[error("Config error: {0}")]
    Config(String),
}

impl ProtocolError {
    /// 是否属于传输层错误（套接字打开、绑定、读写失败）
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_) | ProtocolError::ConnectionTimeout | ProtocolError::ConnectionClosed
        )
    }
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
