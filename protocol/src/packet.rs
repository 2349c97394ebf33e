//! 数据包类型定义
//!
//! 序号是线上格式的一部分，顺序不可调整。

use std::fmt;

use crate::error::{ProtocolError, Result};
use crate::{FIELD_SEPARATOR, LINE_TERMINATOR, MAX_USERNAME_LEN};

/// 消息类型（服务端与客户端共用一套序号）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// 允许加入
    AllowConnection,
    /// 拒绝：房间已满
    DenyConnectionFull,
    /// 拒绝：用户名已被占用
    DenyConnectionUsernameTaken,
    /// 意外的请求
    Unexpected,
    /// 请求加入，负载为用户名
    RequestConnection,
}

impl PacketKind {
    /// 全部消息类型，按序号排列
    pub const ALL: [PacketKind; 5] = [
        PacketKind::AllowConnection,
        PacketKind::DenyConnectionFull,
        PacketKind::DenyConnectionUsernameTaken,
        PacketKind::Unexpected,
        PacketKind::RequestConnection,
    ];

    pub fn ordinal(self) -> u32 {
        match self {
            PacketKind::AllowConnection => 0,
            PacketKind::DenyConnectionFull => 1,
            PacketKind::DenyConnectionUsernameTaken => 2,
            PacketKind::Unexpected => 3,
            PacketKind::RequestConnection => 4,
        }
    }

    pub fn from_ordinal(ordinal: u32) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }

    /// 是否由服务端发出
    pub fn is_server_origin(self) -> bool {
        !self.is_client_origin()
    }

    /// 是否由客户端发出
    pub fn is_client_origin(self) -> bool {
        matches!(self, PacketKind::RequestConnection)
    }
}

/// 拒绝加入的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    /// 房间已满
    Full,
    /// 用户名已被占用
    UsernameTaken,
}

impl DenyReason {
    /// 对应的拒绝消息类型
    pub fn kind(self) -> PacketKind {
        match self {
            DenyReason::Full => PacketKind::DenyConnectionFull,
            DenyReason::UsernameTaken => PacketKind::DenyConnectionUsernameTaken,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Full => write!(f, "server is full"),
            DenyReason::UsernameTaken => write!(f, "username already taken"),
        }
    }
}

/// 数据包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub payload: String,
}

impl Packet {
    pub fn new(kind: PacketKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// 无负载的数据包
    pub fn empty(kind: PacketKind) -> Self {
        Self::new(kind, String::new())
    }

    /// 客户端加入请求
    pub fn request_connection(username: impl Into<String>) -> Self {
        Self::new(PacketKind::RequestConnection, username)
    }

    pub fn allow() -> Self {
        Self::empty(PacketKind::AllowConnection)
    }

    pub fn deny(reason: DenyReason) -> Self {
        Self::empty(reason.kind())
    }

    pub fn unexpected(reason: impl Into<String>) -> Self {
        Self::new(PacketKind::Unexpected, reason)
    }

    /// 若为拒绝消息，返回拒绝原因
    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self.kind {
            PacketKind::DenyConnectionFull => Some(DenyReason::Full),
            PacketKind::DenyConnectionUsernameTaken => Some(DenyReason::UsernameTaken),
            _ => None,
        }
    }

    /// 校验负载可以安全写入一行
    pub fn validate(&self) -> Result<()> {
        if self.payload.as_bytes().contains(&FIELD_SEPARATOR) {
            return Err(ProtocolError::InvalidPayload(
                "payload contains the field separator".to_string(),
            ));
        }
        if self.payload.as_bytes().contains(&LINE_TERMINATOR) {
            return Err(ProtocolError::InvalidPayload(
                "payload contains a line break".to_string(),
            ));
        }
        Ok(())
    }
}

/// 校验用户名，返回失败原因
pub fn validate_username(username: &str) -> std::result::Result<(), String> {
    if username.is_empty() {
        return Err("username must not be empty".to_string());
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(format!(
            "username too long: {} bytes (max: {})",
            username.len(),
            MAX_USERNAME_LEN
        ));
    }
    if username
        .bytes()
        .any(|b| b == FIELD_SEPARATOR || b == LINE_TERMINATOR || b == b'\r')
    {
        return Err("username contains control characters".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_are_stable() {
        for (i, kind) in PacketKind::ALL.iter().enumerate() {
            assert_eq!(kind.ordinal() as usize, i);
            assert_eq!(PacketKind::from_ordinal(i as u32), Some(*kind));
        }
        assert_eq!(PacketKind::RequestConnection.ordinal(), 4);
        assert_eq!(PacketKind::from_ordinal(5), None);
    }

    #[test]
    fn test_origin_partition() {
        let client: Vec<_> = PacketKind::ALL
            .iter()
            .filter(|k| k.is_client_origin())
            .collect();
        assert_eq!(client, vec![&PacketKind::RequestConnection]);
        assert!(PacketKind::ALL
            .iter()
            .all(|k| k.is_client_origin() != k.is_server_origin()));
    }

    #[test]
    fn test_deny_reason_mapping() {
        assert_eq!(
            Packet::deny(DenyReason::Full).deny_reason(),
            Some(DenyReason::Full)
        );
        assert_eq!(
            Packet::deny(DenyReason::UsernameTaken).kind,
            PacketKind::DenyConnectionUsernameTaken
        );
        assert_eq!(Packet::allow().deny_reason(), None);
    }

    #[test]
    fn test_validate_payload() {
        assert!(Packet::request_connection("alice").validate().is_ok());
        assert!(Packet::empty(PacketKind::AllowConnection).validate().is_ok());
        assert!(Packet::request_connection("a\u{1f}b").validate().is_err());
        assert!(Packet::unexpected("two\nlines").validate().is_err());
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("valid_user").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username(&"a".repeat(MAX_USERNAME_LEN + 1)).is_err());
        assert!(validate_username("bad\u{1f}name").is_err());
    }
}
