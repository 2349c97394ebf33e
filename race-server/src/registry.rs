//! 在线玩家登记表
//!
//! 检查用户名、检查容量、插入三步在同一把锁内完成，
//! 并发的同名请求最多只有一个成功。

use race_protocol::DenyReason;
use tokio::sync::Mutex;

pub struct SessionRegistry {
    /// 远程玩家上限
    capacity: usize,
    /// 房主自己的用户名，视为已占用但不计入容量
    reserved: Option<String>,
    /// 已登记的用户名，按加入顺序
    players: Mutex<Vec<String>>,
}

impl SessionRegistry {
    pub fn new(capacity: usize, reserved: Option<String>) -> Self {
        Self {
            capacity,
            reserved,
            players: Mutex::new(Vec::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 登记用户名，失败时返回拒绝原因
    pub async fn try_register(&self, username: &str) -> Result<(), DenyReason> {
        let mut players = self.players.lock().await;

        // 先查重名，再查容量
        if self.reserved.as_deref() == Some(username) || players.iter().any(|p| p == username) {
            return Err(DenyReason::UsernameTaken);
        }
        if players.len() >= self.capacity {
            return Err(DenyReason::Full);
        }

        players.push(username.to_string());
        Ok(())
    }

    /// 释放用户名，返回是否确实存在
    pub async fn release(&self, username: &str) -> bool {
        let mut players = self.players.lock().await;
        match players.iter().position(|p| p == username) {
            Some(index) => {
                players.remove(index);
                true
            }
            None => false,
        }
    }

    /// 当前玩家列表副本
    pub async fn players(&self) -> Vec<String> {
        self.players.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.players.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
