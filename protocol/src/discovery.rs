//! 局域网发现：广播数据报格式与带过期的服务器列表
//!
//! 数据报格式为 `<service_tag><server_name>`，纯文本，无结束符。
//! 列表以发送方 IP 为键，重复广播原地刷新；超过过期窗口未刷新的条目
//! 由定期清扫移除，快照中也不会出现。

use std::net::IpAddr;
use std::time::{Duration, Instant};

/// 编码广播数据报
pub fn encode_advertisement(service_tag: &str, server_name: &str) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(service_tag.len() + server_name.len());
    datagram.extend_from_slice(service_tag.as_bytes());
    datagram.extend_from_slice(server_name.as_bytes());
    datagram
}

/// 解析广播数据报，前缀不匹配或名称不是 UTF-8 时返回 None
pub fn parse_advertisement<'a>(service_tag: &str, datagram: &'a [u8]) -> Option<&'a str> {
    let name = datagram.strip_prefix(service_tag.as_bytes())?;
    std::str::from_utf8(name).ok().map(str::trim)
}

/// 发现的服务器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredServer {
    /// 发送方地址
    pub address: IpAddr,
    /// 广播中的服务器名称
    pub name: String,
    /// 最近一次收到广播的时间
    pub last_seen: Instant,
}

/// 按插入顺序保存的服务器列表
#[derive(Debug, Clone)]
pub struct ServerList {
    expiry_window: Duration,
    servers: Vec<DiscoveredServer>,
}

impl ServerList {
    pub fn new(expiry_window: Duration) -> Self {
        Self {
            expiry_window,
            servers: Vec::new(),
        }
    }

    pub fn expiry_window(&self) -> Duration {
        self.expiry_window
    }

    /// 插入或刷新条目，返回是否为新条目
    pub fn upsert(&mut self, address: IpAddr, name: &str, now: Instant) -> bool {
        match self.servers.iter_mut().find(|s| s.address == address) {
            Some(server) => {
                server.last_seen = now;
                if server.name != name {
                    server.name = name.to_string();
                }
                false
            }
            None => {
                self.servers.push(DiscoveredServer {
                    address,
                    name: name.to_string(),
                    last_seen: now,
                });
                true
            }
        }
    }

    /// 移除过期条目，返回被移除的条目
    pub fn sweep(&mut self, now: Instant) -> Vec<DiscoveredServer> {
        let window = self.expiry_window;
        let mut expired = Vec::new();
        self.servers.retain(|server| {
            if is_live(server, now, window) {
                true
            } else {
                expired.push(server.clone());
                false
            }
        });
        expired
    }

    /// 当前仍在有效期内的条目副本
    pub fn snapshot(&self, now: Instant) -> Vec<DiscoveredServer> {
        self.servers
            .iter()
            .filter(|server| is_live(server, now, self.expiry_window))
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.servers.clear();
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

fn is_live(server: &DiscoveredServer, now: Instant, window: Duration) -> bool {
    now.saturating_duration_since(server.last_seen) < window
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const TAG: &str = "TypeRace:";

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    #[test]
    fn test_advertisement_format() {
        let datagram = encode_advertisement(TAG, "Alice's room");
        assert_eq!(datagram, b"TypeRace:Alice's room".to_vec());
        assert_eq!(parse_advertisement(TAG, &datagram), Some("Alice's room"));
    }

    #[test]
    fn test_parse_ignores_foreign_datagrams() {
        assert_eq!(parse_advertisement(TAG, b"SomethingElse:room"), None);
        assert_eq!(parse_advertisement(TAG, b"TypeRa"), None);
        assert_eq!(parse_advertisement(TAG, b"TypeRace:\xff\xfe"), None);
        assert_eq!(parse_advertisement(TAG, b"TypeRace:"), Some(""));
    }

    #[test]
    fn test_upsert_refreshes_in_place() {
        let start = Instant::now();
        let mut list = ServerList::new(Duration::from_secs(5));

        assert!(list.upsert(ip(1), "first", start));
        assert!(list.upsert(ip(2), "second", start));
        assert!(!list.upsert(ip(1), "renamed", start + Duration::from_secs(1)));

        let snapshot = list.snapshot(start + Duration::from_secs(1));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].address, ip(1));
        assert_eq!(snapshot[0].name, "renamed");
        assert_eq!(snapshot[1].address, ip(2));
    }

    #[test]
    fn test_multiple_servers_stay_visible() {
        let start = Instant::now();
        let mut list = ServerList::new(Duration::from_secs(5));

        // 每个新数据报都不能清掉其他服务器
        for i in 0..10u64 {
            let now = start + Duration::from_millis(i * 500);
            list.upsert(ip(1), "one", now);
            list.upsert(ip(2), "two", now);
            list.sweep(now);
            assert_eq!(list.snapshot(now).len(), 2);
        }
    }

    #[test]
    fn test_sweep_removes_expired() {
        let start = Instant::now();
        let mut list = ServerList::new(Duration::from_secs(5));
        list.upsert(ip(1), "quiet", start);
        list.upsert(ip(2), "chatty", start);
        list.upsert(ip(2), "chatty", start + Duration::from_secs(4));

        let expired = list.sweep(start + Duration::from_secs(5));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].address, ip(1));
        assert_eq!(list.len(), 1);

        list.sweep(start + Duration::from_secs(10));
        assert!(list.is_empty());
    }

    #[test]
    fn test_snapshot_hides_expired_before_sweep() {
        let start = Instant::now();
        let mut list = ServerList::new(Duration::from_secs(5));
        list.upsert(ip(1), "stale", start);

        assert_eq!(list.snapshot(start + Duration::from_millis(4999)).len(), 1);
        assert!(list.snapshot(start + Duration::from_secs(5)).is_empty());
        assert_eq!(list.len(), 1);
    }
}
