//! 会话接入端
//!
//! 一个任务跑 accept 循环，每个连接一个独立的处理任务。
//! 停止时通过 watch 信号让 accept 循环退出并关闭监听套接字，
//! 各连接处理任务收到同一信号后关闭各自的连接。accept 循环在退出前
//! 等待所有处理任务结束，所以 `stop()` 返回时用户名都已释放。

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use race_protocol::{
    validate_username, Connection, DenyReason, NetworkConfig, Packet, PacketKind, ProtocolError,
    Result, TcpListener, TcpTransport, TransportListener, DEFAULT_CAPACITY, ERROR_BACKOFF,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::registry::SessionRegistry;

/// 接入端配置
#[derive(Debug, Clone)]
pub struct AcceptorConfig {
    /// 监听 IP
    pub bind_ip: IpAddr,
    /// 远程玩家上限
    pub capacity: usize,
    /// 房主用户名
    pub host_username: Option<String>,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            capacity: DEFAULT_CAPACITY,
            host_username: None,
        }
    }
}

impl From<&NetworkConfig> for AcceptorConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            capacity: config.capacity,
            host_username: config.host_username.clone(),
            ..Self::default()
        }
    }
}

/// 服务端生命周期事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// 新连接接入
    ClientConnected { addr: SocketAddr },
    /// 玩家登记成功
    PlayerRegistered { addr: SocketAddr, username: String },
    /// 玩家被拒绝
    PlayerDenied {
        addr: SocketAddr,
        username: String,
        reason: DenyReason,
    },
    /// 连接断开
    ClientDisconnected {
        addr: SocketAddr,
        username: Option<String>,
    },
}

/// 事件出口，未注入时丢弃事件
#[derive(Clone, Default)]
pub(crate) struct EventSink(Option<mpsc::UnboundedSender<ServerEvent>>);

impl EventSink {
    fn emit(&self, event: ServerEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }
}

struct Running {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// 会话接入端
pub struct SessionAcceptor {
    registry: Arc<SessionRegistry>,
    events: EventSink,
    bind_ip: IpAddr,
    running: Option<Running>,
}

impl SessionAcceptor {
    pub fn new(config: AcceptorConfig) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new(config.capacity, config.host_username)),
            events: EventSink::default(),
            bind_ip: config.bind_ip,
            running: None,
        }
    }

    /// 注入事件通道
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        self.events = EventSink(Some(tx));
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// 实际监听地址
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// 绑定端口并启动 accept 循环；已在运行时直接返回当前地址
    pub async fn start(&mut self, port: u16) -> Result<SocketAddr> {
        if let Some(running) = &self.running {
            debug!("Acceptor already running on {}", running.local_addr);
            return Ok(running.local_addr);
        }

        let listener = TcpListener::bind(SocketAddr::new(self.bind_ip, port)).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.registry),
            self.events.clone(),
            shutdown_rx,
        ));

        self.running = Some(Running {
            local_addr,
            shutdown_tx,
            task,
        });
        Ok(local_addr)
    }

    /// 停止接入并关闭监听套接字，可重复调用
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.task.await {
            error!("Accept loop task failed: {}", e);
        }
        info!("Server on {} stopped", running.local_addr);
    }
}

impl Drop for SessionAcceptor {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(true);
            running.task.abort();
        }
    }
}

/// accept 循环，退出时监听套接字随之关闭
async fn accept_loop(
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    events: EventSink,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((transport, addr)) => {
                        debug!("Accepted connection from {}", addr);
                        events.emit(ServerEvent::ClientConnected { addr });

                        handlers.spawn(handle_client(
                            transport,
                            addr,
                            Arc::clone(&registry),
                            events.clone(),
                            shutdown_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        if *shutdown_rx.borrow() {
                            debug!("Listener closed after stop: {}", e);
                            break;
                        }
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
            }

            Some(result) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = result {
                    error!("Client handler failed: {}", e);
                }
            }

            _ = shutdown_rx.changed() => {
                debug!("Accept loop received shutdown signal");
                break;
            }
        }
    }

    drop(listener);
    while let Some(result) = handlers.join_next().await {
        if let Err(e) = result {
            error!("Client handler failed: {}", e);
        }
    }
}

/// 处理单个客户端连接
async fn handle_client(
    transport: TcpTransport,
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    events: EventSink,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut conn = Connection::new(transport);
    let mut username: Option<String> = None;

    loop {
        let result = tokio::select! {
            result = conn.recv() => result,
            _ = shutdown_rx.changed() => {
                debug!("Closing connection {} on shutdown", addr);
                break;
            }
        };

        match result {
            Ok(packet) => {
                if let Err(e) =
                    dispatch(&mut conn, packet, addr, &registry, &events, &mut username).await
                {
                    warn!("Failed to reply to {}: {}", addr, e);
                    break;
                }
            }
            Err(ProtocolError::ConnectionClosed) => {
                debug!("{} disconnected", addr);
                break;
            }
            Err(ProtocolError::Decode(e)) => {
                warn!("Dropping {} after decode error: {}", addr, e);
                break;
            }
            Err(e) => {
                warn!("Error receiving from {}: {}", addr, e);
                break;
            }
        }
    }

    if let Some(name) = &username {
        registry.release(name).await;
        info!("Player {} ({}) left", name, addr);
    }
    events.emit(ServerEvent::ClientDisconnected { addr, username });
}

/// 处理一个入站数据包
async fn dispatch(
    conn: &mut Connection<OwnedReadHalf, OwnedWriteHalf>,
    packet: Packet,
    addr: SocketAddr,
    registry: &SessionRegistry,
    events: &EventSink,
    username: &mut Option<String>,
) -> Result<()> {
    match packet.kind {
        PacketKind::RequestConnection => {
            let requested = packet.payload;

            if let Some(current) = username.as_deref() {
                conn.send(&Packet::unexpected(format!("already registered as {}", current)))
                    .await?;
                return Ok(());
            }

            if let Err(reason) = validate_username(&requested) {
                debug!("Rejecting invalid username from {}: {}", addr, reason);
                conn.send(&Packet::unexpected(reason)).await?;
                return Ok(());
            }

            match registry.try_register(&requested).await {
                Ok(()) => {
                    // 先记下，发送失败时也能在断开时释放
                    *username = Some(requested.clone());
                    conn.send(&Packet::allow()).await?;
                    info!("Player {} ({}) joined", requested, addr);
                    events.emit(ServerEvent::PlayerRegistered {
                        addr,
                        username: requested,
                    });
                }
                Err(reason) => {
                    conn.send(&Packet::deny(reason)).await?;
                    info!("Denied {} ({}): {}", requested, addr, reason);
                    events.emit(ServerEvent::PlayerDenied {
                        addr,
                        username: requested,
                        reason,
                    });
                }
            }
        }
        kind => {
            warn!("Unexpected {:?} packet from {}", kind, addr);
            conn.send(&Packet::unexpected(format!(
                "packet kind {} is not accepted by the server",
                kind.ordinal()
            )))
            .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use race_protocol::{Transport, TransportConfig};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    type ClientConn = Connection<OwnedReadHalf, OwnedWriteHalf>;

    fn loopback_config(capacity: usize, host_username: Option<&str>) -> AcceptorConfig {
        AcceptorConfig {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            capacity,
            host_username: host_username.map(str::to_string),
        }
    }

    async fn open(addr: SocketAddr) -> ClientConn {
        let transport = TcpTransport::connect("127.0.0.1", addr.port(), &TransportConfig::default())
            .await
            .unwrap();
        Connection::new(transport)
    }

    /// 发送加入请求并返回连接（保持登记）和应答
    async fn request(addr: SocketAddr, username: &str) -> (ClientConn, Packet) {
        let mut conn = open(addr).await;
        conn.send(&Packet::request_connection(username)).await.unwrap();
        let reply = conn.recv().await.unwrap();
        (conn, reply)
    }

    async fn wait_until_empty(registry: &SessionRegistry) {
        for _ in 0..100 {
            if registry.is_empty().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("registry never emptied");
    }

    #[tokio::test]
    async fn test_username_taken_then_allowed() {
        let mut acceptor = SessionAcceptor::new(loopback_config(1, Some("Alice")));
        let addr = acceptor.start(0).await.unwrap();

        let (_alice, reply) = request(addr, "Alice").await;
        assert_eq!(reply.kind, PacketKind::DenyConnectionUsernameTaken);

        let (_bob, reply) = request(addr, "Bob").await;
        assert_eq!(reply.kind, PacketKind::AllowConnection);

        let (_carol, reply) = request(addr, "Carol").await;
        assert_eq!(reply.kind, PacketKind::DenyConnectionFull);

        acceptor.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_same_username() {
        let mut acceptor = SessionAcceptor::new(loopback_config(4, None));
        let addr = acceptor.start(0).await.unwrap();

        let first = tokio::spawn(request(addr, "racer"));
        let second = tokio::spawn(request(addr, "racer"));
        let (_conn_a, reply_a) = first.await.unwrap();
        let (_conn_b, reply_b) = second.await.unwrap();

        let kinds = [reply_a.kind, reply_b.kind];
        let allowed = kinds
            .iter()
            .filter(|k| **k == PacketKind::AllowConnection)
            .count();
        assert_eq!(allowed, 1);
        assert!(kinds.contains(&PacketKind::DenyConnectionUsernameTaken));

        acceptor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_refuses_new_connections() {
        let mut acceptor = SessionAcceptor::new(loopback_config(4, None));
        let addr = acceptor.start(0).await.unwrap();
        assert!(acceptor.is_running());

        acceptor.stop().await;
        assert!(!acceptor.is_running());

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            TcpTransport::connect("127.0.0.1", addr.port(), &TransportConfig::default()),
        )
        .await
        .expect("connect attempt did not finish in time");
        assert!(result.unwrap_err().is_transport());

        // 重复停止无副作用
        acceptor.stop().await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let mut acceptor = SessionAcceptor::new(loopback_config(4, None));
        let first = acceptor.start(0).await.unwrap();
        let second = acceptor.start(0).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(acceptor.local_addr(), Some(first));
        acceptor.stop().await;
    }

    #[tokio::test]
    async fn test_name_released_on_disconnect() {
        let mut acceptor = SessionAcceptor::new(loopback_config(1, None));
        let addr = acceptor.start(0).await.unwrap();

        let (conn, reply) = request(addr, "alice").await;
        assert_eq!(reply.kind, PacketKind::AllowConnection);
        drop(conn);
        wait_until_empty(acceptor.registry()).await;

        let (_conn, reply) = request(addr, "alice").await;
        assert_eq!(reply.kind, PacketKind::AllowConnection);

        acceptor.stop().await;
    }

    #[tokio::test]
    async fn test_second_request_on_same_connection() {
        let mut acceptor = SessionAcceptor::new(loopback_config(4, None));
        let addr = acceptor.start(0).await.unwrap();

        let (mut conn, reply) = request(addr, "alice").await;
        assert_eq!(reply.kind, PacketKind::AllowConnection);

        conn.send(&Packet::request_connection("bob")).await.unwrap();
        let reply = conn.recv().await.unwrap();
        assert_eq!(reply.kind, PacketKind::Unexpected);
        assert_eq!(acceptor.registry().players().await, vec!["alice"]);

        acceptor.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_username_and_server_kind() {
        let mut acceptor = SessionAcceptor::new(loopback_config(4, None));
        let addr = acceptor.start(0).await.unwrap();

        let (mut conn, reply) = request(addr, "").await;
        assert_eq!(reply.kind, PacketKind::Unexpected);

        conn.send(&Packet::allow()).await.unwrap();
        assert_eq!(conn.recv().await.unwrap().kind, PacketKind::Unexpected);
        assert!(acceptor.registry().is_empty().await);

        acceptor.stop().await;
    }

    #[tokio::test]
    async fn test_decode_error_closes_only_that_connection() {
        let mut acceptor = SessionAcceptor::new(loopback_config(4, None));
        let addr = acceptor.start(0).await.unwrap();

        let (_healthy, reply) = request(addr, "alice").await;
        assert_eq!(reply.kind, PacketKind::AllowConnection);

        let mut raw = tokio::net::TcpStream::connect(addr).await.unwrap();
        raw.write_all(b"9\x1fbob\n").await.unwrap();
        let mut rest = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(2), raw.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);

        // 其他连接和 accept 循环不受影响
        let (_other, reply) = request(addr, "bob").await;
        assert_eq!(reply.kind, PacketKind::AllowConnection);

        acceptor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_client_connections() {
        let mut acceptor = SessionAcceptor::new(loopback_config(4, None));
        let addr = acceptor.start(0).await.unwrap();

        let (mut conn, _) = request(addr, "alice").await;
        acceptor.stop().await;

        let result = tokio::time::timeout(Duration::from_secs(2), conn.recv())
            .await
            .unwrap();
        assert!(result.is_err());
        assert!(acceptor.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_restart_after_stop_accepts_same_name() {
        let mut acceptor = SessionAcceptor::new(loopback_config(1, None));
        let addr = acceptor.start(0).await.unwrap();

        let (_alice, reply) = request(addr, "alice").await;
        assert_eq!(reply.kind, PacketKind::AllowConnection);

        // stop 返回时处理任务已结束，名字已释放
        acceptor.stop().await;
        assert!(acceptor.registry().is_empty().await);

        let addr = acceptor.start(0).await.unwrap();
        let (_again, reply) = request(addr, "alice").await;
        assert_eq!(reply.kind, PacketKind::AllowConnection);

        acceptor.stop().await;
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut acceptor = SessionAcceptor::new(loopback_config(4, None)).with_events(tx);
        let addr = acceptor.start(0).await.unwrap();

        let (conn, _) = request(addr, "alice").await;
        assert!(matches!(
            rx.recv().await,
            Some(ServerEvent::ClientConnected { .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ServerEvent::PlayerRegistered { ref username, .. }) if username == "alice"
        ));

        drop(conn);
        assert!(matches!(
            rx.recv().await,
            Some(ServerEvent::ClientDisconnected { username: Some(ref name), .. }) if name == "alice"
        ));

        acceptor.stop().await;
    }
}
