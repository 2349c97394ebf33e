//! 客户端会话
//!
//! 状态机: Disconnected -> Connecting -> {Registered | Denied} -> Closed
//!
//! 写入端放在互斥锁里，保证同一时刻只有一个写入者；
//! 读循环是唯一的读取者，在后台任务中运行到连接结束。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use race_protocol::{
    validate_username, Connection, DenyReason, Packet, PacketKind, PacketReader, PacketWriter,
    ProtocolError, Result, TcpTransport, Transport, TransportConfig,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Reader = PacketReader<OwnedReadHalf>;
type Writer = PacketWriter<OwnedWriteHalf>;

/// 会话状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Registered,
    Denied(DenyReason),
    Closed,
}

/// 加入握手结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Registered,
    Denied(DenyReason),
}

/// 会话事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// 加入成功
    Registered,
    /// 加入被拒绝
    Denied(DenyReason),
    /// 服务端报告意外请求
    Unexpected(String),
    /// 连接断开
    Disconnected { reason: String },
}

#[derive(Clone, Default)]
struct EventSink(Option<mpsc::UnboundedSender<ClientEvent>>);

impl EventSink {
    fn emit(&self, event: ClientEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }
}

/// 等待中的加入握手
pub struct JoinHandshake {
    rx: oneshot::Receiver<Result<JoinOutcome>>,
}

impl JoinHandshake {
    /// 等待服务端应答；连接在应答前结束时返回错误
    pub async fn outcome(self) -> Result<JoinOutcome> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(ProtocolError::ConnectionClosed))
    }
}

/// 客户端会话
pub struct ClientSession {
    config: TransportConfig,
    state: Arc<watch::Sender<SessionState>>,
    writer: Arc<Mutex<Option<Writer>>>,
    read_task: Option<JoinHandle<()>>,
    /// 读循环是否仍在运行，退出前先清除
    reading: Arc<AtomicBool>,
    events: EventSink,
}

impl ClientSession {
    pub fn new(config: TransportConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            config,
            state: Arc::new(state),
            writer: Arc::new(Mutex::new(None)),
            read_task: None,
            reading: Arc::new(AtomicBool::new(false)),
            events: EventSink::default(),
        }
    }

    /// 注入事件通道
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ClientEvent>) -> Self {
        self.events = EventSink(Some(tx));
        self
    }

    /// 当前状态
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// 订阅状态变化
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// 建立连接并发送加入请求
    ///
    /// 传输层失败时同步返回错误，状态保持不变。
    pub async fn connect(
        &mut self,
        host: &str,
        port: u16,
        username: &str,
    ) -> Result<JoinHandshake> {
        // 解码失败后状态保留为最后的有效值，但读循环已退出，允许重连
        let busy = matches!(
            *self.state.borrow(),
            SessionState::Connecting | SessionState::Registered
        ) && self.reading.load(Ordering::SeqCst);
        if busy {
            return Err(ProtocolError::AlreadyConnected);
        }
        validate_username(username).map_err(ProtocolError::InvalidPayload)?;

        // 清理上一次连接残留的任务
        if let Some(task) = self.read_task.take() {
            task.abort();
        }

        let transport = TcpTransport::connect(host, port, &self.config).await?;
        info!("Connected to {}:{}", host, port);

        let (reader, mut writer) = Connection::new(transport).split();
        writer
            .write_packet(&Packet::request_connection(username))
            .await?;

        self.state.send_replace(SessionState::Connecting);
        *self.writer.lock().await = Some(writer);

        let (outcome_tx, outcome_rx) = oneshot::channel();
        self.reading = Arc::new(AtomicBool::new(true));
        self.read_task = Some(tokio::spawn(read_loop(
            reader,
            Arc::clone(&self.reading),
            Arc::clone(&self.state),
            Arc::clone(&self.writer),
            self.events.clone(),
            outcome_tx,
        )));

        Ok(JoinHandshake { rx: outcome_rx })
    }

    /// 发送数据包；尚未连接时直接忽略
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(writer) => writer.write_packet(packet).await,
            None => {
                debug!("Not connected, dropping {:?} packet", packet.kind);
                Ok(())
            }
        }
    }

    /// 关闭连接，可重复调用
    pub async fn close(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        self.reading.store(false, Ordering::SeqCst);

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }

        let opened = *self.state.borrow() != SessionState::Disconnected;
        if opened {
            self.state.send_replace(SessionState::Closed);
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

/// 连接并等待加入结果
pub async fn connect_to_server(
    config: TransportConfig,
    host: &str,
    port: u16,
    username: &str,
) -> Result<(ClientSession, JoinOutcome)> {
    let mut session = ClientSession::new(config);
    let handshake = session.connect(host, port, username).await?;
    let outcome = handshake.outcome().await?;
    Ok((session, outcome))
}

/// 读循环，连接结束或解码失败时退出
async fn read_loop(
    mut reader: Reader,
    reading: Arc<AtomicBool>,
    state: Arc<watch::Sender<SessionState>>,
    writer: Arc<Mutex<Option<Writer>>>,
    events: EventSink,
    outcome_tx: oneshot::Sender<Result<JoinOutcome>>,
) {
    let mut outcome_tx = Some(outcome_tx);

    let reason = loop {
        match reader.read_packet().await {
            Ok(packet) => {
                if let Some(reason) = packet.deny_reason() {
                    info!("Join denied: {}", reason);
                    reading.store(false, Ordering::SeqCst);
                    state.send_replace(SessionState::Denied(reason));
                    resolve(&mut outcome_tx, Ok(JoinOutcome::Denied(reason)));
                    events.emit(ClientEvent::Denied(reason));
                    close_writer(&writer).await;
                    return;
                }

                match packet.kind {
                    PacketKind::AllowConnection => {
                        info!("Joined server");
                        state.send_replace(SessionState::Registered);
                        resolve(&mut outcome_tx, Ok(JoinOutcome::Registered));
                        events.emit(ClientEvent::Registered);
                    }
                    PacketKind::Unexpected => {
                        warn!("Server reported unexpected request: {}", packet.payload);
                        events.emit(ClientEvent::Unexpected(packet.payload));
                    }
                    kind => {
                        warn!("Ignoring {:?} packet from server", kind);
                    }
                }
            }
            Err(ProtocolError::ConnectionClosed) => {
                info!("Server closed connection");
                reading.store(false, Ordering::SeqCst);
                state.send_replace(SessionState::Closed);
                resolve(&mut outcome_tx, Err(ProtocolError::ConnectionClosed));
                break "connection closed by server".to_string();
            }
            Err(ProtocolError::Decode(e)) => {
                // 保留最后一个有效状态
                warn!("Stopping read loop after decode error: {}", e);
                reading.store(false, Ordering::SeqCst);
                let reason = e.to_string();
                resolve(&mut outcome_tx, Err(ProtocolError::Decode(e)));
                break reason;
            }
            Err(e) => {
                warn!("Receive error: {}", e);
                reading.store(false, Ordering::SeqCst);
                state.send_replace(SessionState::Closed);
                let reason = e.to_string();
                resolve(&mut outcome_tx, Err(e));
                break reason;
            }
        }
    };

    close_writer(&writer).await;
    events.emit(ClientEvent::Disconnected { reason });
}

fn resolve(
    outcome_tx: &mut Option<oneshot::Sender<Result<JoinOutcome>>>,
    outcome: Result<JoinOutcome>,
) {
    if let Some(tx) = outcome_tx.take() {
        let _ = tx.send(outcome);
    }
}

async fn close_writer(writer: &Mutex<Option<Writer>>) {
    let writer = writer.lock().await.take();
    if let Some(mut writer) = writer {
        let _ = writer.shutdown().await;
    }
}
