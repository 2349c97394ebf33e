//! 连接封装
//!
//! 把传输层和行帧编解码组合成按数据包收发的双向通道。

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{PacketReader, PacketWriter};
use crate::error::Result;
use crate::packet::Packet;
use crate::transport::Transport;

/// 连接封装
///
/// 同一时刻只允许一个读取者和一个写入者；需要并发读写时先 `split`。
pub struct Connection<R, W> {
    reader: PacketReader<R>,
    writer: PacketWriter<W>,
    peer: Option<SocketAddr>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Connection<R, W> {
    /// 从传输层创建连接
    pub fn new<T: Transport<Reader = R, Writer = W>>(transport: T) -> Self {
        let peer = transport.peer_addr();
        let (reader, writer) = transport.split();
        Self {
            reader: PacketReader::new(reader),
            writer: PacketWriter::new(writer),
            peer,
        }
    }

    /// 从读写端直接创建连接
    pub fn from_parts(reader: R, writer: W) -> Self {
        Self {
            reader: PacketReader::new(reader),
            writer: PacketWriter::new(writer),
            peer: None,
        }
    }

    /// 对端地址
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// 分离为读取端和写入端
    pub fn split(self) -> (PacketReader<R>, PacketWriter<W>) {
        (self.reader, self.writer)
    }

    /// 接收数据包
    pub async fn recv(&mut self) -> Result<Packet> {
        self.reader.read_packet().await
    }

    /// 发送数据包
    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        self.writer.write_packet(packet).await
    }
}
