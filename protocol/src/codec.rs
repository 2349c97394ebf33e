//! 行帧编解码
//!
//! 帧格式:
//! ```text
//! ┌──────────────────┬───────────┬────────────────────┬──────┐
//! │ Kind (ASCII 数字) │ 0x1F (US) │   Payload (UTF-8)  │  \n  │
//! └──────────────────┴───────────┴────────────────────┴──────┘
//! ```

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{DecodeError, ProtocolError, Result};
use crate::packet::{Packet, PacketKind};
use crate::{FIELD_SEPARATOR, LINE_TERMINATOR, MAX_LINE_LEN};

/// 将数据包编码为一行（含结束符）
pub fn encode(packet: &Packet) -> Vec<u8> {
    let ordinal = packet.kind.ordinal().to_string();
    let mut line = Vec::with_capacity(ordinal.len() + packet.payload.len() + 2);
    line.extend_from_slice(ordinal.as_bytes());
    line.push(FIELD_SEPARATOR);
    line.extend_from_slice(packet.payload.as_bytes());
    line.push(LINE_TERMINATOR);
    line
}

/// 解码一行，结尾的换行符（含 `\r\n`）可有可无
pub fn decode(bytes: &[u8]) -> std::result::Result<Packet, DecodeError> {
    let line = bytes.strip_suffix(&[LINE_TERMINATOR]).unwrap_or(bytes);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let sep = line
        .iter()
        .position(|&b| b == FIELD_SEPARATOR)
        .ok_or_else(|| DecodeError::Malformed("missing field separator".to_string()))?;
    let (head, payload) = (&line[..sep], &line[sep + 1..]);

    if head.is_empty() || !head.iter().all(u8::is_ascii_digit) {
        return Err(DecodeError::Malformed(format!(
            "invalid kind ordinal {:?}",
            String::from_utf8_lossy(head)
        )));
    }

    // 全是数字但超出 u32 范围的序号同样视为未知类型
    let ordinal = String::from_utf8_lossy(head);
    let kind = ordinal
        .parse::<u32>()
        .ok()
        .and_then(PacketKind::from_ordinal)
        .ok_or_else(|| DecodeError::UnknownKind(ordinal.to_string()))?;

    let payload = std::str::from_utf8(payload)
        .map_err(|e| DecodeError::Malformed(format!("payload is not UTF-8: {}", e)))?;

    Ok(Packet::new(kind, payload))
}

/// 数据包读取器
pub struct PacketReader<R> {
    reader: BufReader<R>,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    /// 创建新的读取器
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buffer: Vec::with_capacity(256),
        }
    }

    /// 读取并解码一行
    pub async fn read_packet(&mut self) -> Result<Packet> {
        self.buffer.clear();

        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                // 对端关闭，半行数据直接丢弃
                return Err(ProtocolError::ConnectionClosed);
            }

            let (take, done) = match available.iter().position(|&b| b == LINE_TERMINATOR) {
                Some(pos) => (pos + 1, true),
                None => (available.len(), false),
            };

            let size = self.buffer.len() + take;
            if size > MAX_LINE_LEN {
                return Err(ProtocolError::LineTooLong {
                    size,
                    max: MAX_LINE_LEN,
                });
            }

            self.buffer.extend_from_slice(&available[..take]);
            self.reader.consume(take);

            if done {
                break;
            }
        }

        Ok(decode(&self.buffer)?)
    }

    /// 接收数据包（read_packet 的别名）
    pub async fn recv(&mut self) -> Result<Packet> {
        self.read_packet().await
    }
}

/// 数据包写入器
pub struct PacketWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    /// 创建新的写入器
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// 编码并写入一行
    pub async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        packet.validate()?;

        let line = encode(packet);
        if line.len() > MAX_LINE_LEN {
            return Err(ProtocolError::LineTooLong {
                size: line.len(),
                max: MAX_LINE_LEN,
            });
        }

        self.writer.write_all(&line).await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// 发送数据包（write_packet 的别名）
    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        self.write_packet(packet).await
    }

    /// 关闭写入端
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
