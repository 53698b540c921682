// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # WebSocket 帧编解码模块
//!
//! 帧的线上布局（RFC 6455）：
//!
//! ```text
//! byte0 = FIN(1) RSV(3) OPCODE(4)
//! byte1 = MASK(1) LEN(7)
//! [扩展长度：2 或 8 字节，大端序]
//! [掩码密钥：4 字节]
//! 负载
//! ```
//!
//! `Message` 是一个或多个帧重组后的逻辑消息。只有第一帧携带真正的操作码与保留位，
//! 后续帧使用 `Continuation` 操作码，直到遇到 FIN=1 的帧为止。

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt};

/// 单个帧负载长度的上限（2^63 - 1）
pub const MAX_FRAME_PAYLOAD: u64 = (1 << 63) - 1;

/// 控制帧负载长度的上限
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

/// 关闭状态码
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
pub const CLOSE_NO_STATUS: u16 = 1005;
pub const CLOSE_TOO_BIG: u16 = 1009;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// 协议保留的操作码，原样传递
    Reserved(u8),
}

impl Opcode {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x0f {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xa => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xa,
            Opcode::Reserved(other) => other & 0x0f,
        }
    }

    pub fn is_control(self) -> bool {
        self.as_u8() & 0x08 != 0
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Continuation => write!(f, "CONTINUATION"),
            Opcode::Text => write!(f, "TEXT"),
            Opcode::Binary => write!(f, "BINARY"),
            Opcode::Close => write!(f, "CLOSE"),
            Opcode::Ping => write!(f, "PING"),
            Opcode::Pong => write!(f, "PONG"),
            Opcode::Reserved(other) => write!(f, "{}", other),
        }
    }
}

/// 发送方角色：客户端发出的帧必须加掩码，服务端发出的帧不加
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    pub fn masks(self) -> bool {
        matches!(self, Role::Client)
    }
}

/// 协议违规。每种违规对应一个关闭状态码。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// 没有起始帧的延续帧
    UnexpectedContinuation,
    /// 消息尚未结束时收到新的数据帧
    ExpectedContinuation(Opcode),
    /// 延续帧上出现保留位
    ReservedBits(u8),
    /// 分片的控制帧
    FragmentedControl(Opcode),
    /// 控制帧负载超过 125 字节
    ControlTooLarge(u64),
    /// 扩展长度的最高位被置位
    InvalidLength(u64),
    /// 消息超过配置的上限
    MessageTooLarge { limit: u64 },
}

impl ProtocolError {
    pub fn close_code(&self) -> u16 {
        match self {
            ProtocolError::MessageTooLarge { .. } => CLOSE_TOO_BIG,
            _ => CLOSE_PROTOCOL_ERROR,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnexpectedContinuation => write!(f, "Continuation frame without a message"),
            ProtocolError::ExpectedContinuation(op) => {
                write!(f, "Expected continuation frame, got {}", op)
            }
            ProtocolError::ReservedBits(rsv) => {
                write!(f, "Reserved bits {:#05b} set on continuation frame", rsv)
            }
            ProtocolError::FragmentedControl(op) => write!(f, "Fragmented {} control frame", op),
            ProtocolError::ControlTooLarge(len) => {
                write!(f, "Control frame payload of {} bytes", len)
            }
            ProtocolError::InvalidLength(len) => write!(f, "Invalid frame length {}", len),
            ProtocolError::MessageTooLarge { limit } => {
                write!(f, "Message exceeds {} bytes", limit)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// 用掩码密钥对数据逐字节异或，密钥每 4 字节循环一次
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// 单个帧。`payload` 总是保存解除掩码后的数据。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub rsv: u8,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload: Bytes,
}

impl Frame {
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let len = self.payload.len() as u64;
        buf.reserve(14 + self.payload.len());
        buf.put_u8(((self.fin as u8) << 7) | ((self.rsv & 0x07) << 4) | self.opcode.as_u8());

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0x00 };
        if len < 126 {
            buf.put_u8(mask_bit | len as u8);
        } else if len < (1 << 16) {
            buf.put_u8(mask_bit | 126);
            buf.put_u16(len as u16);
        } else {
            buf.put_u8(mask_bit | 127);
            buf.put_u64(len);
        }

        match self.mask {
            Some(key) => {
                buf.put_slice(&key);
                let start = buf.len();
                buf.put_slice(&self.payload);
                apply_mask(&mut buf[start..], key);
            }
            None => buf.put_slice(&self.payload),
        }
    }
}

/// 读取单个帧。流在读取过程中结束时返回 `Ok(None)`。
///
/// `budget` 限制数据帧负载的长度，控制帧另有 125 字节的上限。
pub async fn read_frame<R>(reader: &mut R, budget: u64) -> Result<Option<Frame>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    if reader.read_exact(&mut head).await.is_err() {
        return Ok(None);
    }
    let fin = head[0] & 0x80 != 0;
    let rsv = (head[0] >> 4) & 0x07;
    let opcode = Opcode::from_u8(head[0]);
    let masked = head[1] & 0x80 != 0;

    let len = match head[1] & 0x7f {
        126 => match reader.read_u16().await {
            Ok(l) => l as u64,
            Err(_) => return Ok(None),
        },
        127 => match reader.read_u64().await {
            Ok(l) => l,
            Err(_) => return Ok(None),
        },
        l => l as u64,
    };
    if len > MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::InvalidLength(len));
    }
    if opcode.is_control() {
        if !fin {
            return Err(ProtocolError::FragmentedControl(opcode));
        }
        if len > MAX_CONTROL_PAYLOAD {
            return Err(ProtocolError::ControlTooLarge(len));
        }
    } else if len > budget {
        return Err(ProtocolError::MessageTooLarge { limit: budget });
    }

    let mask = if masked {
        let mut key = [0u8; 4];
        if reader.read_exact(&mut key).await.is_err() {
            return Ok(None);
        }
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    if reader.read_exact(&mut payload).await.is_err() {
        return Ok(None);
    }
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }
    Ok(Some(Frame {
        fin,
        rsv,
        opcode,
        mask,
        payload: Bytes::from(payload),
    }))
}

/// 重组后的逻辑消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    rsv: u8,
    opcode: Opcode,
    payload: Bytes,
    masked: bool,
}

impl Message {
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            rsv: 0,
            opcode,
            payload: payload.into(),
            masked: false,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Opcode::Text, text.into().into_bytes())
    }

    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code);
        payload.put_slice(reason.as_bytes());
        Self::new(Opcode::Close, payload.freeze())
    }

    pub fn with_rsv(mut self, rsv: u8) -> Self {
        self.rsv = rsv & 0x07;
        self
    }

    pub fn with_mask(mut self, masked: bool) -> Self {
        self.masked = masked;
        self
    }

    pub fn rsv(&self) -> u8 {
        self.rsv
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn is_masked(&self) -> bool {
        self.masked
    }

    /// 关闭消息携带的状态码，没有时为 1005
    pub fn close_code(&self) -> u16 {
        match self.payload.get(..2) {
            Some(code) => u16::from_be_bytes([code[0], code[1]]),
            None => CLOSE_NO_STATUS,
        }
    }

    /// 将消息拆成帧，每帧负载不超过 `fragment_size`。
    ///
    /// 每帧独立生成新的掩码密钥；控制消息从不分片。
    pub fn frames(&self, fragment_size: u64) -> Vec<Frame> {
        let size = if self.opcode.is_control() {
            MAX_FRAME_PAYLOAD
        } else {
            fragment_size.clamp(1, MAX_FRAME_PAYLOAD)
        };
        let size = usize::try_from(size).unwrap_or(usize::MAX);

        let total = self.payload.len();
        let mut frames = Vec::with_capacity(total / size + 1);
        let mut offset = 0usize;
        loop {
            let len = size.min(total - offset);
            let first = offset == 0;
            let fin = offset + len == total;
            frames.push(Frame {
                fin,
                rsv: if first { self.rsv } else { 0 },
                opcode: if first { self.opcode } else { Opcode::Continuation },
                mask: self.masked.then(rand::random::<[u8; 4]>),
                payload: self.payload.slice(offset..offset + len),
            });
            offset += len;
            if fin {
                break;
            }
        }
        frames
    }

    /// 编码为单帧（负载超过 2^63 - 1 时自动分片）
    pub fn encode(&self) -> Bytes {
        self.encode_fragmented(MAX_FRAME_PAYLOAD)
    }

    pub fn encode_fragmented(&self, fragment_size: u64) -> Bytes {
        let mut buf = BytesMut::new();
        for frame in self.frames(fragment_size) {
            frame.encode_into(&mut buf);
        }
        buf.freeze()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"<WebSocket rsv="{}" opcode="{}" mask="{}">"#,
            self.rsv, self.opcode, self.masked
        )?;
        match self.opcode {
            Opcode::Text => write!(f, "{}", String::from_utf8_lossy(&self.payload))?,
            Opcode::Close => write!(f, "{}", self.close_code())?,
            _ => write!(f, "{} bytes", self.payload.len())?,
        }
        write!(f, "</WebSocket>")
    }
}

/// 尚未收到 FIN 帧的数据消息
struct Partial {
    rsv: u8,
    opcode: Opcode,
    masked: bool,
    data: BytesMut,
}

/// 每个连接一个的有状态消息读取器
pub struct FrameReader {
    max_message: u64,
    partial: Option<Partial>,
}

impl FrameReader {
    pub fn new(max_message: u64) -> Self {
        Self {
            max_message,
            partial: None,
        }
    }

    /// 读取下一条完整消息。流结束时返回 `Ok(None)`。
    ///
    /// 分片之间插入的控制帧会立即返回，未完成的数据消息保留到下一次调用。
    pub async fn read_message<R>(&mut self, reader: &mut R) -> Result<Option<Message>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let used = self.partial.as_ref().map_or(0, |p| p.data.len() as u64);
            let budget = self.max_message.saturating_sub(used);
            let frame = match read_frame(reader, budget).await {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(None),
                Err(ProtocolError::MessageTooLarge { .. }) => {
                    return Err(ProtocolError::MessageTooLarge {
                        limit: self.max_message,
                    })
                }
                Err(e) => return Err(e),
            };

            if frame.opcode.is_control() {
                return Ok(Some(Message {
                    rsv: frame.rsv,
                    opcode: frame.opcode,
                    payload: frame.payload,
                    masked: frame.mask.is_some(),
                }));
            }

            match (self.partial.take(), frame.opcode) {
                (None, Opcode::Continuation) => return Err(ProtocolError::UnexpectedContinuation),
                (Some(_), opcode) if opcode != Opcode::Continuation => {
                    return Err(ProtocolError::ExpectedContinuation(opcode))
                }
                (Some(mut partial), _) => {
                    if frame.rsv != 0 {
                        return Err(ProtocolError::ReservedBits(frame.rsv));
                    }
                    partial.data.extend_from_slice(&frame.payload);
                    if frame.fin {
                        return Ok(Some(Message {
                            rsv: partial.rsv,
                            opcode: partial.opcode,
                            payload: partial.data.freeze(),
                            masked: partial.masked,
                        }));
                    }
                    self.partial = Some(partial);
                }
                (None, opcode) => {
                    if frame.fin {
                        return Ok(Some(Message {
                            rsv: frame.rsv,
                            opcode,
                            payload: frame.payload,
                            masked: frame.mask.is_some(),
                        }));
                    }
                    debug!("收到分片消息的起始帧: {}", opcode);
                    self.partial = Some(Partial {
                        rsv: frame.rsv,
                        opcode,
                        masked: frame.mask.is_some(),
                        data: BytesMut::from(&frame.payload[..]),
                    });
                }
            }
        }
    }
}
