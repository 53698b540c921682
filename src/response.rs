// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 网关响应构建模块
//!
//! 响应在线上的形状为：
//!
//! ```text
//! Status: <状态码> <原因短语>\r\n
//! Name: value\r\n
//! ...
//! \r\n
//! <响应体>
//! ```
//!
//! `write_http` 接受显式的头部与原始字节，`write_message` 接受结构化的 `Message`，
//! 两者产生同样的线上形状。写入时遇到的传输错误只记录日志，不向上抛出。

use std::io;

use bytes::Bytes;
use log::{debug, error, info, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{header::HeaderMap, param::*};

/// 连接写入端的统一类型
pub type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// 响应输出端。
///
/// 对端断开后写入会被静默丢弃，处理任务不会因此崩溃。
pub struct Output {
    writer: Writer,
    closed: bool,
    written: bool,
    id: u128,
}

impl Output {
    pub fn new(writer: Writer, id: u128) -> Self {
        Self {
            writer,
            closed: false,
            written: false,
            id,
        }
    }

    pub fn from_writer<W>(inner: W, id: u128) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::new(Box::new(inner), id)
    }

    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 是否已有数据写入连接（包括写入失败的尝试）
    pub fn has_written(&self) -> bool {
        self.written
    }

    /// 写入并排空（flush）一段数据，成功返回 `true`
    pub async fn write(&mut self, data: &[u8]) -> bool {
        if self.closed {
            debug!("[ID{}]连接已关闭，丢弃{}字节", self.id, data.len());
            return false;
        }
        self.written = true;
        let result = match self.writer.write_all(data).await {
            Ok(()) => self.writer.flush().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                if is_peer_reset(&e) {
                    warn!("[ID{}]对端已断开，写入失败: {}", self.id, e);
                } else {
                    error!("[ID{}]写入连接时遇到错误: {}", self.id, e);
                }
                self.closed = true;
                false
            }
        }
    }

    /// 关闭写入端
    pub async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.writer.shutdown().await {
            debug!("[ID{}]关闭连接时遇到错误: {}", self.id, e);
        }
    }
}

fn is_peer_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

/// 结构化响应：有序头部 + 已编码的响应体
#[derive(Debug, Clone, Default)]
pub struct Message {
    headers: HeaderMap,
    body: Bytes,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// 纯文本响应
    pub fn text(text: impl Into<String>) -> Self {
        Self::new()
            .header("Content-Type", DEFAULT_CONTENT_TYPE)
            .body(text.into().into_bytes())
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }
}

/// 将状态码、头部与响应体编码为线上字节
pub fn encode(status: u16, headers: &HeaderMap, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + body.len());
    out.extend_from_slice(format!("Status: {} {}{}", status, status_phrase(status), CRLF).as_bytes());
    for (key, value) in headers.iter() {
        out.extend_from_slice(format!("{}: {}{}", key, value, CRLF).as_bytes());
    }
    out.extend_from_slice(CRLF.as_bytes());
    out.extend_from_slice(body);
    out
}

/// 请求上下文缺失时使用的最小占位上下文
fn context_or_default(req: Option<&HeaderMap>) -> HeaderMap {
    match req {
        Some(headers) => headers.clone(),
        None => {
            let mut placeholder = HeaderMap::new();
            placeholder.append(REQUEST_METHOD, "GET");
            placeholder
        }
    }
}

fn access_log(req: &HeaderMap, status: u16, id: u128) {
    info!(
        "[ID{}] {}, {}, {}, {}",
        id,
        req.method().unwrap_or("-"),
        req.request_uri().unwrap_or("-"),
        status,
        status_phrase(status),
    );
}

/// 原始形式：显式的状态码、头部与响应体字节
pub async fn write_http(
    req: Option<&HeaderMap>,
    out: &mut Output,
    status: u16,
    mut headers: HeaderMap,
    body: &[u8],
) {
    let req = context_or_default(req);
    if !body.is_empty() && !headers.contains("Content-Type") {
        headers.append("Content-Type", DEFAULT_CONTENT_TYPE);
    }
    access_log(&req, status, out.id());
    out.write(&encode(status, &headers, body)).await;
}

/// 结构化形式：状态码 + `Message`，缺少 `X-Server` 时自动补上
pub async fn write_message(req: Option<&HeaderMap>, out: &mut Output, status: u16, resp: Message) {
    let req = context_or_default(req);
    let Message { mut headers, body } = resp;
    if !body.is_empty() && !headers.contains("Content-Type") {
        headers.append("Content-Type", DEFAULT_CONTENT_TYPE);
    }
    if !headers.contains("X-Server") {
        headers.append("X-Server", SERVER_NAME);
    }
    access_log(&req, status, out.id());
    out.write(&encode(status, &headers, &body)).await;
}
