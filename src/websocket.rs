// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # WebSocket 升级处理器
//!
//! 握手成功后在同一条连接上运行回声循环：文本原样返回，PING 回复 PONG，
//! 收到 CLOSE 时回送后结束。

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, info, warn};
use sha1::{Digest, Sha1};
use tokio::io::AsyncRead;

use crate::{
    exception::{Exception, HandlerResult},
    frame::{FrameReader, Message, Opcode, Role},
    header::HeaderMap,
    param::*,
    request::Body,
    response::{write_http, Output},
    router::{Handler, HandlerFuture},
};

/// 计算 `Sec-WebSocket-Accept`：`base64(SHA-1(key + GUID))`
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

pub struct WebSocket;

impl WebSocket {
    async fn serve(&self, headers: &HeaderMap, body: &mut Body, out: &mut Output) -> HandlerResult {
        let id = out.id();
        let upgrade = headers
            .get(HTTP_UPGRADE)
            .map_or(false, |v| v.trim().eq_ignore_ascii_case(WEBSOCKET_TOKEN));
        if !upgrade {
            return Err(Exception::new(400, "Bad request").into());
        }
        let key = match headers.get(HTTP_SEC_WEBSOCKET_KEY) {
            Some(key) if !key.trim().is_empty() => key,
            _ => return Err(Exception::new(400, "Missing websocket key").into()),
        };

        let mut reply = HeaderMap::new();
        reply.append("Upgrade", WEBSOCKET_TOKEN);
        reply.append("Connection", "Upgrade");
        reply.append("Sec-WebSocket-Accept", accept_key(key));
        write_http(Some(headers), out, 101, reply, b"").await;
        if out.is_closed() {
            return Ok(());
        }
        info!("[ID{}]WebSocket 连接已建立", id);

        let mut frames = FrameReader::new(body.limit());
        run(body.stream(), out, &mut frames).await;
        info!("[ID{}]WebSocket 连接已结束", id);
        Ok(())
    }
}

impl Handler for WebSocket {
    fn call<'a>(
        &'a self,
        headers: &'a mut HeaderMap,
        body: &'a mut Body,
        out: &'a mut Output,
    ) -> HandlerFuture<'a> {
        Box::pin(self.serve(headers, body, out))
    }
}

/// 回声循环，直到对端关闭、流结束或出现协议错误
pub async fn run<R>(reader: &mut R, out: &mut Output, frames: &mut FrameReader)
where
    R: AsyncRead + Unpin,
{
    let id = out.id();
    let masked = Role::Server.masks();
    loop {
        let message = match frames.read_message(reader).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("[ID{}]WebSocket 流已结束", id);
                break;
            }
            Err(e) => {
                warn!("[ID{}]WebSocket 协议错误: {}", id, e);
                let close = Message::close(e.close_code(), &e.to_string()).with_mask(masked);
                out.write(&close.encode()).await;
                break;
            }
        };
        debug!("[ID{}]收到消息: {}", id, message);

        match message.opcode() {
            Opcode::Text => {
                out.write(&message.with_mask(masked).encode()).await;
            }
            Opcode::Ping => {
                let pong = Message::new(Opcode::Pong, message.payload().clone()).with_mask(masked);
                out.write(&pong.encode()).await;
            }
            Opcode::Close => {
                out.write(&message.with_mask(masked).encode()).await;
                break;
            }
            other => debug!("[ID{}]忽略 {} 消息", id, other),
        }
        if out.is_closed() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR, CLOSE_TOO_BIG};
    use crate::request::reader_from;
    use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt, DuplexStream};

    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn upgrade_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.append(REQUEST_METHOD, "GET");
        headers.append(REQUEST_URI, "/websocket");
        headers.append(HTTP_UPGRADE, "WebSocket");
        headers.append(HTTP_SEC_WEBSOCKET_KEY, SAMPLE_KEY);
        headers
    }

    /// 在后台运行处理器，返回客户端一侧的流
    fn spawn_handler(mut headers: HeaderMap, limit: u64) -> DuplexStream {
        let (client, server) = duplex(1 << 16);
        let (read_half, write_half) = split(server);
        tokio::spawn(async move {
            let mut body = Body::new(reader_from(read_half), 0, limit, 1);
            let mut out = Output::from_writer(write_half, 1);
            let result = WebSocket.call(&mut headers, &mut body, &mut out).await;
            if let Err(crate::exception::HandlerError::Response(e)) = result {
                e.write(Some(&headers), &mut out).await;
            }
            out.shutdown().await;
        });
        client
    }

    async fn read_reply(client: &mut DuplexStream) -> (String, Vec<Message>) {
        let mut raw = Vec::new();
        client.read_to_end(&mut raw).await.unwrap();
        let split_at = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|p| p + 4)
            .unwrap_or(raw.len());
        let head = String::from_utf8_lossy(&raw[..split_at]).to_string();

        let mut rest = &raw[split_at..];
        let mut frames = FrameReader::new(1 << 20);
        let mut messages = Vec::new();
        while let Ok(Some(message)) = frames.read_message(&mut rest).await {
            messages.push(message);
        }
        (head, messages)
    }

    #[test]
    fn test_accept_key_sample() {
        assert_eq!(accept_key(SAMPLE_KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[tokio::test]
    async fn test_handshake_and_echo() {
        let mut client = spawn_handler(upgrade_headers(), 1 << 20);
        let mut outgoing = Vec::new();
        outgoing.extend_from_slice(&Message::text("hello").with_mask(true).encode());
        outgoing.extend_from_slice(&Message::new(Opcode::Ping, &b"p"[..]).with_mask(true).encode());
        outgoing.extend_from_slice(&Message::close(CLOSE_NORMAL, "").with_mask(true).encode());
        client.write_all(&outgoing).await.unwrap();

        let (head, messages) = read_reply(&mut client).await;
        assert!(head.starts_with("Status: 101 "));
        assert!(head.contains("Upgrade: websocket\r\n"));
        assert!(head.contains("Connection: Upgrade\r\n"));
        assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].opcode(), Opcode::Text);
        assert_eq!(&messages[0].payload()[..], b"hello");
        assert!(!messages[0].is_masked());
        assert_eq!(messages[1].opcode(), Opcode::Pong);
        assert_eq!(&messages[1].payload()[..], b"p");
        assert_eq!(messages[2].opcode(), Opcode::Close);
        assert_eq!(messages[2].close_code(), CLOSE_NORMAL);
    }

    /// 分片的文本消息被重组后一次性回送
    #[tokio::test]
    async fn test_fragmented_echo() {
        let mut client = spawn_handler(upgrade_headers(), 1 << 20);
        let text = "fragmented message body";
        let mut outgoing = Message::text(text).with_mask(true).encode_fragmented(5).to_vec();
        outgoing.extend_from_slice(&Message::close(CLOSE_NORMAL, "").with_mask(true).encode());
        client.write_all(&outgoing).await.unwrap();

        let (_, messages) = read_reply(&mut client).await;
        assert_eq!(&messages[0].payload()[..], text.as_bytes());
    }

    #[tokio::test]
    async fn test_binary_is_ignored() {
        let mut client = spawn_handler(upgrade_headers(), 1 << 20);
        let mut outgoing = Message::new(Opcode::Binary, vec![1u8, 2, 3]).with_mask(true).encode().to_vec();
        outgoing.extend_from_slice(&Message::close(CLOSE_NORMAL, "").with_mask(true).encode());
        client.write_all(&outgoing).await.unwrap();

        let (_, messages) = read_reply(&mut client).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].opcode(), Opcode::Close);
    }

    #[tokio::test]
    async fn test_protocol_error_sends_close() {
        let mut client = spawn_handler(upgrade_headers(), 1 << 20);
        client.write_all(&[0x80, 0x80, 0, 0, 0, 0]).await.unwrap();

        let (_, messages) = read_reply(&mut client).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].opcode(), Opcode::Close);
        assert_eq!(messages[0].close_code(), CLOSE_PROTOCOL_ERROR);
    }

    #[tokio::test]
    async fn test_message_too_big_sends_close() {
        let mut client = spawn_handler(upgrade_headers(), 8);
        client
            .write_all(&Message::text("longer than eight").with_mask(true).encode())
            .await
            .unwrap();

        let (_, messages) = read_reply(&mut client).await;
        assert_eq!(messages[0].close_code(), CLOSE_TOO_BIG);
    }

    /// 对端直接断开时循环结束
    #[tokio::test]
    async fn test_eof_ends_loop() {
        let mut client = spawn_handler(upgrade_headers(), 1 << 20);
        client.shutdown().await.unwrap();
        let (head, messages) = read_reply(&mut client).await;
        assert!(head.starts_with("Status: 101 "));
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_missing_upgrade_is_rejected() {
        let mut headers = upgrade_headers();
        headers.set(HTTP_UPGRADE, "h2c");
        let mut client = spawn_handler(headers, 1 << 20);
        let (head, _) = read_reply(&mut client).await;
        assert!(head.starts_with("Status: 400 "));
    }

    #[tokio::test]
    async fn test_missing_key_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.append(REQUEST_METHOD, "GET");
        headers.append(REQUEST_URI, "/websocket");
        headers.append(HTTP_UPGRADE, "websocket");
        let mut client = spawn_handler(headers, 1 << 20);

        let mut raw = Vec::new();
        client.read_to_end(&mut raw).await.unwrap();
        let text = String::from_utf8_lossy(&raw);
        assert!(text.starts_with("Status: 400 "));
        assert!(text.ends_with("Missing websocket key"));
    }
}
