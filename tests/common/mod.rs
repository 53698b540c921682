// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use scgi_gateway::{
    header::encode_header, param::*, serve, DebugDump, Gateway, Listener, Registry, Router,
    WebSocket,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
    task::JoinHandle,
};

/// 在随机端口上运行的网关服务器
pub struct TestServer {
    pub addr: SocketAddr,
    pub gateway: Arc<Gateway>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(prefix: &str, max_head: usize, max_body: u64) -> Self {
        let mut registry = Registry::new();
        registry
            .register("websocket", || Arc::new(WebSocket))
            .register("debug", || Arc::new(DebugDump));
        let gateway = Arc::new(Gateway::new(Router::new(prefix, registry), max_head, max_body));

        let listener = Listener::bind_tcp("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(listener, Arc::clone(&gateway), async move {
            let _ = stopped.await;
        }));
        Self {
            addr,
            gateway,
            stop,
            task,
        }
    }

    pub async fn with_defaults() -> Self {
        Self::start("", 1 << 20, 1 << 20).await
    }

    pub async fn stop(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap();
    }

    /// 发送原始字节并读取直到服务器关闭连接
    pub async fn exchange(&self, raw: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        read_all(&mut stream).await
    }

    /// 发送部分数据后关闭写入端
    pub async fn exchange_truncated(&self, raw: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        stream.shutdown().await.unwrap();
        read_all(&mut stream).await
    }
}

async fn read_all(stream: &mut TcpStream) -> Vec<u8> {
    let mut reply = Vec::new();
    // 设置硬超时限制，防止测试用例因服务器挂起而永久阻塞
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut reply))
        .await
        .expect("server did not close the connection")
        .unwrap();
    reply
}

/// 构造一个完整的网关请求：头部块 + 请求体
pub fn request(method: &str, uri: &str, extra: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let length = body.len().to_string();
    let mut pairs = vec![
        (CONTENT_LENGTH, length.as_str()),
        (SCGI_MARKER, SCGI_VERSION),
        (REQUEST_METHOD, method),
        (REQUEST_URI, uri),
        (HTTP_USER_AGENT, "gateway-test/1.0"),
    ];
    pairs.extend_from_slice(extra);
    let mut raw = encode_header(&pairs);
    raw.extend_from_slice(body);
    raw
}

/// 从响应中提取状态码
pub fn status_of(reply: &[u8]) -> u16 {
    String::from_utf8_lossy(reply)
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("Status: "))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}

/// 拆分响应头部与响应体
pub fn split_reply(reply: &[u8]) -> (String, Vec<u8>) {
    match reply.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(p) => (
            String::from_utf8_lossy(&reply[..p + 4]).to_string(),
            reply[p + 4..].to_vec(),
        ),
        None => (String::from_utf8_lossy(reply).to_string(), Vec::new()),
    }
}
