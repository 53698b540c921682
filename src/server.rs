// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 网关服务器
//!
//! 每个接受的连接对应一个独立的 Tokio 任务：读取头部块，构造有界请求体，交给路由器分发，
//! 最后关闭写入端。停机信号到达后不再接受新连接，并等待仍在处理的连接自然结束。

use std::{
    future::Future,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

#[cfg(unix)]
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};

#[cfg(unix)]
use tokio::net::UnixListener;

use crate::{
    config::Config,
    header::read_header,
    request::{reader_from, Body},
    response::Output,
    router::{Registry, Router},
};

/// 可以承载网关连接的双向字节流
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// 所有连接共享的只读状态
pub struct Gateway {
    router: Router,
    max_head: usize,
    max_body: u64,
    active: AtomicUsize,
}

impl Gateway {
    pub fn new(router: Router, max_head: usize, max_body: u64) -> Self {
        Self {
            router,
            max_head,
            max_body,
            active: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &Config, registry: Registry) -> Self {
        Self::new(
            Router::new(config.prefix(), registry),
            config.max_head_size(),
            config.max_body_size(),
        )
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// 当前仍在处理的连接数
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// 连接计数守卫，任务结束（包括 panic）时计数减一
struct ActiveGuard(Arc<Gateway>);

impl ActiveGuard {
    fn enter(gateway: &Arc<Gateway>) -> Self {
        gateway.active.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(gateway))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// # 连接处理器
///
/// 头部块解析失败时以缺省上下文写出错误响应，不会调用任何处理器。
pub async fn handle_connection<S>(stream: S, id: u128, gateway: Arc<Gateway>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let start_time = Instant::now();
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = reader_from(read_half);
    let mut out = Output::from_writer(write_half, id);

    match read_header(&mut reader, gateway.max_head, id).await {
        Ok(mut headers) => {
            debug!("[ID{}]头部块解析完毕，共{}项", id, headers.len());
            let content_length = headers.content_length().unwrap_or(0);
            let mut body = Body::new(reader, content_length, gateway.max_body, id);
            gateway.router.dispatch(&mut headers, &mut body, &mut out).await;
        }
        Err(e) => {
            warn!("[ID{}]头部块无效: {}", id, e);
            e.write(None, &mut out).await;
        }
    }
    out.shutdown().await;
    debug!("[ID{}]连接处理完毕，用时{}ms", id, start_time.elapsed().as_millis());
}

/// 监听器：TCP 或 Unix 套接字
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener, PathBuf),
}

impl Listener {
    /// 按配置绑定。设置了 `unix_socket` 时优先使用 Unix 套接字。
    pub async fn bind(config: &Config) -> io::Result<Self> {
        match config.unix_socket() {
            #[cfg(unix)]
            Some(path) => Self::bind_unix(path),
            #[cfg(not(unix))]
            Some(_) => {
                warn!("当前平台不支持Unix套接字，改为监听TCP端口");
                Self::bind_tcp(config.host(), config.port()).await
            }
            None => Self::bind_tcp(config.host(), config.port()).await,
        }
    }

    pub async fn bind_tcp(host: &str, port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        info!("服务端将在{}上监听Socket连接", listener.local_addr()?);
        Ok(Listener::Tcp(listener))
    }

    /// 绑定 Unix 套接字，先删除残留的套接字文件
    #[cfg(unix)]
    pub fn bind_unix(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        match std::fs::remove_file(&path) {
            Ok(()) => info!("已删除残留的套接字文件{}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let listener = UnixListener::bind(&path)?;
        info!("服务端将在{}上监听Socket连接", path.display());
        Ok(Listener::Unix(listener, path))
    }

    /// TCP 监听器的本地地址
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Listener::Unix(..) => None,
        }
    }

    async fn accept(&self) -> io::Result<(Box<dyn Stream>, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                Ok((Box::new(stream), addr.to_string()))
            }
            #[cfg(unix)]
            Listener::Unix(listener, path) => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), path.display().to_string()))
            }
        }
    }

    fn close(self) {
        match self {
            Listener::Tcp(listener) => drop(listener),
            #[cfg(unix)]
            Listener::Unix(listener, path) => {
                drop(listener);
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("无法删除套接字文件{}: {}", path.display(), e);
                }
            }
        }
    }
}

/// # 主事件循环
///
/// 持续接收新连接并分发到 Tokio 线程池，直到 `shutdown` 完成。
/// 返回前等待所有仍在处理的连接结束。
pub async fn serve<F>(listener: Listener, gateway: Arc<Gateway>, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut id: u128 = 0;

    loop {
        let (stream, peer) = tokio::select! {
            _ = &mut shutdown => {
                info!("主循环接收到停机指令，正在退出...");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("接受连接时遇到错误: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };
        debug!("[ID{}]新的连接：{}", id, peer);

        let guard = ActiveGuard::enter(&gateway);
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            let _guard = guard;
            handle_connection(stream, id, gateway).await;
        });
        id += 1;
    }

    listener.close();
    let mut waited = false;
    while gateway.active_connections() > 0 {
        if !waited {
            info!("等待{}个连接处理完毕", gateway.active_connections());
            waited = true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    info!("服务器已停止");
}
