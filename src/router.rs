// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由引擎
//!
//! 由请求路径推导处理器名称，从注册表中解析并缓存处理器，然后调用它。
//!
//! ## 路由规则：
//! 1. 优先使用 `DOCUMENT_URI`，否则取 `REQUEST_URI` 中 `?` 之前的部分。
//! 2. 规范化后去掉配置的路径前缀，并把结果写回 `DOCUMENT_URI`。
//! 3. 第一段路径（去掉扩展名）即处理器名称，根路径对应 `index`。
//! 4. 处理器调用边界是唯一的恢复点：`Exception` 原样写回，其余失败统一转换为 400。

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use log::{debug, error, info, warn};

use crate::{
    cache::HandlerCache,
    exception::{HandlerError, HandlerResult},
    header::HeaderMap,
    param::*,
    request::Body,
    response::{write_message, Message, Output},
    util::{normalize_path, path_of_uri},
};

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;

/// 处理器只有一个入口：`(headers, body, output)`。
///
/// 处理器可以读取请求体并进行任意次写入；返回 `Err` 时由路由器负责写出错误响应。
pub trait Handler: Send + Sync {
    fn call<'a>(
        &'a self,
        headers: &'a mut HeaderMap,
        body: &'a mut Body,
        out: &'a mut Output,
    ) -> HandlerFuture<'a>;
}

/// 处理器来源：首次解析时调用一次，产生的入口在进程生命周期内被缓存
pub type HandlerSource = Box<dyn Fn() -> Arc<dyn Handler> + Send + Sync>;

/// 处理器注册表。在启动时填充来源，在请求时按需解析并缓存。
pub struct Registry {
    sources: HashMap<String, HandlerSource>,
    cache: HandlerCache,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            cache: HandlerCache::new(),
        }
    }

    /// 注册处理器来源，同名来源会被替换
    pub fn register<F>(&mut self, name: &str, source: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Handler> + Send + Sync + 'static,
    {
        if self.sources.insert(name.to_string(), Box::new(source)).is_some() {
            warn!("处理器{}被重复注册，使用最后一次注册的来源", name);
        }
        self
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// 解析处理器。缓存命中时不会再次调用来源；没有来源时不创建缓存条目。
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Handler>> {
        if let Some(handler) = self.cache.find(name) {
            return Some(handler);
        }
        let source = self.sources.get(name)?;
        debug!("首次解析处理器: {}", name);
        Some(self.cache.push(name, source()))
    }

    pub fn cache(&self) -> &HandlerCache {
        &self.cache
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Router {
    prefix: String,
    registry: Registry,
}

impl Router {
    pub fn new(prefix: &str, registry: Registry) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            registry,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 推导规范化的文档路径并写回 `DOCUMENT_URI`
    pub fn route_path(&self, headers: &mut HeaderMap) -> String {
        let raw = match headers.get(DOCUMENT_URI) {
            Some(uri) if !uri.is_empty() => uri.to_string(),
            _ => path_of_uri(headers.request_uri().unwrap_or("/")).to_string(),
        };
        let mut path = normalize_path(&raw);
        if !self.prefix.is_empty() {
            if let Some(rest) = path.strip_prefix(&self.prefix) {
                if rest.is_empty() || rest.starts_with('/') {
                    path = normalize_path(&format!("/{}", rest));
                }
            }
        }
        if !path.starts_with('/') {
            path = normalize_path(&format!("/{}", path));
        }
        headers.set(DOCUMENT_URI, path.clone());
        path
    }

    /// 分发请求。每条路径都恰好写出一个响应（升级协议除外）。
    pub async fn dispatch(&self, headers: &mut HeaderMap, body: &mut Body, out: &mut Output) {
        let id = out.id();
        let path = self.route_path(headers);
        let name = handler_name(&path);
        debug!("[ID{}]路径{}对应处理器{}", id, path, name);

        let handler = match self.registry.resolve(&name) {
            Some(handler) => handler,
            None => {
                warn!("[ID{}]请求的路径：{} 没有对应的处理器，返回404", id, path);
                let resp = Message::text(format!("File not found: {}", path));
                write_message(Some(headers), out, 404, resp).await;
                return;
            }
        };

        match handler.call(headers, body, out).await {
            Ok(()) => debug!("[ID{}]处理器{}执行完毕", id, name),
            // 已经写出过响应，不能再写第二个
            Err(HandlerError::Response(e)) if out.has_written() => {
                warn!("[ID{}]处理器{}在写出响应后返回错误: {}", id, name, e);
            }
            Err(HandlerError::Internal { kind, source }) if out.has_written() => {
                error!("[ID{}]处理器{}在写出响应后发生意外错误 {}: {:?}", id, name, kind, source);
            }
            Err(HandlerError::Response(e)) => {
                info!("[ID{}]处理器{}返回错误: {}", id, name, e);
                e.write(Some(headers), out).await;
            }
            Err(HandlerError::Internal { kind, source }) => {
                error!("[ID{}]处理器{}发生意外错误 {}: {:?}", id, name, kind, source);
                write_message(Some(headers), out, 400, Message::text(source.to_string())).await;
            }
        }
    }
}

/// 第一段路径去掉扩展名；根路径对应 `index`
pub fn handler_name(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return INDEX_HANDLER.to_string();
    }
    let segment = trimmed.split('/').next().unwrap_or("");
    segment.split('.').next().unwrap_or("").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{exception::Exception, request::reader_from};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{duplex, AsyncReadExt};

    struct Echo;

    impl Handler for Echo {
        fn call<'a>(
            &'a self,
            headers: &'a mut HeaderMap,
            _body: &'a mut Body,
            out: &'a mut Output,
        ) -> HandlerFuture<'a> {
            Box::pin(async move {
                let path = headers.get(DOCUMENT_URI).unwrap_or("").to_string();
                write_message(Some(headers), out, 200, Message::text(path)).await;
                HandlerResult::Ok(())
            })
        }
    }

    struct Forbidden;

    impl Handler for Forbidden {
        fn call<'a>(
            &'a self,
            _headers: &'a mut HeaderMap,
            _body: &'a mut Body,
            _out: &'a mut Output,
        ) -> HandlerFuture<'a> {
            Box::pin(async { HandlerResult::Err(Exception::new(403, "Go away").into()) })
        }
    }

    struct Broken;

    impl Handler for Broken {
        fn call<'a>(
            &'a self,
            _headers: &'a mut HeaderMap,
            _body: &'a mut Body,
            _out: &'a mut Output,
        ) -> HandlerFuture<'a> {
            Box::pin(async {
                let parsed: serde_json::Value = serde_json::from_str("{not json")?;
                let _ = parsed;
                HandlerResult::Ok(())
            })
        }
    }

    /// 先写出完整响应，然后才失败
    struct LateFailure {
        internal: bool,
    }

    impl Handler for LateFailure {
        fn call<'a>(
            &'a self,
            headers: &'a mut HeaderMap,
            _body: &'a mut Body,
            out: &'a mut Output,
        ) -> HandlerFuture<'a> {
            Box::pin(async move {
                write_message(Some(headers), out, 200, Message::text("partial")).await;
                if self.internal {
                    let parsed: serde_json::Value = serde_json::from_str("{late")?;
                    let _ = parsed;
                }
                HandlerResult::Err(Exception::new(403, "late").into())
            })
        }
    }

    fn router(prefix: &str, loads: Arc<AtomicUsize>) -> Router {
        let mut registry = Registry::new();
        registry.register("echo", move || {
            loads.fetch_add(1, Ordering::SeqCst);
            Arc::new(Echo)
        });
        registry.register("index", || Arc::new(Echo));
        registry.register("forbidden", || Arc::new(Forbidden));
        registry.register("broken", || Arc::new(Broken));
        registry.register("late", || Arc::new(LateFailure { internal: false }));
        registry.register("late-internal", || Arc::new(LateFailure { internal: true }));
        Router::new(prefix, registry)
    }

    fn request(uri: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.append(CONTENT_LENGTH, "0");
        h.append(REQUEST_METHOD, "GET");
        h.append(REQUEST_URI, uri);
        h
    }

    async fn run(router: &Router, headers: &mut HeaderMap) -> String {
        let (client, server) = duplex(8192);
        let mut out = Output::from_writer(server, 0);
        let mut body = Body::new(reader_from(&b""[..]), 0, 1024, 0);
        router.dispatch(headers, &mut body, &mut out).await;
        drop(out);
        let mut client = client;
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_handler_name() {
        assert_eq!(handler_name("/"), "index");
        assert_eq!(handler_name("/debug"), "debug");
        assert_eq!(handler_name("/websocket.py"), "websocket");
        assert_eq!(handler_name("/sysinfo/extra/path.html"), "sysinfo");
        assert_eq!(handler_name("/a.b/c"), "a");
    }

    #[test]
    fn test_route_path_strips_prefix() {
        let router = router("/cgi-bin", Arc::new(AtomicUsize::new(0)));
        let mut h = request("/cgi-bin/echo/../echo?x=1");
        assert_eq!(router.route_path(&mut h), "/echo");
        assert_eq!(h.get(DOCUMENT_URI), Some("/echo"));

        let mut h = request("/cgi-bin");
        assert_eq!(router.route_path(&mut h), "/");
    }

    /// 前缀只在完整路径段上匹配
    #[test]
    fn test_route_path_prefix_segment_boundary() {
        let router = router("/cgi-bin", Arc::new(AtomicUsize::new(0)));
        let mut h = request("/cgi-binary/echo");
        assert_eq!(router.route_path(&mut h), "/cgi-binary/echo");
    }

    #[test]
    fn test_route_path_prefers_document_uri() {
        let router = router("", Arc::new(AtomicUsize::new(0)));
        let mut h = request("/ignored?x=1");
        h.append(DOCUMENT_URI, "//echo/./");
        assert_eq!(router.route_path(&mut h), "/echo");
        assert_eq!(h.get_all(DOCUMENT_URI).count(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_to_handler() {
        let router = router("/cgi-bin", Arc::new(AtomicUsize::new(0)));
        let text = run(&router, &mut request("/cgi-bin/echo/sub")).await;
        assert!(text.starts_with("Status: 200 OK\r\n"));
        assert!(text.ends_with("/echo/sub"));
    }

    #[tokio::test]
    async fn test_root_maps_to_index() {
        let router = router("", Arc::new(AtomicUsize::new(0)));
        let text = run(&router, &mut request("/")).await;
        assert!(text.starts_with("Status: 200 OK\r\n"));
    }

    /// 未知路径返回 404 且不产生缓存条目
    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let router = router("", Arc::new(AtomicUsize::new(0)));
        let text = run(&router, &mut request("/nothing/here")).await;
        assert!(text.starts_with("Status: 404 Not Found\r\n"));
        assert!(text.ends_with("File not found: /nothing/here"));
        assert!(!router.registry().cache().contains("nothing"));
        assert!(router.registry().cache().is_empty());
    }

    /// 第二次请求命中缓存，不会再次加载
    #[tokio::test]
    async fn test_handler_loaded_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let router = router("", Arc::clone(&loads));
        run(&router, &mut request("/echo")).await;
        run(&router, &mut request("/echo.html")).await;
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(router.registry().cache().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_load() {
        let loads = Arc::new(AtomicUsize::new(0));
        let router = Arc::new(router("", Arc::clone(&loads)));
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let router = Arc::clone(&router);
                tokio::spawn(async move { router.registry().resolve("echo").is_some() })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(router.registry().cache().len(), 1);
        assert!(loads.load(Ordering::SeqCst) >= 1);
        // 填充完成后不再加载
        let before = loads.load(Ordering::SeqCst);
        router.registry().resolve("echo");
        assert_eq!(loads.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_exception_written_verbatim() {
        let router = router("", Arc::new(AtomicUsize::new(0)));
        let text = run(&router, &mut request("/forbidden")).await;
        assert!(text.starts_with("Status: 403 Forbidden\r\n"));
        assert!(text.ends_with("\r\n\r\nGo away"));
    }

    /// 其他错误统一转换为 400，只暴露错误文本
    #[tokio::test]
    async fn test_internal_error_becomes_400() {
        let router = router("", Arc::new(AtomicUsize::new(0)));
        let text = run(&router, &mut request("/broken")).await;
        assert!(text.starts_with("Status: 400 Bad Request\r\n"));
        assert!(!text.contains("serde_json"));
        assert!(text.contains("key must be a string"));
    }

    /// 处理器写出响应后再返回错误，连接上仍然只有一个响应
    #[tokio::test]
    async fn test_error_after_response_is_only_logged() {
        let router = router("", Arc::new(AtomicUsize::new(0)));
        for uri in ["/late", "/late-internal"] {
            let text = run(&router, &mut request(uri)).await;
            assert_eq!(text.matches("Status: ").count(), 1, "{}", text);
            assert!(text.starts_with("Status: 200 OK\r\n"));
            assert!(text.ends_with("\r\n\r\npartial"));
        }
    }
}
