// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 调试处理器
//!
//! 以纯文本返回请求头部块（每行一个 `Key: Value`），空一行后是解析出的请求字段。

use crate::{
    exception::HandlerResult,
    field::parse_data,
    header::HeaderMap,
    request::Body,
    response::{write_message, Message, Output},
    router::{Handler, HandlerFuture},
};

/// 以纯文本回显请求头部与解析后的请求字段
pub struct DebugDump;

impl DebugDump {
    async fn serve(&self, headers: &HeaderMap, body: &mut Body, out: &mut Output) -> HandlerResult {
        let fields = parse_data(headers, body).await?;

        let mut text: String = headers
            .iter()
            .map(|(key, value)| format!("{}: {}\n", key, value))
            .collect();
        text.push('\n');
        text.extend(fields.iter().map(|(key, value)| format!("{} = {}\n", key, value)));

        write_message(Some(headers), out, 200, Message::text(text)).await;
        Ok(())
    }
}

impl Handler for DebugDump {
    fn call<'a>(
        &'a self,
        headers: &'a mut HeaderMap,
        body: &'a mut Body,
        out: &'a mut Output,
    ) -> HandlerFuture<'a> {
        Box::pin(self.serve(headers, body, out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{param::*, request::reader_from};
    use tokio::io::{duplex, AsyncReadExt};

    async fn run(mut headers: HeaderMap, body: &'static [u8]) -> String {
        let (client, server) = duplex(1 << 16);
        let mut out = Output::from_writer(server, 7);
        let mut body = Body::new(reader_from(body), body.len() as u64, 1 << 20, 7);
        let result = DebugDump.call(&mut headers, &mut body, &mut out).await;
        if let Err(crate::exception::HandlerError::Response(e)) = result {
            e.write(Some(&headers), &mut out).await;
        }
        drop(out);

        let mut client = client;
        let mut raw = String::new();
        client.read_to_string(&mut raw).await.unwrap();
        raw
    }

    fn request(method: &str, length: usize) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.append(CONTENT_LENGTH, length.to_string());
        headers.append(REQUEST_METHOD, method);
        headers.append(REQUEST_URI, "/debug?lang=rust");
        headers.append(QUERY_STRING, "lang=rust");
        headers
    }

    #[tokio::test]
    async fn test_dumps_headers_and_query() {
        let raw = run(request("GET", 0), b"").await;
        assert!(raw.starts_with("Status: 200 OK\r\n"));
        assert!(raw.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(raw.contains("X-Server: "));
        assert!(raw.contains("REQUEST_URI: /debug?lang=rust\n"));
        assert!(raw.ends_with("lang = \"rust\"\n"));
    }

    #[tokio::test]
    async fn test_dumps_form_fields() {
        let body: &'static [u8] = b"name=ferris&lang=";
        let mut headers = request("POST", body.len());
        headers.append(CONTENT_TYPE, "application/x-www-form-urlencoded");
        let raw = run(headers, body).await;
        assert!(raw.contains("name = \"ferris\"\n"));
        assert!(raw.contains("lang = \"rust\"\n"));
    }

    #[tokio::test]
    async fn test_bad_json_is_400() {
        let body: &'static [u8] = b"[1, 2]";
        let mut headers = request("POST", body.len());
        headers.append(CONTENT_TYPE, "application/json");
        let raw = run(headers, body).await;
        assert!(raw.starts_with("Status: 400 "));
    }

    /// 头部块逐行输出，空一行后是字段
    #[tokio::test]
    async fn test_exact_layout() {
        let raw = run(request("GET", 0), b"").await;
        let body = raw.split_once("\r\n\r\n").map(|(_, b)| b).unwrap();
        assert_eq!(
            body,
            "CONTENT_LENGTH: 0\n\
REQUEST_METHOD: GET\n\
REQUEST_URI: /debug?lang=rust\n\
QUERY_STRING: lang=rust\n\
\n\
lang = \"rust\"\n"
        );
    }
}
