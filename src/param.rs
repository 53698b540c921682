// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 网关协议参数与常量模块
//!
//! 该模块定义了 `scgi-gateway` 遵循的协议相关常量，包括：
//! - 常见的 HTTP 状态码及其原因短语（Reason Phrase）。
//! - SCGI 头部块中必须出现的字段名。
//! - WebSocket 握手使用的固定 GUID 与升级令牌。

use std::collections::HashMap;
use lazy_static::lazy_static;

/// 服务器名称标识，用于结构化响应的 `X-Server` 字段
pub const SERVER_NAME: &str = "scgi-gateway v0.1";

/// 响应行与头部使用的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 有响应体但未指定类型时使用的默认 `Content-Type`
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// 根路径对应的处理器名称
pub const INDEX_HANDLER: &str = "index";

/// 长度前缀允许的最大数字位数，超过即视为越界读取
pub const MAX_LENGTH_DIGITS: usize = 20;

/// 头部块末尾的终止字节
pub const NETSTRING_TERMINATOR: u8 = b',';

/// SCGI 协议版本标记字段及其唯一合法取值
pub const SCGI_MARKER: &str = "SCGI";
pub const SCGI_VERSION: &str = "1";

/// 头部字段名
pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";
pub const CONTENT_TYPE: &str = "CONTENT_TYPE";
pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
pub const REQUEST_URI: &str = "REQUEST_URI";
pub const DOCUMENT_URI: &str = "DOCUMENT_URI";
pub const QUERY_STRING: &str = "QUERY_STRING";
pub const HTTP_USER_AGENT: &str = "HTTP_USER_AGENT";
pub const HTTP_UPGRADE: &str = "HTTP_UPGRADE";
pub const HTTP_SEC_WEBSOCKET_KEY: &str = "HTTP_SEC_WEBSOCKET_KEY";

/// 每个请求头部块都必须携带的字段
pub const REQUIRED_HEADERS: [&str; 5] = [
    CONTENT_LENGTH,
    REQUEST_METHOD,
    REQUEST_URI,
    HTTP_USER_AGENT,
    SCGI_MARKER,
];

/// 不携带请求体的安全方法，请求体解析器对它们直接跳过
pub const SAFE_METHODS: [&str; 3] = ["GET", "HEAD", "OPTIONS"];

/// WebSocket 握手时与客户端密钥拼接的固定 GUID（RFC 6455）
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `Upgrade` 请求头必须等于的令牌
pub const WEBSOCKET_TOKEN: &str = "websocket";

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        // 1xx: 信息响应 (Informational)
        map.insert(100, "Continue");
        map.insert(101, "Switching Protocols");

        // 2xx: 成功响应 (Successful)
        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(202, "Accepted");
        map.insert(203, "Non-Authoritative Information");
        map.insert(204, "No Content");
        map.insert(205, "Reset Content");
        map.insert(206, "Partial Content");

        // 3xx: 重定向 (Redirection)
        map.insert(300, "Multiple Choices");
        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(303, "See Other");
        map.insert(304, "Not Modified");
        map.insert(307, "Temporary Redirect");
        map.insert(308, "Permanent Redirect");

        // 4xx: 客户端错误 (Client Error)
        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(402, "Payment Required");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(406, "Not Acceptable");
        map.insert(408, "Request Timeout");
        map.insert(409, "Conflict");
        map.insert(410, "Gone");
        map.insert(411, "Length Required");
        map.insert(412, "Precondition Failed");
        map.insert(413, "Content Too Large");
        map.insert(414, "URI Too Long");
        map.insert(415, "Unsupported Media Type");
        map.insert(416, "Range Not Satisfiable");
        map.insert(417, "Expectation Failed");
        map.insert(418, "I'm a teapot");
        map.insert(421, "Misdirected Request");
        map.insert(422, "Unprocessable Content");
        map.insert(426, "Upgrade Required");
        map.insert(428, "Precondition Required");
        map.insert(429, "Too Many Requests");
        map.insert(431, "Request Header Fields Too Large");

        // 5xx: 服务端错误 (Server Error)
        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(502, "Bad Gateway");
        map.insert(503, "Service Unavailable");
        map.insert(504, "Gateway Timeout");
        map.insert(505, "HTTP Version Not Supported");
        map
    };
}

/// 查询状态码的标准原因短语，表中没有的状态码返回 `Unknown`
pub fn status_phrase(code: u16) -> &'static str {
    STATUS_CODES.get(&code).copied().unwrap_or("Unknown")
}
