// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # SCGI 头部块解析模块
//!
//! 将连接上读到的原始字节解析为 `HeaderMap`。线上格式为：
//!
//! ```text
//! <十进制长度>:<长度个字节的 NUL 分隔键值对>,
//! ```
//!
//! 解析过程中的每一步都有明确的大小上限，绝不进行无界读取。

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{exception::Exception, param::*};

/// 大小写不敏感、保持插入顺序的头部映射。
///
/// 同名字段可以出现多次，`get` 返回第一次出现的值。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// 替换第一次出现的值并删除其余同名字段；不存在时追加
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter().position(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some(index) => {
                self.entries[index].1 = value;
                let mut seen = 0usize;
                self.entries.retain(|(k, _)| {
                    if k.eq_ignore_ascii_case(key) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // --- 常用字段访问器 ---

    pub fn method(&self) -> Option<&str> {
        self.get(REQUEST_METHOD)
    }

    pub fn request_uri(&self) -> Option<&str> {
        self.get(REQUEST_URI)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(CONTENT_TYPE)
    }

    /// 声明的请求体长度；字段缺失或不是合法数字时返回 `None`
    pub fn content_length(&self) -> Option<u64> {
        self.get(CONTENT_LENGTH).and_then(|v| v.trim().parse().ok())
    }
}

/// 从连接中读取并校验一个完整的头部块。
///
/// # 错误处理
/// - 长度前缀不是数字：400
/// - 长度前缀超过 `MAX_LENGTH_DIGITS` 仍未遇到 `:`：431
/// - 声明长度超过 `max_head`：431
/// - 数据在读满之前结束：413
/// - 终止字节错误、编码非法、缺少必需字段或 `SCGI` 不为 `1`：400
pub async fn read_header<R>(reader: &mut R, max_head: usize, id: u128) -> Result<HeaderMap, Exception>
where
    R: AsyncRead + Unpin,
{
    let length = read_length_prefix(reader, id).await?;
    if length > max_head {
        warn!("[ID{}]头部块声明长度{}超过上限{}", id, length, max_head);
        return Err(Exception::new(431, "Payload head too large"));
    }

    // 额外一个字节是终止符
    let mut block = vec![0u8; length + 1];
    if let Err(e) = reader.read_exact(&mut block).await {
        warn!("[ID{}]头部块读取不完整: {}", id, e);
        return Err(Exception::new(413, "Payload malformed"));
    }
    if block.pop() != Some(NETSTRING_TERMINATOR) {
        warn!("[ID{}]头部块终止字节错误", id);
        return Err(Exception::new(400, "Payload malformed"));
    }

    let headers = parse_block(&block, id)?;
    validate(&headers, id)?;
    debug!("[ID{}]头部块解析完成，共{}个字段", id, headers.len());
    Ok(headers)
}

/// 读取 `<十进制长度>:` 前缀
async fn read_length_prefix<R>(reader: &mut R, id: u128) -> Result<usize, Exception>
where
    R: AsyncRead + Unpin,
{
    let mut digits = Vec::with_capacity(MAX_LENGTH_DIGITS);
    loop {
        let byte = match reader.read_u8().await {
            Ok(b) => b,
            Err(e) => {
                warn!("[ID{}]读取长度前缀时连接结束: {}", id, e);
                return Err(Exception::new(413, "Payload malformed"));
            }
        };
        if byte == b':' {
            break;
        }
        if digits.len() == MAX_LENGTH_DIGITS {
            warn!("[ID{}]长度前缀过长", id);
            return Err(Exception::new(431, "Payload too large"));
        }
        digits.push(byte);
    }

    let parsed = std::str::from_utf8(&digits)
        .ok()
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse::<usize>().ok());
    match parsed {
        Some(length) => Ok(length),
        None => {
            warn!("[ID{}]长度前缀不是合法数字: {:?}", id, String::from_utf8_lossy(&digits));
            Err(Exception::new(400, "Payload malformed"))
        }
    }
}

/// 按 NUL 切分并两两配对成键值对。末尾多余的单个键会被丢弃。
fn parse_block(block: &[u8], id: u128) -> Result<HeaderMap, Exception> {
    let block = block.strip_suffix(b"\0").unwrap_or(block);
    let mut headers = HeaderMap::new();
    if block.is_empty() {
        return Ok(headers);
    }

    let tokens: Vec<&[u8]> = block.split(|b| *b == 0).collect();
    if tokens.len() % 2 != 0 {
        warn!("[ID{}]头部块中存在没有值的字段，已丢弃", id);
    }
    for pair in tokens.chunks_exact(2) {
        let (key, value) = match (std::str::from_utf8(pair[0]), std::str::from_utf8(pair[1])) {
            (Ok(k), Ok(v)) => (k, v),
            _ => {
                warn!("[ID{}]头部字段不是合法的 UTF-8", id);
                return Err(Exception::new(400, "Payload malformed"));
            }
        };
        headers.append(key, value);
    }
    Ok(headers)
}

fn validate(headers: &HeaderMap, id: u128) -> Result<(), Exception> {
    let missing: Vec<&str> = REQUIRED_HEADERS
        .iter()
        .copied()
        .filter(|key| !headers.contains(key))
        .collect();
    if !missing.is_empty() {
        warn!("[ID{}]头部块缺少必需字段: {}", id, missing.join(", "));
        return Err(Exception::new(400, "Payload head missing value"));
    }
    if headers.get(SCGI_MARKER) != Some(SCGI_VERSION) {
        warn!("[ID{}]不支持的 SCGI 版本: {:?}", id, headers.get(SCGI_MARKER));
        return Err(Exception::new(400, "Payload head missing value"));
    }
    Ok(())
}

/// 将键值对编码为完整的头部块，主要供测试与基准使用
pub fn encode_header(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut block = Vec::new();
    for (key, value) in pairs {
        block.extend_from_slice(key.as_bytes());
        block.push(0);
        block.extend_from_slice(value.as_bytes());
        block.push(0);
    }
    let mut out = format!("{}:", block.len()).into_bytes();
    out.extend_from_slice(&block);
    out.push(NETSTRING_TERMINATOR);
    out
}
