// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 通用工具函数
//!
//! 路径规范化与 `Content-Type` 参数解析。

/// 按文件系统路径规则规范化路径：折叠 `.`、`..` 与多余的分隔符。
///
/// 绝对路径的 `..` 不会越过根目录；相对路径规范化为空时返回 `.`。
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().map_or(false, |p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// 取出请求目标中 `?` 之前的路径部分
pub fn path_of_uri(uri: &str) -> &str {
    uri.split_once('?').map_or(uri, |(path, _)| path)
}

/// 解析后的 `Content-Type`：小写的 `type/subtype` 与参数列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub mime: String,
    pub params: Vec<(String, String)>,
}

impl ContentType {
    /// 参数名大小写不敏感
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 主类型，如 `multipart`
    pub fn main_type(&self) -> &str {
        self.mime.split('/').next().unwrap_or("")
    }
}

/// 解析 `type/subtype; key=value; key="quoted value"` 形式的字段值。
///
/// 空值或缺少 `/` 的类型按 `text/plain` 处理。
pub fn parse_content_type(value: &str) -> ContentType {
    let mut pieces = split_params(value).into_iter();
    let mime = pieces
        .next()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| s.contains('/'))
        .unwrap_or_else(|| "text/plain".to_string());
    ContentType {
        mime,
        params: pieces.filter_map(|p| parse_param(&p)).collect(),
    }
}

/// 解析 `Content-Disposition` 一类的字段，返回（值，参数列表）
pub fn parse_disposition(value: &str) -> (String, Vec<(String, String)>) {
    let mut pieces = split_params(value).into_iter();
    let kind = pieces
        .next()
        .map(|s| s.trim().to_ascii_lowercase())
        .unwrap_or_default();
    (kind, pieces.filter_map(|p| parse_param(&p)).collect())
}

/// 按 `;` 切分，引号内的 `;` 不作为分隔符
fn split_params(value: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    for c in value.chars() {
        match c {
            _ if escaped => {
                current.push(c);
                escaped = false;
            }
            '\\' if quoted => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                quoted = !quoted;
            }
            ';' if !quoted => pieces.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    pieces.push(current);
    pieces
}

fn parse_param(piece: &str) -> Option<(String, String)> {
    let (key, value) = piece.split_once('=')?;
    let key = key.trim().to_ascii_lowercase();
    if key.is_empty() {
        return None;
    }
    let value = value.trim();
    let value = match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => unquote(inner),
        None => value.to_string(),
    };
    Some((key, value))
}

fn unquote(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
