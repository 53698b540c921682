// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求体解析模块
//!
//! 根据 `CONTENT_TYPE` 把请求体解析成字段映射。支持：
//! 1. `application/x-www-form-urlencoded`
//! 2. `application/json`
//! 3. `multipart/form-data`（内嵌的 multipart 只展开一层）
//!
//! 查询字符串中的参数总是先放入结果，请求体中的同名字段会覆盖它们。

use std::{collections::BTreeMap, fmt};

use bytes::Bytes;
use log::{debug, warn};
use serde_json::Value;

use crate::{
    exception::Exception,
    header::HeaderMap,
    param::*,
    request::Body,
    util::{parse_content_type, parse_disposition, ContentType},
};

/// 表单中的一个上传文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormFile {
    name: String,
    filename: Option<String>,
    content_type: String,
    data: Bytes,
}

impl FormFile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Display for FormFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"<file name="{}" filename="{}" size={} />"#,
            self.name,
            self.filename.as_deref().unwrap_or("None"),
            self.len()
        )
    }
}

/// 解析结果中的字段值
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Json(Value),
    File(FormFile),
    Files(Vec<FormFile>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{:?}", s),
            FieldValue::Json(v) => write!(f, "{}", v),
            FieldValue::File(file) => write!(f, "{}", file),
            FieldValue::Files(files) => {
                write!(f, "[")?;
                for (i, file) in files.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", file)?;
                }
                write!(f, "]")
            }
        }
    }
}

pub type FormData = BTreeMap<String, FieldValue>;

/// 解析请求携带的全部字段。
///
/// # 错误处理
/// - `CONTENT_LENGTH` 不是数字：400
/// - `CONTENT_LENGTH` 超过上限：413
/// - 请求体不完整：413
/// - 请求体不是合法的 UTF-8 / JSON：400
pub async fn parse_data(headers: &HeaderMap, body: &mut Body) -> Result<FormData, Exception> {
    let content_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| Exception::new(400, "Bad content length"))?;
    if content_length > body.limit() {
        return Err(Exception::from_status(413));
    }

    let mut data = FormData::new();
    if let Some(query) = headers.get(QUERY_STRING) {
        for (key, value) in parse_query(query) {
            data.insert(key, FieldValue::Text(value));
        }
    }

    let method = headers.method().unwrap_or("GET");
    if SAFE_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method)) {
        return Ok(data);
    }

    let content_type = parse_content_type(headers.content_type().unwrap_or(""));
    match content_type.mime.as_str() {
        "application/x-www-form-urlencoded" => {
            let raw = body.read_all().await?;
            let text = std::str::from_utf8(&raw)
                .map_err(|_| Exception::new(400, "Form data is not valid UTF-8"))?;
            for (key, value) in parse_query(text) {
                data.insert(key, FieldValue::Text(value));
            }
        }
        "application/json" => {
            let raw = body.read_all().await?;
            let value: Value = serde_json::from_slice(&raw)
                .map_err(|e| Exception::new(400, format!("Bad JSON body: {}", e)))?;
            match value {
                Value::Object(map) => {
                    for (key, value) in map {
                        data.insert(key, FieldValue::Json(value));
                    }
                }
                _ => return Err(Exception::new(400, "JSON body must be an object")),
            }
        }
        "multipart/form-data" => {
            let boundary = content_type
                .param("boundary")
                .filter(|b| !b.is_empty())
                .ok_or_else(|| Exception::new(400, "Missing multipart boundary"))?
                .to_string();
            let raw = body.read_all().await?;
            data.extend(process_multipart(&raw, &boundary));
        }
        other => debug!("不解析的请求体类型: {}", other),
    }
    Ok(data)
}

/// 解析查询字符串。空值字段被忽略，同名字段后者覆盖前者。
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap_or_else(|e| {
        warn!("无法解析查询字符串: {}", e);
        Vec::new()
    });
    let mut result: Vec<(String, String)> = Vec::with_capacity(pairs.len());
    for (key, value) in pairs.into_iter().filter(|(_, v)| !v.is_empty()) {
        match result.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => result.push((key, value)),
        }
    }
    result
}

/// multipart 中的一个分段
struct Part {
    content_type: ContentType,
    name: Option<String>,
    filename: Option<String>,
    data: Bytes,
}

impl Part {
    fn into_file(self, fallback_name: &str) -> FormFile {
        FormFile {
            name: self.name.unwrap_or_else(|| fallback_name.to_string()),
            filename: self.filename,
            content_type: self.content_type.mime,
            data: self.data,
        }
    }
}

fn process_multipart(raw: &[u8], boundary: &str) -> FormData {
    let mut result = FormData::new();
    for part in split_multipart(raw, boundary) {
        let name = match part.name.clone() {
            Some(name) => name,
            // 不属于表单的分段
            None => continue,
        };
        if part.filename.is_none() && part.content_type.mime == "text/plain" {
            match String::from_utf8(part.data.to_vec()) {
                Ok(text) => {
                    result.insert(name, FieldValue::Text(text));
                }
                Err(_) => warn!("字段{}不是合法的 UTF-8，已丢弃", name),
            }
        } else if part.content_type.main_type() == "multipart" {
            let files: Vec<FormFile> = match part.content_type.param("boundary") {
                Some(inner) => split_multipart(&part.data, inner)
                    .into_iter()
                    // 嵌套层数过多，跳过
                    .filter(|sub| sub.content_type.main_type() != "multipart")
                    .map(|sub| sub.into_file(&name))
                    .collect(),
                None => Vec::new(),
            };
            if !files.is_empty() {
                result.insert(name, FieldValue::Files(files));
            }
        } else {
            result.insert(name.clone(), FieldValue::File(part.into_file(&name)));
        }
    }
    result
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// 按边界切分 multipart 数据。格式错误的分段被跳过。
fn split_multipart(raw: &[u8], boundary: &str) -> Vec<Part> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut parts = Vec::new();

    let mut cursor = match find(raw, &delimiter, 0) {
        Some(p) => p + delimiter.len(),
        None => return parts,
    };
    loop {
        // 结束边界
        if raw[cursor..].starts_with(b"--") {
            break;
        }
        let start = match find(raw, b"\n", cursor) {
            Some(p) => p + 1,
            None => break,
        };
        // 分段在下一个 `\n--boundary` 处结束，其前面可选的 `\r` 不属于数据
        let end = match find(raw, &[b"\n".as_slice(), &delimiter].concat(), start) {
            Some(p) if p > start && raw[p - 1] == b'\r' => p - 1,
            Some(p) => p,
            None => break,
        };
        if let Some(part) = parse_part(&raw[start..end]) {
            parts.push(part);
        }
        cursor = match find(raw, &delimiter, end) {
            Some(p) => p + delimiter.len(),
            None => break,
        };
    }
    parts
}

fn parse_part(raw: &[u8]) -> Option<Part> {
    let (head, data) = match find(raw, b"\r\n\r\n", 0) {
        Some(p) => (&raw[..p], &raw[p + 4..]),
        None => match find(raw, b"\n\n", 0) {
            Some(p) => (&raw[..p], &raw[p + 2..]),
            // 没有头部的分段
            None if raw.starts_with(b"\r\n") => (&raw[..0], &raw[2..]),
            None => return None,
        },
    };
    let head = String::from_utf8_lossy(head);

    let mut content_type = parse_content_type("");
    let mut name = None;
    let mut filename = None;
    for line in head.lines() {
        let (key, value) = match line.split_once(':') {
            Some(kv) => kv,
            None => continue,
        };
        if key.trim().eq_ignore_ascii_case("content-type") {
            content_type = parse_content_type(value);
        } else if key.trim().eq_ignore_ascii_case("content-disposition") {
            let (_, params) = parse_disposition(value);
            for (k, v) in params {
                match k.as_str() {
                    "name" => name = Some(v),
                    "filename" => filename = Some(v),
                    _ => {}
                }
            }
        }
    }
    Some(Part {
        content_type,
        name,
        filename,
        data: Bytes::copy_from_slice(data),
    })
}
