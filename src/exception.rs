// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了网关在请求处理生命周期中可能产生的失败。
//!
//! ## 设计意图
//! - **Exception**：携带（状态码，原因）的不可变错误，可以直接写成网关响应。
//! - **HandlerError**：处理器调用边界上的失败结果。`Response` 变体原样写回，
//!   其余一律在路由器处转换为通用的 400 响应，完整细节只写入服务端日志。

use std::{any::type_name, fmt, io, str::Utf8Error, string::FromUtf8Error};

use crate::{
    header::HeaderMap,
    param::{status_phrase, DEFAULT_CONTENT_TYPE},
    response::{write_message, Message, Output},
};

/// 需要发送给客户端的错误。
///
/// 原因缺省时取该状态码的标准短语。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    status: u16,
    reason: String,
}

impl Exception {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    /// 使用状态码的标准短语作为原因
    pub fn from_status(status: u16) -> Self {
        Self::new(status, status_phrase(status))
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// 转换为结构化响应：纯文本响应体等于原因
    pub fn to_message(&self) -> Message {
        Message::new()
            .header("Content-Type", DEFAULT_CONTENT_TYPE)
            .body(self.reason.clone().into_bytes())
    }

    /// 将错误写回连接。`req` 为 `None` 表示头部尚未解析完成。
    pub async fn write(&self, req: Option<&HeaderMap>, out: &mut Output) {
        write_message(req, out, self.status, self.to_message()).await;
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Process Error: {} {}", self.status, self.reason)
    }
}

impl std::error::Error for Exception {}

/// 处理器调用的失败结果
#[derive(Debug)]
pub enum HandlerError {
    /// 受控失败，原样写回客户端
    Response(Exception),
    /// 意外失败。`kind` 记录具体错误类型，仅用于日志
    Internal {
        kind: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl HandlerError {
    pub fn internal<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        HandlerError::Internal {
            kind: type_name::<E>(),
            source: Box::new(err),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Response(e) => write!(f, "{}", e),
            HandlerError::Internal { source, .. } => write!(f, "{}", source),
        }
    }
}

impl From<Exception> for HandlerError {
    fn from(value: Exception) -> Self {
        HandlerError::Response(value)
    }
}

macro_rules! impl_internal {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for HandlerError {
                fn from(value: $ty) -> Self {
                    HandlerError::internal(value)
                }
            }
        )*
    };
}

impl_internal!(io::Error, serde_json::Error, Utf8Error, FromUtf8Error);

impl From<String> for HandlerError {
    fn from(value: String) -> Self {
        HandlerError::Internal {
            kind: type_name::<String>(),
            source: value.into(),
        }
    }
}

impl From<&str> for HandlerError {
    fn from(value: &str) -> Self {
        HandlerError::from(value.to_string())
    }
}

/// 处理器调用边界上的结果类型
pub type HandlerResult = Result<(), HandlerError>;
