// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求体模块
//!
//! 头部块之后的字节即为请求体。`Body` 以声明的 `CONTENT_LENGTH` 为界，
//! 只能被完整读取一次；升级协议的处理器则可以直接取得底层读取端。

use bytes::Bytes;
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::exception::Exception;

/// 连接读取端的统一类型
pub type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

/// 有界、只能消费一次的请求体
pub struct Body {
    reader: Reader,
    content_length: u64,
    limit: u64,
    consumed: bool,
    id: u128,
}

impl Body {
    pub fn new(reader: Reader, content_length: u64, limit: u64, id: u128) -> Self {
        Self {
            reader,
            content_length,
            limit,
            consumed: false,
            id,
        }
    }

    /// 声明的请求体长度
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// 允许读取的最大请求体长度
    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// 读取恰好 `CONTENT_LENGTH` 个字节。
    ///
    /// # 错误处理
    /// - 声明长度超过上限：413
    /// - 数据在读满之前结束：413
    /// - 请求体已被读取过：500
    pub async fn read_all(&mut self) -> Result<Bytes, Exception> {
        if self.consumed {
            warn!("[ID{}]请求体被重复读取", self.id);
            return Err(Exception::new(500, "Request body already consumed"));
        }
        if self.content_length > self.limit {
            warn!(
                "[ID{}]请求体长度{}超过上限{}",
                self.id, self.content_length, self.limit
            );
            return Err(Exception::from_status(413));
        }
        self.consumed = true;

        let mut buffer = vec![0u8; self.content_length as usize];
        if let Err(e) = self.reader.read_exact(&mut buffer).await {
            warn!("[ID{}]请求体读取不完整: {}", self.id, e);
            return Err(Exception::new(413, "Payload malformed"));
        }
        debug!("[ID{}]请求体读取完毕，长度: {}", self.id, buffer.len());
        Ok(Bytes::from(buffer))
    }

    /// 取得底层读取端。用于接管连接的升级协议。
    pub fn stream(&mut self) -> &mut Reader {
        self.consumed = true;
        &mut self.reader
    }
}

/// 将任意读取端包装成连接读取端
pub fn reader_from<R>(inner: R) -> Reader
where
    R: AsyncRead + Send + Unpin + 'static,
{
    BufReader::new(Box::new(inner))
}
