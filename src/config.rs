// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use log::{error, info, warn};
use serde_derive::{Deserialize, Serialize};

use std::fs;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    unix_socket: Option<String>,
    host: String,
    port: u16,
    prefix: String,
    max_head_size: usize,
    max_body_size: u64,
    worker_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unix_socket: None,
            host: "127.0.0.1".to_string(),
            port: 4000,
            prefix: String::new(),
            max_head_size: 1 << 20,
            max_body_size: 16 << 20,
            worker_threads: 0,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default().resolved()
    }

    /// 从 TOML 文件读取配置，文件缺失或格式错误时使用默认配置
    pub fn from_toml(filename: &str) -> Self {
        let content = match fs::read_to_string(filename) {
            Ok(s) => s,
            Err(e) => {
                warn!("无法读取配置文件{}: {}，使用默认配置", filename, e);
                return Self::new();
            }
        };
        match Self::from_toml_str(&content) {
            Ok(config) => {
                info!("配置文件{}已载入", filename);
                config
            }
            Err(e) => {
                error!("无法成功从配置文件构建配置对象: {}，使用默认配置", e);
                Self::new()
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let raw: Config = toml::from_str(content)?;
        Ok(raw.resolved())
    }

    fn resolved(mut self) -> Self {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        if self.max_head_size == 0 {
            warn!("max_head_size被设置为0，这会拒绝所有请求，因此该值将被改为默认值。");
            self.max_head_size = Self::default().max_head_size;
        }
        if self.unix_socket.as_deref().map_or(false, str::is_empty) {
            self.unix_socket = None;
        }
        self
    }
}

impl Config {
    pub fn unix_socket(&self) -> Option<&str> {
        self.unix_socket.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn max_head_size(&self) -> usize {
        self.max_head_size
    }

    pub fn max_body_size(&self) -> u64 {
        self.max_body_size
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }
}
