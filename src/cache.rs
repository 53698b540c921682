// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::warn;

use crate::router::Handler;

/// 已解析处理器的缓存。条目在进程生命周期内一直有效。
pub struct HandlerCache {
    cache: Mutex<HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerCache {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn Handler>>> {
        match self.cache.lock() {
            Ok(lock) => lock,
            Err(poisoned) => {
                warn!("处理器缓存锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    // 放入，已存在时保留原有条目并返回它
    pub fn push(&self, name: &str, handler: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::clone(self.lock().entry(name.to_string()).or_insert(handler))
    }

    // 查询
    pub fn find(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandlerCache {
    fn default() -> Self {
        Self::new()
    }
}
