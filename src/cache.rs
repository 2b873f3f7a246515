//! 结果缓存：LRU + 单条目TTL
//!
//! 过期只在访问时惰性判定，不依赖后台定时清理；宿主进程被挂起再恢复时
//! 仍然正确。禁用缓存不会清空已有条目，重新启用后继续使用（过期条目除外）。

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;
use xxhash_rust::xxh32::xxh32;

use crate::types::CacheConfig;

/// 生成缓存键
///
/// 由提供方、模型、源语言、目标语言以及输入文本的32位内容哈希组成。
/// 哈希不是加密用途，仅用于封闭、非对抗环境下的去重；附加的字节长度
/// 进一步降低短文本碰撞的概率。
pub fn cache_key(provider: &str, model: &str, source_lang: &str, target_lang: &str, text: &str) -> String {
    format!(
        "{}:{}:{}:{}:{:08x}{:x}",
        provider,
        model,
        source_lang,
        target_lang,
        xxh32(text.as_bytes(), 0),
        text.len()
    )
}

/// `ttl_ms <= 0` 表示永不过期
pub fn ttl_from_ms(ttl_ms: i64) -> Option<Duration> {
    u64::try_from(ttl_ms)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// 缓存选项的局部更新
#[derive(Debug, Clone, Default)]
pub struct CacheUpdate {
    pub size: Option<usize>,
    pub ttl_ms: Option<i64>,
    pub enabled: Option<bool>,
}

impl From<&CacheConfig> for CacheUpdate {
    fn from(config: &CacheConfig) -> Self {
        Self {
            size: Some(config.size),
            ttl_ms: Some(config.ttl_ms),
            enabled: Some(config.enabled),
        }
    }
}

/// 缓存统计信息
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub len: usize,
    pub capacity: usize,
    pub enabled: bool,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub evictions: u64,
    pub expirations: u64,
}

struct CacheState<V> {
    entries: LruCache<String, Entry<V>>,
    default_ttl: Option<Duration>,
    enabled: bool,
    stats: CacheStats,
}

/// LRU + TTL 结果缓存
///
/// 每次 `get`/`set` 在一把锁内完成，并发访问不会观察到半写入的条目。
pub struct ResultCache<V = String> {
    state: Mutex<CacheState<V>>,
}

fn capacity_of(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
}

impl<V: Clone> ResultCache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity_of(config.size)),
                default_ttl: ttl_from_ms(config.ttl_ms),
                enabled: config.enabled,
                stats: CacheStats::default(),
            }),
        }
    }

    /// 读取缓存；命中时将条目移到最近使用位置，过期条目被顺带删除。
    pub fn get(&self, key: &str) -> Option<V> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.enabled {
            return None;
        }
        let now = Instant::now();
        match state.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                state.stats.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => {
                state.entries.pop(key);
                state.stats.expirations += 1;
            }
            None => {}
        }
        state.stats.misses += 1;
        None
    }

    /// 与 `get` 判定一致，但不依赖值本身（存入空值也算存在）。
    pub fn has(&self, key: &str) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.enabled {
            return false;
        }
        let expired = match state.entries.peek(key) {
            Some(entry) => entry.is_expired(Instant::now()),
            None => return false,
        };
        if expired {
            state.entries.pop(key);
            state.stats.expirations += 1;
        }
        !expired
    }

    /// 以默认TTL写入
    pub fn set(&self, key: impl Into<String>, value: V) {
        let ttl = self.state.lock().default_ttl;
        self.set_with_ttl(key, value, ttl);
    }

    /// 写入并指定TTL，`None` 表示永不过期。超出容量时淘汰最久未使用的条目。
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.enabled {
            return;
        }
        let entry = Entry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        let key = key.into();
        state.stats.writes += 1;
        // push 在满容量且插入新键时返回被淘汰的条目
        if let Some((evicted, _)) = state.entries.push(key.clone(), entry) {
            if evicted != key {
                state.stats.evictions += 1;
                debug!(key = %evicted, "cache entry evicted");
            }
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.state.lock().entries.pop(key).is_some()
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// 热更新；缩小容量会立即淘汰到新容量以内。
    pub fn update_options(&self, update: CacheUpdate) {
        let mut state = self.state.lock();
        if let Some(size) = update.size {
            let capacity = capacity_of(size);
            let overflow = state.entries.len().saturating_sub(capacity.get());
            state.entries.resize(capacity);
            state.stats.evictions += overflow as u64;
        }
        if let Some(ttl_ms) = update.ttl_ms {
            state.default_ttl = ttl_from_ms(ttl_ms);
        }
        if let Some(enabled) = update.enabled {
            state.enabled = enabled;
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            len: state.entries.len(),
            capacity: state.entries.cap().get(),
            enabled: state.enabled,
            ..state.stats.clone()
        }
    }
}
