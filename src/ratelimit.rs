use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Fixed-window limiter. Implementations backed by a shared store are needed
/// once more than one process serves the same workspaces.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, key: &str, window_ms: u64, max: u32) -> bool;
}

#[derive(Debug, Default)]
pub struct InMemoryRateLimiter {
    windows: Mutex<HashMap<String, (i64, u32)>>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_at(&self, key: &str, window_ms: u64, max: u32, now_ms: i64) -> bool {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window_ms = window_ms.max(1) as i64;
        let entry = windows.entry(key.to_string()).or_insert((now_ms, 0));
        if now_ms - entry.0 >= window_ms {
            *entry = (now_ms, 0);
        }
        if entry.1 >= max {
            return false;
        }
        entry.1 += 1;
        true
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, key: &str, window_ms: u64, max: u32) -> bool {
        self.check_at(key, window_ms, max, chrono::Utc::now().timestamp_millis())
    }
}
