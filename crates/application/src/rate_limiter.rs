use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// 单个客户端的令牌桶
#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// 限流错误类型
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Too many login attempts, retry after {retry_after:?}")]
    Exhausted { retry_after: Duration },
}

/// 登录限流器
///
/// 按客户端 IP 维护令牌桶：容量 `burst`，每 `refill_every` 恢复一个令牌。
/// 由大量短生命周期的请求处理器并发访问，使用普通互斥锁保护。
pub struct LoginRateLimiter {
    burst: u32,
    refill_every: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl LoginRateLimiter {
    pub fn new(burst: u32, refill_every: Duration) -> Self {
        Self {
            burst: burst.max(1),
            refill_every: refill_every.max(Duration::from_millis(1)),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// 为客户端消耗一个令牌
    pub fn check(&self, client: &str) -> Result<(), RateLimitError> {
        self.check_at(client, Instant::now())
    }

    pub fn check_at(&self, client: &str, now: Instant) -> Result<(), RateLimitError> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let burst = f64::from(self.burst);
        let bucket = buckets.entry(client.to_owned()).or_insert(Bucket {
            tokens: burst,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let refilled = elapsed.as_secs_f64() / self.refill_every.as_secs_f64();
        bucket.tokens = (bucket.tokens + refilled).min(burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(RateLimitError::Exhausted {
                retry_after: self.refill_every.mul_f64(missing),
            })
        }
    }

    /// 清理已回满的空闲桶（防止内存泄漏）
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    pub fn cleanup_at(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let full_after = self.refill_every * self.burst;
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < full_after);
        before - buckets.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(12)) // 默认突发 10 次，每 12 秒恢复一次
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_reject() {
        let limiter = LoginRateLimiter::new(3, Duration::from_secs(12));
        let now = Instant::now();

        for i in 0..3 {
            assert!(
                limiter.check_at("10.0.0.1", now).is_ok(),
                "attempt {} should be allowed",
                i + 1
            );
        }

        let result = limiter.check_at("10.0.0.1", now);
        assert_eq!(
            result,
            Err(RateLimitError::Exhausted {
                retry_after: Duration::from_secs(12)
            })
        );
    }

    #[test]
    fn clients_are_limited_independently() {
        let limiter = LoginRateLimiter::new(1, Duration::from_secs(12));
        let now = Instant::now();

        assert!(limiter.check_at("10.0.0.1", now).is_ok());
        assert!(limiter.check_at("10.0.0.1", now).is_err());
        assert!(limiter.check_at("10.0.0.2", now).is_ok());
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = LoginRateLimiter::new(2, Duration::from_secs(12));
        let now = Instant::now();

        assert!(limiter.check_at("ip", now).is_ok());
        assert!(limiter.check_at("ip", now).is_ok());
        assert!(limiter.check_at("ip", now + Duration::from_secs(6)).is_err());
        assert!(limiter.check_at("ip", now + Duration::from_secs(13)).is_ok());
    }

    #[test]
    fn cleanup_removes_idle_buckets() {
        let limiter = LoginRateLimiter::new(2, Duration::from_secs(10));
        let now = Instant::now();

        limiter.check_at("idle", now).unwrap();
        limiter.check_at("busy", now + Duration::from_secs(15)).unwrap();
        assert_eq!(limiter.tracked_clients(), 2);

        let removed = limiter.cleanup_at(now + Duration::from_secs(21));
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }
}
