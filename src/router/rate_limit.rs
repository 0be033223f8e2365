//! Per-model token-bucket rate limiting.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
}

struct Bucket {
    requests_remaining: f64,
    tokens_remaining: f64,
    last_refill: Instant,
    config: RateLimitConfig,
}

impl Bucket {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            requests_remaining: config.requests_per_minute as f64,
            tokens_remaining: config.tokens_per_minute as f64,
            last_refill: Instant::now(),
            config,
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        let minutes = elapsed / 60.0;
        self.requests_remaining =
            (self.requests_remaining + minutes * self.config.requests_per_minute as f64)
                .min(self.config.requests_per_minute as f64);
        self.tokens_remaining = (self.tokens_remaining + minutes * self.config.tokens_per_minute as f64)
            .min(self.config.tokens_per_minute as f64);
        self.last_refill = Instant::now();
    }

    /// Seconds to wait before `estimated_tokens` worth of one more request
    /// would be available, or `None` if available now.
    fn wait_needed(&mut self, estimated_tokens: u32) -> Option<Duration> {
        self.refill();
        if self.requests_remaining >= 1.0 && self.tokens_remaining >= estimated_tokens as f64 {
            self.requests_remaining -= 1.0;
            self.tokens_remaining -= estimated_tokens as f64;
            return None;
        }
        let request_deficit = (1.0 - self.requests_remaining).max(0.0);
        let token_deficit = (estimated_tokens as f64 - self.tokens_remaining).max(0.0);
        let seconds_for_requests = request_deficit / (self.config.requests_per_minute as f64 / 60.0);
        let seconds_for_tokens = token_deficit / (self.config.tokens_per_minute as f64 / 60.0);
        Some(Duration::from_secs_f64(seconds_for_requests.max(seconds_for_tokens)))
    }
}

/// Tracks one token bucket per model id. A single `RateLimiter` is shared
/// across all concurrent callers within a job (and, in a many-job
/// deployment, across jobs targeting the same model).
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    deadline: Duration,
}

impl RateLimiter {
    pub fn new(deadline: Duration) -> Self {
        Self { buckets: Mutex::new(HashMap::new()), deadline }
    }

    pub fn configure(&self, model_id: &str, config: RateLimitConfig) {
        self.buckets.lock().unwrap().entry(model_id.to_string()).or_insert_with(|| Bucket::new(config));
    }

    /// Blocks (async sleep) until a slot is available for `model_id`, or
    /// returns `Err` if doing so would exceed `deadline`.
    pub async fn acquire(&self, model_id: &str, estimated_tokens: u32) -> Result<(), Duration> {
        let wait = {
            let mut buckets = self.buckets.lock().unwrap();
            let bucket = buckets
                .entry(model_id.to_string())
                .or_insert_with(|| Bucket::new(RateLimitConfig { requests_per_minute: 60, tokens_per_minute: 100_000 }));
            bucket.wait_needed(estimated_tokens)
        };
        match wait {
            None => Ok(()),
            Some(wait) if wait <= self.deadline => {
                sleep(wait).await;
                Ok(())
            }
            Some(wait) => Err(wait),
        }
    }
}
