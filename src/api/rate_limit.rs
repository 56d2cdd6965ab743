//! IP-keyed request throttling for the HTTP surface.
//!
//! A token bucket per client IP: requests spend one token, tokens refill at
//! the configured sustained rate up to a burst ceiling. Exhausted clients
//! get a 429 with `Retry-After`.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;

use super::routes::AppState;
use crate::error::ApiError;

/// Per-IP token bucket state.
#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// IP-keyed token-bucket limiter.
#[derive(Debug)]
pub struct IpRateLimiter {
    buckets: DashMap<IpAddr, TokenBucket>,
    rate_per_second: f64,
    burst: f64,
}

impl IpRateLimiter {
    /// Create a limiter allowing `rate_per_second` sustained requests with a
    /// `burst` allowance.
    #[must_use]
    pub fn new(rate_per_second: u32, burst: u32) -> Arc<Self> {
        Arc::new(Self {
            buckets: DashMap::new(),
            rate_per_second: f64::from(rate_per_second.max(1)),
            burst: f64::from(burst.max(1)),
        })
    }

    /// Spend one token for `ip`.
    ///
    /// # Errors
    ///
    /// Returns the suggested `Retry-After` seconds when the bucket is empty.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(ip).or_insert(TokenBucket {
            tokens: self.burst,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_second).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            // Precision loss is irrelevant for a retry hint
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let retry_after = ((1.0 - bucket.tokens) / self.rate_per_second).ceil() as u64;
            Err(retry_after.max(1))
        }
    }
}

/// Axum middleware applying the limiter to every request.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    match state.limiter.check(addr.ip()) {
        Ok(()) => next.run(request).await,
        Err(retry_after_secs) => ApiError::RateLimited { retry_after_secs }.into_response(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_throttled() {
        let limiter = IpRateLimiter::new(1, 3);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        assert!(limiter.check(ip).is_ok());
        assert!(limiter.check(ip).is_ok());
        assert!(limiter.check(ip).is_ok());

        let retry_after = limiter.check(ip).unwrap_err();
        assert!(retry_after >= 1);
    }

    #[test]
    fn clients_are_isolated() {
        let limiter = IpRateLimiter::new(1, 1);
        let first: IpAddr = "10.0.0.1".parse().unwrap();
        let second: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(first).is_ok());
        assert!(limiter.check(first).is_err());
        assert!(limiter.check(second).is_ok());
    }
}
