//! Rate limiting middleware using token bucket algorithm

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use flowllm_common::errors::AppError;
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Process-wide token bucket
pub struct ApiRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, QuantaClock>,
    requests_per_second: u32,
}

impl ApiRateLimiter {
    pub fn new(requests_per_second: u32, burst: u32) -> Arc<Self> {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst.max(requests_per_second)).unwrap_or(rate);

        Arc::new(Self {
            limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
            requests_per_second: rate.get(),
        })
    }

    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

/// Reject requests over the limit with 429
pub async fn rate_limit(
    State(limiter): State<Arc<ApiRateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !limiter.check() {
        tracing::warn!("Rate limit exceeded");
        return Err(AppError::RateLimited {
            limit: limiter.requests_per_second,
        });
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_is_exhausted() {
        let limiter = ApiRateLimiter::new(1, 2);
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        let limiter = ApiRateLimiter::new(0, 0);
        assert_eq!(limiter.requests_per_second, 1);
        assert!(limiter.check());
    }
}
