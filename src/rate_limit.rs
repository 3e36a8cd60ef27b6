/// Rate Limiting System
///
/// Two limiters live here:
/// - [`EmailRateLimiter`] bounds outgoing confirmation / notification emails
///   per source ip and per target address using fixed time windows.
/// - [`RequestThrottle`] is a coarse per-ip request limiter applied to every
///   incoming request.
use crate::{context::AppContext, error::PadlockError};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter as GovernorLimiter};
use parking_lot::Mutex;
use std::{collections::HashMap, num::NonZeroU32, time::Duration};

/// Which part of the (ip, email) pair a quota is counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaScope {
    Ip,
    Email,
}

/// At most `max` actions per `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuota {
    pub scope: QuotaScope,
    pub window: Duration,
    pub max: u32,
}

impl RateQuota {
    pub fn per_minute(scope: QuotaScope, max: u32) -> Self {
        Self {
            scope,
            window: Duration::from_secs(60),
            max,
        }
    }

    /// Index of the time bucket containing `now`
    fn bucket(&self, now: DateTime<Utc>) -> i64 {
        let window_ms = self.window.as_millis().max(1) as i64;
        now.timestamp_millis().div_euclid(window_ms)
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowCount {
    bucket: i64,
    count: u32,
}

/// Fixed-window quota limiter for outgoing emails
///
/// An action is allowed only if every configured quota still has budget for
/// its key; an allowed action consumes one unit of every quota. Counters of a
/// past window are simply replaced when a new window starts.
pub struct EmailRateLimiter {
    quotas: Vec<RateQuota>,
    counters: Mutex<HashMap<(usize, String), WindowCount>>,
}

/// Counter entries above which stale windows get dropped
const MAX_TRACKED_KEYS: usize = 10_000;

impl EmailRateLimiter {
    pub fn new(quotas: Vec<RateQuota>) -> Self {
        Self {
            quotas,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Check and consume one action for the given pair
    pub fn allow(&self, ip: &str, email: &str) -> bool {
        self.allow_at(ip, email, Utc::now())
    }

    pub fn allow_at(&self, ip: &str, email: &str, now: DateTime<Utc>) -> bool {
        let mut counters = self.counters.lock();

        if counters.len() > MAX_TRACKED_KEYS {
            let quotas = &self.quotas;
            counters.retain(|(index, _), window| window.bucket == quotas[*index].bucket(now));
        }

        let keys: Vec<(usize, String, i64)> = self
            .quotas
            .iter()
            .enumerate()
            .map(|(index, quota)| {
                let key = match quota.scope {
                    QuotaScope::Ip => ip.to_string(),
                    QuotaScope::Email => email.to_lowercase(),
                };
                (index, key, quota.bucket(now))
            })
            .collect();

        let exhausted = keys.iter().any(|(index, key, bucket)| {
            let used = counters
                .get(&(*index, key.clone()))
                .filter(|w| w.bucket == *bucket)
                .map_or(0, |w| w.count);
            used >= self.quotas[*index].max
        });

        if exhausted {
            tracing::debug!(ip, email, "Email rate limit reached");
            return false;
        }

        for (index, key, bucket) in keys {
            let window = counters
                .entry((index, key))
                .or_insert(WindowCount { bucket, count: 0 });
            if window.bucket != bucket {
                *window = WindowCount { bucket, count: 0 };
            }
            window.count += 1;
        }

        true
    }
}

impl Default for EmailRateLimiter {
    /// 5 emails per minute per ip and 5 per minute per address
    fn default() -> Self {
        Self::new(vec![
            RateQuota::per_minute(QuotaScope::Ip, 5),
            RateQuota::per_minute(QuotaScope::Email, 5),
        ])
    }
}

/// Per-ip request limiter
pub struct RequestThrottle {
    limiter: Option<DefaultKeyedRateLimiter<String>>,
}

impl RequestThrottle {
    /// `requests_per_minute == 0` disables throttling
    pub fn new(requests_per_minute: u32) -> Self {
        let limiter = NonZeroU32::new(requests_per_minute)
            .map(|rpm| GovernorLimiter::keyed(Quota::per_minute(rpm)));
        Self { limiter }
    }

    pub fn disabled() -> Self {
        Self { limiter: None }
    }

    pub fn check(&self, ip: &str) -> Result<(), PadlockError> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        if limiter.len() > MAX_TRACKED_KEYS {
            limiter.retain_recent();
        }

        limiter
            .check_key(&ip.to_string())
            .map_err(|_| PadlockError::RateLimitExceeded)
    }
}

/// Rate limiting middleware
pub async fn throttle_middleware(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Response {
    let ip = crate::api::client_ip(&request);

    match ctx.request_throttle.check(&ip) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::info!(ip = %ip, "Request throttled");
            e.into_response()
        }
    }
}
