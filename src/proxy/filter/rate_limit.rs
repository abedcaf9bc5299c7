use crate::config::RateLimitAlgorithm;
use crate::error::GatewayError;
use crate::proxy::context::RequestContext;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::FilterResult;

/// Admission control shared by every request that reaches the root gates.
///
/// Implementations keep their state behind a single mutex held only for the
/// counter update, so `admit` never blocks on I/O.
pub trait RateLimiter: Send + Sync {
    /// `true` if the request identified by `client` may proceed.
    fn admit(&self, client: &str) -> bool;

    fn algorithm(&self) -> RateLimitAlgorithm;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Global token bucket. Every client draws from the same bucket.
///
/// Refill is whole tokens only: `elapsed / refill_rate` rounded down, and the
/// refill clock only advances when at least one token was added.
pub struct TokenBucket {
    max_tokens: u64,
    refill_rate: Duration,
    inner: Mutex<BucketState>,
}

struct BucketState {
    tokens: u64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket of `max_tokens`, gaining one token per `refill_rate`.
    pub fn new(max_tokens: u64, refill_rate: Duration) -> Self {
        Self::new_at(max_tokens, refill_rate, Instant::now())
    }

    pub fn new_at(max_tokens: u64, refill_rate: Duration, now: Instant) -> Self {
        Self {
            max_tokens,
            refill_rate,
            inner: Mutex::new(BucketState {
                tokens: max_tokens,
                last_refill: now,
            }),
        }
    }

    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    pub fn allow_at(&self, now: Instant) -> bool {
        let mut b = lock(&self.inner);

        let elapsed = now.saturating_duration_since(b.last_refill);
        let to_add = if self.refill_rate.is_zero() {
            self.max_tokens
        } else {
            u64::try_from(elapsed.as_nanos() / self.refill_rate.as_nanos()).unwrap_or(u64::MAX)
        };
        if to_add > 0 {
            b.tokens = b.tokens.saturating_add(to_add).min(self.max_tokens);
            b.last_refill = now;
        }

        if b.tokens > 0 {
            b.tokens -= 1;
            true
        } else {
            false
        }
    }
}

impl RateLimiter for TokenBucket {
    fn admit(&self, _client: &str) -> bool {
        self.allow()
    }

    fn algorithm(&self) -> RateLimitAlgorithm {
        RateLimitAlgorithm::TokenBucket
    }
}

/// Per-client request counter over a window that starts at the client's
/// first request and resets once it has expired.
///
/// Entries are never removed unless [`SlidingWindowCounter::start_eviction`]
/// is running.
pub struct SlidingWindowCounter {
    requests: u64,
    window: Duration,
    clients: Mutex<HashMap<String, ClientWindow>>,
}

#[derive(Debug, Clone, Copy)]
struct ClientWindow {
    count: u64,
    expires_at: Instant,
}

impl SlidingWindowCounter {
    pub fn new(requests: u64, window: Duration) -> Self {
        Self {
            requests,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn admit_at(&self, client: &str, now: Instant) -> bool {
        let count = {
            let mut clients = lock(&self.clients);
            let entry = clients.entry(client.to_string()).or_insert(ClientWindow {
                count: 0,
                expires_at: now + self.window,
            });
            if now > entry.expires_at {
                *entry = ClientWindow {
                    count: 0,
                    expires_at: now + self.window,
                };
            }
            entry.count += 1;
            entry.count
        };
        count <= self.requests
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        lock(&self.clients).len()
    }

    /// Drop clients whose window has expired as of `now`.
    pub fn evict_expired_at(&self, now: Instant) -> usize {
        let mut clients = lock(&self.clients);
        let before = clients.len();
        clients.retain(|_, w| w.expires_at >= now);
        before - clients.len()
    }

    /// Spawn a background task that evicts expired clients once per window.
    /// The task ends when the limiter is dropped.
    pub fn start_eviction(self: &Arc<Self>) {
        let limiter = Arc::downgrade(self);
        let period = self.window;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let evicted = limiter.evict_expired_at(Instant::now());
                if evicted > 0 {
                    tracing::debug!(
                        "filter: rate_limit: evicted expired clients, count={}",
                        evicted
                    );
                }
            }
        });
    }
}

impl RateLimiter for SlidingWindowCounter {
    fn admit(&self, client: &str) -> bool {
        self.admit_at(client, Instant::now())
    }

    fn algorithm(&self) -> RateLimitAlgorithm {
        RateLimitAlgorithm::SlidingWindow
    }
}

/// Build the limiter selected by configuration. Must run inside a tokio
/// runtime when `evict_expired` is set.
pub fn build_rate_limiter(
    quota: u64,
    algorithm: RateLimitAlgorithm,
    window: Duration,
    evict_expired: bool,
) -> Arc<dyn RateLimiter> {
    match algorithm {
        RateLimitAlgorithm::TokenBucket => Arc::new(TokenBucket::new(quota, window)),
        RateLimitAlgorithm::SlidingWindow => {
            let limiter = Arc::new(SlidingWindowCounter::new(quota, window));
            if evict_expired {
                limiter.start_eviction();
            }
            limiter
        }
    }
}

pub(super) fn rate_limit_on_request(
    limiter: &dyn RateLimiter,
    ctx: &RequestContext,
) -> FilterResult {
    let client = ctx.peer_addr.to_string();
    if limiter.admit(&client) {
        return FilterResult::Continue;
    }

    tracing::debug!(
        "filter: rate_limit: rejected, client={}, path={}",
        client,
        ctx.uri_path
    );
    metrics::counter!(
        "gateway_rate_limit_rejected_total",
        "algorithm" => limiter.algorithm().as_str(),
    )
    .increment(1);

    FilterResult::Reject(ctx.error_response(&GatewayError::RateLimited))
}
