pub mod auth;
pub mod blocklist;
pub mod cors;
pub mod rate_limit;

use crate::proxy::context::{BoxBody, RequestContext};
use auth::{BasicAuth, ForwardAuth};
use blocklist::BlocklistGuard;
use cors::CorsGate;
use rate_limit::RateLimiter;
use std::sync::Arc;

/// Result of a gate's request phase.
pub enum FilterResult {
    /// Continue to the next gate.
    Continue,
    /// Short-circuit: answer with this response.
    Reject(hyper::Response<BoxBody>),
}

/// A request gate. Gates are built once by the route compiler and shared by
/// every request walking the branch that holds them.
pub enum Filter {
    Cors(CorsGate),
    RateLimit(Arc<dyn RateLimiter>),
    Blocklist(BlocklistGuard),
    BasicAuth(BasicAuth),
    ForwardAuth(ForwardAuth),
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

impl Filter {
    /// Short label used in the admin route listing.
    pub fn describe(&self) -> String {
        match self {
            Filter::Cors(_) => "cors".to_string(),
            Filter::RateLimit(l) => format!("rate_limit({})", l.algorithm().as_str()),
            Filter::Blocklist(_) => "blocklist".to_string(),
            Filter::BasicAuth(b) => format!("basic({})", b.name()),
            Filter::ForwardAuth(a) => format!("{}({})", a.kind().as_str(), a.name()),
        }
    }

    /// Request phase. May mutate the outbound request (auth injection) and
    /// the headers destined for the response (CORS).
    pub async fn on_request(
        &self,
        ctx: &mut RequestContext,
        parts: &mut http::request::Parts,
    ) -> FilterResult {
        match self {
            Filter::Cors(gate) => gate.on_request(ctx, parts),
            Filter::RateLimit(limiter) => rate_limit::rate_limit_on_request(limiter.as_ref(), ctx),
            Filter::Blocklist(guard) => guard.on_request(ctx),
            Filter::BasicAuth(gate) => gate.on_request(ctx, parts),
            Filter::ForwardAuth(gate) => gate.on_request(ctx, parts).await,
        }
    }
}

/// Run `filters` in order, stopping at the first rejection.
pub async fn run_filters(
    filters: &[Filter],
    ctx: &mut RequestContext,
    parts: &mut http::request::Parts,
) -> Option<hyper::Response<BoxBody>> {
    for filter in filters {
        if let FilterResult::Reject(resp) = filter.on_request(ctx, parts).await {
            return Some(resp);
        }
    }
    None
}
