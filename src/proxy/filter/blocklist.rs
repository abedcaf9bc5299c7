use crate::error::GatewayError;
use crate::proxy::context::RequestContext;
use crate::routing::path::{is_blocked, join_paths};

use super::FilterResult;

/// A route's blocklist, resolved against the route path at compile time.
#[derive(Debug, Clone)]
pub struct BlocklistGuard {
    route_name: String,
    blocked: Vec<String>,
}

impl BlocklistGuard {
    pub fn new(route_name: &str, route_path: &str, entries: &[String]) -> Self {
        Self {
            route_name: route_name.to_string(),
            blocked: entries.iter().map(|b| join_paths(route_path, b)).collect(),
        }
    }

    pub fn blocked_paths(&self) -> &[String] {
        &self.blocked
    }

    pub(super) fn on_request(&self, ctx: &RequestContext) -> FilterResult {
        let Some(hit) = self.blocked.iter().find(|b| is_blocked(&ctx.uri_path, b)) else {
            return FilterResult::Continue;
        };

        tracing::error!(
            "filter: blocklist: access forbidden, route={}, path={}, rule={}",
            self.route_name,
            ctx.uri_path,
            hit
        );
        metrics::counter!(
            "gateway_blocklist_rejected_total",
            "route" => self.route_name.clone(),
        )
        .increment(1);

        FilterResult::Reject(ctx.error_response(&GatewayError::Forbidden(ctx.uri_path.clone())))
    }
}
