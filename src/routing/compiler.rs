use crate::config::{GatewayConfig, MiddlewareConfig, MiddlewareRule, RouteConfig, RouteMiddleware};
use crate::error::GatewayError;
use crate::proxy::filter::auth::{BasicAuth, ForwardAuth, ForwardAuthKind};
use crate::proxy::filter::blocklist::BlocklistGuard;
use crate::proxy::filter::cors::CorsGate;
use crate::proxy::filter::rate_limit::{build_rate_limiter, RateLimiter};
use crate::proxy::filter::Filter;
use crate::routing::path::join_paths;
use anyhow::Result;
use http::Method;
use std::collections::HashMap;
use std::sync::Arc;

/// Path answered by the health probe (GET only).
pub const HEALTH_PATH: &str = "/health";

/// Forwarding parameters of a route, shared by all branches built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRoute {
    pub name: String,
    pub path: String,
    pub rewrite: String,
    pub destination: String,
    pub disable_x_forward: bool,
}

impl From<&RouteConfig> for CompiledRoute {
    fn from(r: &RouteConfig) -> Self {
        Self {
            name: r.name.clone(),
            path: r.path.clone(),
            rewrite: r.rewrite.clone(),
            destination: r.destination.clone(),
            disable_x_forward: r.disable_x_forward,
        }
    }
}

/// A path prefix with the gates a request must pass before being forwarded
/// to `route`.
#[derive(Debug)]
pub struct Branch {
    pub prefix: String,
    /// Built from a route middleware reference rather than the route itself.
    pub secured: bool,
    pub filters: Vec<Filter>,
    pub route: Arc<CompiledRoute>,
}

/// Where a request goes after the root gates.
#[derive(Debug)]
pub enum Target<'a> {
    Health,
    Branch(&'a Branch),
}

/// Immutable result of compiling a [`GatewayConfig`].
///
/// Requests first pass `root_filters`, then the gates of the first branch
/// whose prefix matches, in registration order.
#[derive(Debug)]
pub struct DispatchTree {
    root_filters: Vec<Filter>,
    branches: Vec<Branch>,
}

impl DispatchTree {
    pub fn root_filters(&self) -> &[Filter] {
        &self.root_filters
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// First match wins. Prefixes compare as plain strings, so `/hello`
    /// also covers `/helloworld`.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<Target<'_>> {
        if method == Method::GET && path == HEALTH_PATH {
            return Some(Target::Health);
        }
        self.branches
            .iter()
            .find(|b| path.starts_with(b.prefix.as_str()))
            .map(Target::Branch)
    }
}

/// Builds the [`DispatchTree`] for a configuration.
///
/// Middleware definitions are indexed by name once; route references are
/// resolved against that index while compiling.
pub struct RouteCompiler<'a> {
    config: &'a GatewayConfig,
    middlewares: HashMap<&'a str, &'a MiddlewareConfig>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    auth_client: reqwest::Client,
}

impl<'a> RouteCompiler<'a> {
    /// `auth_client` is shared by every delegated-auth gate.
    pub fn new(config: &'a GatewayConfig, auth_client: reqwest::Client) -> Self {
        let middlewares = config
            .middlewares
            .iter()
            .map(|m| (m.name.as_str(), m))
            .collect();
        Self {
            config,
            middlewares,
            rate_limiter: None,
            auth_client,
        }
    }

    /// Use `limiter` instead of building one from the rate limit policy.
    /// Only consulted when the configured quota is non-zero.
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn compile(self) -> Result<DispatchTree> {
        let cfg = self.config;
        let mut root_filters = vec![Filter::Cors(CorsGate::new(&cfg.cors))];

        if cfg.rate_limit > 0 {
            let limiter = match self.rate_limiter.clone() {
                Some(l) => l,
                None => build_rate_limiter(
                    cfg.rate_limit,
                    cfg.rate_limit_policy.algorithm,
                    cfg.rate_limit_window()?,
                    cfg.rate_limit_policy.evict_expired,
                ),
            };
            tracing::info!(
                "route: rate limiting enabled, algorithm={}, quota={}, window={}",
                limiter.algorithm().as_str(),
                cfg.rate_limit,
                cfg.rate_limit_policy.window
            );
            root_filters.push(Filter::RateLimit(limiter));
        }

        let routes: Vec<&RouteConfig> = cfg
            .routes
            .iter()
            .filter(|r| {
                if r.path.is_empty() {
                    tracing::warn!("route: skipping route with empty path, name={}", r.name);
                }
                !r.path.is_empty()
            })
            .collect();

        for route in &routes {
            if !route.blocklist.is_empty() {
                root_filters.push(Filter::Blocklist(BlocklistGuard::new(
                    &route.name,
                    &route.path,
                    &route.blocklist,
                )));
            }
        }

        let mut branches = Vec::new();
        for route in &routes {
            let compiled = Arc::new(CompiledRoute::from(*route));

            for reference in &route.middlewares {
                let prefix = join_paths(&route.path, &reference.path);
                match self.auth_gates(reference) {
                    Ok(gates) => {
                        let mut filters = Vec::with_capacity(gates.len() + 1);
                        filters.push(Filter::Cors(CorsGate::new(&route.cors)));
                        filters.extend(gates);
                        branches.push(Branch {
                            prefix,
                            secured: true,
                            filters,
                            route: compiled.clone(),
                        });
                    }
                    Err(e) => {
                        tracing::error!(
                            "route: secured path disabled, route={}, path={}, error={}",
                            route.name,
                            prefix,
                            e
                        );
                    }
                }
            }

            branches.push(Branch {
                prefix: route.path.clone(),
                secured: false,
                filters: vec![Filter::Cors(CorsGate::new(&route.cors))],
                route: compiled,
            });
        }

        Ok(DispatchTree {
            root_filters,
            branches,
        })
    }

    /// Gates for one middleware reference, in listed order. Any unresolved
    /// or malformed definition fails the whole reference.
    fn auth_gates(&self, reference: &RouteMiddleware) -> Result<Vec<Filter>, GatewayError> {
        reference
            .rules
            .iter()
            .map(|name| {
                let def = self
                    .middlewares
                    .get(name.as_str())
                    .ok_or_else(|| GatewayError::MiddlewareNotFound(name.clone()))?;
                let gate = match def.resolve()? {
                    MiddlewareRule::Basic(rule) => Filter::BasicAuth(BasicAuth::new(name, rule)),
                    MiddlewareRule::Jwt(rule) => Filter::ForwardAuth(ForwardAuth::new(
                        name,
                        ForwardAuthKind::Jwt,
                        rule,
                        self.auth_client.clone(),
                    )),
                    MiddlewareRule::Http(rule) => Filter::ForwardAuth(ForwardAuth::new(
                        name,
                        ForwardAuthKind::Http,
                        rule,
                        self.auth_client.clone(),
                    )),
                };
                Ok(gate)
            })
            .collect()
    }
}
