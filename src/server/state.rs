use crate::config::GatewayConfig;
use crate::proxy::filter::rate_limit::RateLimiter;
use crate::routing::{DispatchTree, RouteCompiler};
use crate::upstream::{HealthProbe, OutboundPolicy, ProxyClient};
use anyhow::Result;
use std::sync::Arc;

/// Shared gateway state, cheaply cloneable.
///
/// Everything here is built once from the configuration and never mutated;
/// the only cross-request mutable state lives inside the rate limiter.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub dispatch: Arc<DispatchTree>,
    pub health: Arc<HealthProbe>,
    pub proxy_client: ProxyClient,
    pub policy: OutboundPolicy,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Same as [`GatewayState::new`] but with a caller-supplied limiter in
    /// place of the one described by the rate limit policy.
    pub fn with_rate_limiter(config: GatewayConfig, limiter: Arc<dyn RateLimiter>) -> Result<Self> {
        Self::build(config, Some(limiter))
    }

    fn build(config: GatewayConfig, limiter: Option<Arc<dyn RateLimiter>>) -> Result<Self> {
        let policy = OutboundPolicy::from_config(&config)?;
        let http_client = policy.http_client()?;

        let mut compiler = RouteCompiler::new(&config, http_client.clone());
        if let Some(l) = limiter {
            compiler = compiler.with_rate_limiter(l);
        }
        let dispatch = compiler.compile()?;
        let health = HealthProbe::new(&config, http_client);

        tracing::info!(
            "server: dispatch tree compiled, branches={}, root_filters={}",
            dispatch.branches().len(),
            dispatch.root_filters().len()
        );

        Ok(Self {
            proxy_client: policy.proxy_client(),
            config: Arc::new(config),
            dispatch: Arc::new(dispatch),
            health: Arc::new(health),
            policy,
        })
    }

    /// Log the compiled branches, one line each.
    pub fn log_routes(&self) {
        for branch in self.dispatch.branches() {
            tracing::info!(
                "route: name={}, path={}, destination={}, secured={}",
                branch.route.name,
                branch.prefix,
                branch.route.destination,
                branch.secured
            );
        }
    }
}
