use crate::error::GatewayError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Deserialize a `T` that implements `Default`, treating `null` the same as a
/// missing field. Use with:
///   `#[serde(default, deserialize_with = "deserialize_null_default")]`
pub(crate) fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Top-level gateway configuration. Read once at startup and never mutated
/// while the dispatch tree built from it is alive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr", alias = "listenAddr")]
    pub listen_addr: String,

    /// Seconds allowed to produce a response.
    #[serde(default = "default_io_timeout", alias = "writeTimeout")]
    pub write_timeout: u64,

    /// Seconds allowed to read request headers.
    #[serde(default = "default_io_timeout", alias = "readTimeout")]
    pub read_timeout: u64,

    /// Seconds an idle outbound connection stays pooled.
    #[serde(default = "default_idle_timeout", alias = "idleTimeout")]
    pub idle_timeout: u64,

    /// Requests admitted per window. `0` disables rate limiting.
    #[serde(default, alias = "rateLimiter", alias = "rateLimit")]
    pub rate_limit: u64,

    #[serde(default, alias = "rateLimitPolicy")]
    pub rate_limit_policy: RateLimitPolicy,

    /// Global CORS policy, applied before any route is matched.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub cors: CorsConfig,

    /// Replace per-route health error detail with a fixed notice.
    #[serde(default, alias = "disableRouteHealthCheckError")]
    pub disable_route_health_check_error: bool,

    #[serde(default, alias = "disableDisplayRouteOnStart")]
    pub disable_display_route_on_start: bool,

    #[serde(default)]
    pub outbound: OutboundConfig,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub routes: Vec<RouteConfig>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub middlewares: Vec<MiddlewareConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            write_timeout: default_io_timeout(),
            read_timeout: default_io_timeout(),
            idle_timeout: default_idle_timeout(),
            rate_limit: 0,
            rate_limit_policy: RateLimitPolicy::default(),
            cors: CorsConfig::default(),
            disable_route_health_check_error: false,
            disable_display_route_on_start: false,
            outbound: OutboundConfig::default(),
            routes: Vec::new(),
            middlewares: Vec::new(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_io_timeout() -> u64 {
    15
}

fn default_idle_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    /// Per-client fixed window that resets once it expires.
    #[default]
    SlidingWindow,
    /// One bucket shared by every client.
    TokenBucket,
}

impl RateLimitAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitAlgorithm::SlidingWindow => "sliding_window",
            RateLimitAlgorithm::TokenBucket => "token_bucket",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    #[serde(default)]
    pub algorithm: RateLimitAlgorithm,

    /// Window length as a human duration, e.g. `1m` or `30s`.
    #[serde(default = "default_window")]
    pub window: String,

    /// Periodically drop sliding-window entries whose window has expired.
    /// Off by default: the client map otherwise grows with every new client.
    #[serde(default)]
    pub evict_expired: bool,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            algorithm: RateLimitAlgorithm::default(),
            window: default_window(),
            evict_expired: false,
        }
    }
}

fn default_window() -> String {
    "1m".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins echoed back in `Access-Control-Allow-Origin`.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub origins: Vec<String>,

    /// Headers set unconditionally on every response.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub headers: BTreeMap<String, String>,
}

/// Outbound call policy shared by auth delegation, health probes and
/// backend forwarding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Deadline for a single outbound call as a human duration. Absent means
    /// calls run until the peer answers or the connection fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(default = "default_true")]
    pub tls_verify: bool,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            tls_verify: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Display name, used in logs and the health report.
    #[serde(default)]
    pub name: String,

    /// Path prefix. Must start with `/`.
    pub path: String,

    /// Replacement for `path` when forwarding. Empty keeps the path as is.
    #[serde(default)]
    pub rewrite: String,

    /// Absolute base URL of the single backend.
    pub destination: String,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub cors: CorsConfig,

    #[serde(default, alias = "disableXForward")]
    pub disable_x_forward: bool,

    /// Sub-path probed on the destination. Empty means health is undefined.
    #[serde(default, alias = "healthCheck")]
    pub health_check: String,

    /// Path suffixes under `path` that are refused with 403. A trailing
    /// `/*` blocks everything below the prefix.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub blocklist: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub middlewares: Vec<RouteMiddleware>,
}

/// Attaches named middleware definitions to a sub-path of a route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteMiddleware {
    #[serde(default)]
    pub path: String,

    /// Middleware names, applied in listed order.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    pub name: String,

    /// `basic`, `jwt` (alias `jwt-http`) or `http`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Untyped payload, interpreted according to `kind`.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub rule: serde_json::Value,
}

pub const MIDDLEWARE_KINDS: &[&str] = &["basic", "jwt", "jwt-http", "http"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicRule {
    pub username: String,
    pub password: String,
}

/// Rule shared by the `jwt` and `http` delegated-auth middlewares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardAuthRule {
    pub url: String,

    #[serde(
        default,
        alias = "requiredHeaders",
        deserialize_with = "deserialize_null_default"
    )]
    pub required_headers: Vec<String>,

    /// Auth-response header -> backend request header.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub headers: BTreeMap<String, String>,

    /// Auth-response header -> backend query parameter.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub params: BTreeMap<String, String>,
}

/// A middleware definition with its rule payload decoded for its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiddlewareRule {
    Basic(BasicRule),
    Jwt(ForwardAuthRule),
    Http(ForwardAuthRule),
}

impl MiddlewareConfig {
    /// Decode `rule` according to `kind`.
    pub fn resolve(&self) -> Result<MiddlewareRule, GatewayError> {
        let invalid = |reason: String| GatewayError::InvalidMiddleware {
            name: self.name.clone(),
            reason,
        };
        match self.kind.as_str() {
            "basic" => serde_json::from_value(self.rule.clone())
                .map(MiddlewareRule::Basic)
                .map_err(|e| invalid(e.to_string())),
            "jwt" | "jwt-http" => serde_json::from_value(self.rule.clone())
                .map(MiddlewareRule::Jwt)
                .map_err(|e| invalid(e.to_string())),
            "http" => serde_json::from_value(self.rule.clone())
                .map(MiddlewareRule::Http)
                .map_err(|e| invalid(e.to_string())),
            other => Err(invalid(format!("unknown type '{}'", other))),
        }
    }
}
