pub mod types;


pub use types::*;

use anyhow::{Context, Result};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "/etc/goma/goma.yml";

/// Config file to use when none is given on the command line.
pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    config_path_with(explicit, |key| std::env::var_os(key))
}

fn config_path_with(
    explicit: Option<PathBuf>,
    lookup: impl Fn(&str) -> Option<OsString>,
) -> PathBuf {
    explicit
        .or_else(|| lookup("GOMA_PROXY_CONFIG_FILE").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Toml,
    Json,
}

fn parse<T: DeserializeOwned>(format: Format, content: &str) -> Result<T> {
    Ok(match format {
        Format::Yaml => serde_yaml::from_str(content)?,
        Format::Toml => toml::from_str(content)?,
        Format::Json => serde_json::from_str(content)?,
    })
}

/// Only checks whether the settings sit under a `gateway` key.
#[derive(Deserialize)]
struct RootKeys {
    #[serde(default)]
    gateway: Option<IgnoredAny>,
}

/// Layout where the settings sit under `gateway` and middleware
/// definitions may sit beside it.
#[derive(Deserialize)]
struct NestedConfig {
    gateway: GatewayConfig,
    #[serde(default, deserialize_with = "types::deserialize_null_default")]
    middlewares: Vec<MiddlewareConfig>,
}

impl NestedConfig {
    fn into_config(self) -> GatewayConfig {
        let mut config = self.gateway;
        config.middlewares.extend(self.middlewares);
        config
    }
}

fn format_of(path: &Path) -> Result<Format> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => Ok(Format::Yaml),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .yml, .toml or .json"),
        None => anyhow::bail!("config file has no extension, use .yml, .toml or .json"),
    }
}

impl GatewayConfig {
    /// Load configuration from `path`, apply environment overrides and
    /// validate. A missing file is replaced by the sample configuration,
    /// written to `path`, so a fresh install starts with something runnable.
    pub fn load(path: &Path) -> Result<Self> {
        let format = format_of(path)?;
        if !path.exists() {
            tracing::error!(
                "config: file not found, path={}, generating default configuration",
                path.display()
            );
            GatewayConfig::sample()
                .write_to(path)
                .with_context(|| format!("unable to write config file {}", path.display()))?;
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let mut config = Self::from_document(format, &content)
            .with_context(|| format!("in file {}", path.display()))?;

        config.apply_env_overrides();
        config.validate()?;

        tracing::info!(
            routes = config.routes.len(),
            middlewares = config.middlewares.len(),
            "loaded gateway configuration"
        );
        Ok(config)
    }

    /// Settings may be at the document root or nested under `gateway`.
    fn from_document(format: Format, content: &str) -> Result<Self> {
        match parse::<RootKeys>(format, content)?.gateway {
            Some(_) => Ok(parse::<NestedConfig>(format, content)?.into_config()),
            None => parse(format, content),
        }
    }

    /// Serialize to `path`, picking the format from its extension.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let content = match format_of(path)? {
            Format::Yaml => serde_yaml::to_string(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
            Format::Json => serde_json::to_string_pretty(self)?,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        tracing::info!("config: file written, path={}", path.display());
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overrides for deployment-specific settings. Routes and middlewares
    /// only come from the file.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("GOMA_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Some(v) = lookup("GOMA_RATE_LIMIT") {
            match v.parse::<u64>() {
                Ok(n) => self.rate_limit = n,
                Err(_) => tracing::warn!("config: ignoring GOMA_RATE_LIMIT, value={}", v),
            }
        }
        if let Some(v) = lookup("GOMA_RATE_LIMIT_ALGORITHM") {
            match v.as_str() {
                "sliding_window" => {
                    self.rate_limit_policy.algorithm = RateLimitAlgorithm::SlidingWindow
                }
                "token_bucket" => self.rate_limit_policy.algorithm = RateLimitAlgorithm::TokenBucket,
                _ => tracing::warn!("config: ignoring GOMA_RATE_LIMIT_ALGORITHM, value={}", v),
            }
        }
        if let Some(v) = lookup("GOMA_OUTBOUND_TIMEOUT") {
            self.outbound.timeout = Some(v);
        }
    }

    /// Structural checks. Unresolved middleware references are
    /// not rejected here: the route compiler logs and skips them.
    pub fn validate(&self) -> Result<()> {
        self.listen_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid listen_addr '{}'", self.listen_addr))?;
        self.rate_limit_window()?;
        self.outbound_timeout()?;

        let mut paths = HashSet::new();
        for route in &self.routes {
            if route.path.is_empty() {
                anyhow::bail!("route '{}' has empty path", route.name);
            }
            if !route.path.starts_with('/') {
                anyhow::bail!(
                    "route '{}': path '{}' must start with '/'",
                    route.name,
                    route.path
                );
            }
            if !paths.insert(route.path.as_str()) {
                anyhow::bail!("duplicate route path '{}'", route.path);
            }
            if route.destination.is_empty() {
                anyhow::bail!("route '{}' has empty destination", route.name);
            }
        }

        let mut names = HashSet::new();
        for mw in &self.middlewares {
            if mw.name.is_empty() {
                anyhow::bail!("middleware with empty name");
            }
            if !names.insert(mw.name.as_str()) {
                anyhow::bail!("duplicate middleware name '{}'", mw.name);
            }
            if !MIDDLEWARE_KINDS.contains(&mw.kind.as_str()) {
                anyhow::bail!(
                    "middleware '{}' has unknown type '{}', expected one of {:?}",
                    mw.name,
                    mw.kind,
                    MIDDLEWARE_KINDS
                );
            }
        }
        Ok(())
    }

    pub fn rate_limit_window(&self) -> Result<Duration> {
        let window = humantime::parse_duration(&self.rate_limit_policy.window)
            .with_context(|| format!("invalid rate_limit_policy.window '{}'", self.rate_limit_policy.window))?;
        if window.is_zero() {
            anyhow::bail!("rate_limit_policy.window must be greater than zero");
        }
        Ok(window)
    }

    pub fn outbound_timeout(&self) -> Result<Option<Duration>> {
        self.outbound
            .timeout
            .as_deref()
            .map(|t| {
                humantime::parse_duration(t)
                    .with_context(|| format!("invalid outbound.timeout '{}'", t))
            })
            .transpose()
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    /// Configuration written by `config init` and on first start.
    pub fn sample() -> Self {
        let cors_headers: BTreeMap<String, String> = [
            ("Access-Control-Allow-Origin", "*"),
            ("Access-Control-Allow-Headers", "*"),
            ("Access-Control-Allow-Methods", "*"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            cors: CorsConfig {
                origins: Vec::new(),
                headers: cors_headers,
            },
            routes: vec![
                RouteConfig {
                    name: "HealthCheck".to_string(),
                    path: "/healthy".to_string(),
                    rewrite: "/health".to_string(),
                    destination: "http://localhost:8080".to_string(),
                    ..Default::default()
                },
                RouteConfig {
                    name: "Hello".to_string(),
                    path: "/hello".to_string(),
                    rewrite: "/".to_string(),
                    destination: "http://localhost:8080".to_string(),
                    blocklist: vec!["/internal/*".to_string()],
                    middlewares: vec![RouteMiddleware {
                        path: "/admin".to_string(),
                        rules: vec!["basic-auth".to_string()],
                    }],
                    ..Default::default()
                },
            ],
            middlewares: vec![
                MiddlewareConfig {
                    name: "basic-auth".to_string(),
                    kind: "basic".to_string(),
                    rule: serde_json::json!({ "username": "goma", "password": "goma" }),
                },
                MiddlewareConfig {
                    name: "jwt-auth".to_string(),
                    kind: "jwt".to_string(),
                    rule: serde_json::json!({
                        "url": "http://localhost:9000/auth/verify",
                        "required_headers": ["Authorization"],
                        "headers": { "userId": "X-Auth-UserId" },
                        "params": { "userId": "auth_userId" },
                    }),
                },
            ],
            ..Default::default()
        }
    }
}
