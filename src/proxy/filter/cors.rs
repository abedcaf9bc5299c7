use crate::config::CorsConfig;
use crate::proxy::context::{empty_body, RequestContext};
use http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN};
use http::{HeaderName, HeaderValue, Method, StatusCode};
use hyper::Response;

use super::FilterResult;

/// Sets the configured CORS headers on the eventual response, echoes an
/// allow-listed `Origin`, and answers preflight `OPTIONS` with 204.
#[derive(Debug, Clone, Default)]
pub struct CorsGate {
    origins: Vec<String>,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl CorsGate {
    pub fn new(cfg: &CorsConfig) -> Self {
        let headers = cfg
            .headers
            .iter()
            .filter_map(|(k, v)| {
                match (HeaderName::from_bytes(k.as_bytes()), HeaderValue::from_str(v)) {
                    (Ok(name), Ok(value)) => Some((name, value)),
                    _ => {
                        tracing::warn!("filter: cors: skipping invalid header, name={}", k);
                        None
                    }
                }
            })
            .collect();
        Self {
            origins: cfg.origins.clone(),
            headers,
        }
    }

    pub(super) fn on_request(
        &self,
        ctx: &mut RequestContext,
        parts: &http::request::Parts,
    ) -> FilterResult {
        for (name, value) in &self.headers {
            ctx.response_headers.insert(name.clone(), value.clone());
        }

        if let Some(origin) = parts.headers.get(ORIGIN) {
            let allowed = origin
                .to_str()
                .map(|o| self.origins.iter().any(|allowed| allowed == o))
                .unwrap_or(false);
            if allowed {
                ctx.response_headers
                    .insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            }
        }

        if parts.method == Method::OPTIONS {
            let mut resp = Response::new(empty_body());
            *resp.status_mut() = StatusCode::NO_CONTENT;
            return FilterResult::Reject(resp);
        }
        FilterResult::Continue
    }
}
