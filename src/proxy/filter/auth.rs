use crate::config::{BasicRule, ForwardAuthRule};
use crate::error::GatewayError;
use crate::proxy::context::RequestContext;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING, WWW_AUTHENTICATE};
use http::uri::PathAndQuery;
use http::{HeaderMap, HeaderName, HeaderValue, Uri};

use super::FilterResult;

/// `Authorization: Basic` check against a single username/password pair.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    name: String,
    rule: BasicRule,
}

impl BasicAuth {
    pub fn new(name: &str, rule: BasicRule) -> Self {
        Self {
            name: name.to_string(),
            rule,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accept only an exact `user:pass` match.
    pub fn verify(&self, headers: &HeaderMap) -> Result<(), GatewayError> {
        let header = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(GatewayError::Unauthorized)?;
        let encoded = header
            .strip_prefix("Basic ")
            .ok_or(GatewayError::Unauthorized)?;
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|_| GatewayError::Unauthorized)?;
        let payload = String::from_utf8(decoded).map_err(|_| GatewayError::Unauthorized)?;

        match payload.split_once(':') {
            Some((user, pass)) if user == self.rule.username && pass == self.rule.password => {
                Ok(())
            }
            _ => Err(GatewayError::Unauthorized),
        }
    }

    pub(super) fn on_request(
        &self,
        ctx: &RequestContext,
        parts: &http::request::Parts,
    ) -> FilterResult {
        match self.verify(&parts.headers) {
            Ok(()) => {
                tracing::info!(
                    "filter: auth: basic: accepted, middleware={}, path={}",
                    self.name,
                    ctx.uri_path
                );
                record_auth("basic", "accepted");
                FilterResult::Continue
            }
            Err(e) => {
                tracing::error!(
                    "filter: auth: basic: rejected, middleware={}, path={}, error={}",
                    self.name,
                    ctx.uri_path,
                    e
                );
                record_auth("basic", "rejected");
                let mut resp = ctx.error_response(&e);
                resp.headers_mut().insert(
                    WWW_AUTHENTICATE,
                    HeaderValue::from_static(r#"Basic realm="Restricted""#),
                );
                FilterResult::Reject(resp)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardAuthKind {
    Jwt,
    Http,
}

impl ForwardAuthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardAuthKind::Jwt => "jwt",
            ForwardAuthKind::Http => "http",
        }
    }
}

/// Delegates the decision to an external service with a GET carrying the
/// original request's headers and cookies. A 2xx answer admits the request;
/// configured auth-response headers are then copied onto the request as
/// headers or query parameters.
#[derive(Debug, Clone)]
pub struct ForwardAuth {
    name: String,
    kind: ForwardAuthKind,
    url: String,
    required_headers: Vec<String>,
    inject_headers: Vec<(HeaderName, HeaderName)>,
    inject_params: Vec<(HeaderName, String)>,
    client: reqwest::Client,
}

impl ForwardAuth {
    pub fn new(
        name: &str,
        kind: ForwardAuthKind,
        rule: ForwardAuthRule,
        client: reqwest::Client,
    ) -> Self {
        let inject_headers = rule
            .headers
            .iter()
            .filter_map(|(src, dst)| match (header_name(src), header_name(dst)) {
                (Some(s), Some(d)) => Some((s, d)),
                _ => {
                    tracing::warn!(
                        "filter: auth: skipping invalid header mapping, middleware={}, {} -> {}",
                        name,
                        src,
                        dst
                    );
                    None
                }
            })
            .collect();
        let inject_params = rule
            .params
            .iter()
            .filter_map(|(src, param)| match header_name(src) {
                Some(s) => Some((s, param.clone())),
                None => {
                    tracing::warn!(
                        "filter: auth: skipping invalid param mapping, middleware={}, header={}",
                        name,
                        src
                    );
                    None
                }
            })
            .collect();

        Self {
            name: name.to_string(),
            kind,
            url: rule.url,
            required_headers: rule.required_headers,
            inject_headers,
            inject_params,
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ForwardAuthKind {
        self.kind
    }

    pub(super) async fn on_request(
        &self,
        ctx: &RequestContext,
        parts: &mut http::request::Parts,
    ) -> FilterResult {
        match self.authorize(parts).await {
            Ok(()) => {
                tracing::info!(
                    "filter: auth: {}: accepted, middleware={}, path={}",
                    self.kind.as_str(),
                    self.name,
                    ctx.uri_path
                );
                record_auth(self.kind.as_str(), "accepted");
                FilterResult::Continue
            }
            Err(e) => {
                tracing::error!(
                    "filter: auth: {}: rejected, middleware={}, method={}, client={}, path={}, error={}",
                    self.kind.as_str(),
                    self.name,
                    ctx.method,
                    ctx.peer_addr,
                    ctx.uri_path,
                    e
                );
                record_auth(self.kind.as_str(), "rejected");
                FilterResult::Reject(ctx.error_response(&e))
            }
        }
    }

    /// Header check, auth call, then injection into `parts`.
    async fn authorize(&self, parts: &mut http::request::Parts) -> Result<(), GatewayError> {
        for required in &self.required_headers {
            let present = parts
                .headers
                .get(required.as_str())
                .map(|v| !v.is_empty())
                .unwrap_or(false);
            if !present {
                return Err(GatewayError::MissingHeader(required.clone()));
            }
        }

        let url = url::Url::parse(&self.url)
            .map_err(|e| GatewayError::InvalidDestination(format!("{}: {}", self.url, e)))?;

        // Headers describing the inbound hop are not replayed.
        let mut headers = parts.headers.clone();
        for h in [HOST, CONTENT_LENGTH, TRANSFER_ENCODING] {
            headers.remove(h);
        }

        let auth_resp = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamAuth(e.to_string()))?;
        let status = auth_resp.status();
        if !status.is_success() {
            return Err(GatewayError::UpstreamAuth(format!(
                "auth service answered {}",
                status.as_u16()
            )));
        }
        let auth_headers = auth_resp.headers();

        for (src, dst) in &self.inject_headers {
            let value = auth_headers
                .get(src)
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static(""));
            parts.headers.insert(dst.clone(), value);
        }

        if !self.inject_params.is_empty() {
            let injected: Vec<(&str, String)> = self
                .inject_params
                .iter()
                .map(|(src, param)| {
                    let value = auth_headers
                        .get(src)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    (param.as_str(), value)
                })
                .collect();
            parts.uri = set_query_params(&parts.uri, &injected)?;
        }

        Ok(())
    }
}

fn header_name(s: &str) -> Option<HeaderName> {
    HeaderName::from_bytes(s.as_bytes()).ok()
}

/// Replace (or add) query parameters on `uri`, keeping the other pairs in
/// their original order.
fn set_query_params(uri: &Uri, params: &[(&str, String)]) -> Result<Uri, GatewayError> {
    let existing: Vec<(String, String)> = uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let mut ser = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in &existing {
        if params.iter().all(|(p, _)| p != k) {
            ser.append_pair(k, v);
        }
    }
    for (k, v) in params {
        ser.append_pair(k, v);
    }
    let query = ser.finish();

    let pq = format!("{}?{}", uri.path(), query);
    let mut uri_parts = uri.clone().into_parts();
    uri_parts.path_and_query = Some(
        PathAndQuery::try_from(pq).map_err(|e| GatewayError::Internal(e.to_string()))?,
    );
    Uri::from_parts(uri_parts).map_err(|e| GatewayError::Internal(e.to_string()))
}

fn record_auth(kind: &'static str, result: &'static str) {
    metrics::counter!(
        "gateway_auth_total",
        "kind" => kind,
        "result" => result,
    )
    .increment(1);
}
