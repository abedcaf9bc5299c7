use crate::error::GatewayError;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::Response;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Build a JSON response with the given status.
pub fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<BoxBody> {
    let mut resp = Response::new(full_body(body.to_string()));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

/// Per-request state threaded through the gates and the forwarding phase.
pub struct RequestContext {
    pub host: String,
    pub uri_path: String,
    pub method: String,
    pub route_name: String,
    pub peer_addr: SocketAddr,
    pub start: Instant,
    pub upstream_start: Option<Instant>,
    /// Headers contributed by gates (CORS). Merged into whatever response
    /// is finally written, rejections included.
    pub response_headers: HeaderMap,
}

impl RequestContext {
    pub fn new(host: String, uri_path: String, method: String, peer_addr: SocketAddr) -> Self {
        Self {
            host,
            uri_path,
            method,
            route_name: String::new(),
            peer_addr,
            start: Instant::now(),
            upstream_start: None,
            response_headers: HeaderMap::new(),
        }
    }

    pub fn client_ip(&self) -> IpAddr {
        self.peer_addr.ip()
    }

    /// `{"success":false,"code":N,"message":...}` for `err`.
    pub fn error_response(&self, err: &GatewayError) -> Response<BoxBody> {
        let status = err.status();
        json_response(
            status,
            &serde_json::json!({
                "success": false,
                "code": status.as_u16(),
                "message": err.client_message(),
            }),
        )
    }

    /// Copy gate-contributed headers onto `resp`, overriding same-named ones.
    pub fn apply_response_headers(&self, resp: &mut Response<BoxBody>) {
        for (name, value) in &self.response_headers {
            resp.headers_mut().insert(name.clone(), value.clone());
        }
    }

    pub fn finalize_metrics(&self, resp_status: u16) {
        let mut buf = itoa::Buffer::new();
        let status_str = buf.format(resp_status);

        metrics::counter!(
            "gateway_http_requests_total",
            "route" => self.route_name.clone(),
            "method" => self.method.clone(),
            "status_code" => status_str.to_owned(),
        )
        .increment(1);

        metrics::histogram!(
            "gateway_http_request_duration_seconds",
            "route" => self.route_name.clone(),
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}
