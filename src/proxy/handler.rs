use crate::error::GatewayError;
use crate::proxy::context::{json_response, BoxBody, RequestContext};
use crate::proxy::filter::run_filters;
use crate::routing::path::{rewrite, single_joining_slash};
use crate::routing::{CompiledRoute, Target};
use crate::server::GatewayState;
use http::header::{CONNECTION, HOST, TRANSFER_ENCODING};
use http::{HeaderName, HeaderValue, StatusCode, Uri};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::net::SocketAddr;
use std::time::Instant;

/// Handle an incoming request:
///
/// 1. RESOLVE  - health endpoint or first matching branch
/// 2. ROOT     - global gates (CORS, rate limit, blocklists)
/// 3. BRANCH   - branch gates (route CORS, auth)
/// 4. FORWARD  - rewrite and stream to the route destination
/// 5. LOG      - merge gate headers, metrics, access log
pub async fn handle_request(
    req: Request<Incoming>,
    state: GatewayState,
    peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, hyper::Error> {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let uri_path = req.uri().path().to_string();
    let method = req.method().as_str().to_string();

    tracing::info!(
        "proxy: request received, method={}, path={}, peer={}",
        method,
        uri_path,
        peer_addr
    );

    let mut ctx = RequestContext::new(host, uri_path, method, peer_addr);
    let (mut parts, body) = req.into_parts();

    let mut resp = dispatch(&state, &mut ctx, &mut parts, body).await;

    ctx.apply_response_headers(&mut resp);
    phase_log(&ctx, &resp);
    Ok(resp)
}

async fn dispatch(
    state: &GatewayState,
    ctx: &mut RequestContext,
    parts: &mut http::request::Parts,
    body: Incoming,
) -> Response<BoxBody> {
    let Some(target) = state.dispatch.resolve(&parts.method, &ctx.uri_path) else {
        tracing::debug!("proxy: no route matched, path={}", ctx.uri_path);
        return ctx.error_response(&GatewayError::NotFound);
    };

    if let Some(resp) = run_filters(state.dispatch.root_filters(), ctx, parts).await {
        return resp;
    }

    match target {
        Target::Health => {
            ctx.route_name = "health".to_string();
            let report = state.health.check_all().await;
            match serde_json::to_value(&report) {
                Ok(v) => json_response(StatusCode::OK, &v),
                Err(e) => ctx.error_response(&GatewayError::Internal(e.to_string())),
            }
        }
        Target::Branch(branch) => {
            ctx.route_name = branch.route.name.clone();
            if let Some(resp) = run_filters(&branch.filters, ctx, parts).await {
                return resp;
            }
            match forward(state, ctx, parts, body, &branch.route).await {
                Ok(resp) => resp,
                Err(e) => ctx.error_response(&e),
            }
        }
    }
}

async fn forward(
    state: &GatewayState,
    ctx: &mut RequestContext,
    parts: &http::request::Parts,
    body: Incoming,
    route: &CompiledRoute,
) -> Result<Response<BoxBody>, GatewayError> {
    let destination = url::Url::parse(&route.destination).map_err(|e| {
        tracing::error!(
            "proxy: invalid destination, route={}, destination={}, error={}",
            route.name,
            route.destination,
            e
        );
        GatewayError::InvalidDestination(route.destination.clone())
    })?;

    let uri = upstream_uri(&destination, route, &parts.uri)?;

    let mut headers = parts.headers.clone();
    if !route.disable_x_forward {
        inject_forwarded_headers(&mut headers, ctx.peer_addr, &ctx.host);
        let authority = authority_of(&destination);
        if let Ok(v) = HeaderValue::from_str(&authority) {
            headers.insert(HOST, v);
        }
    }
    remove_hop_headers(&mut headers);

    let mut builder = Request::builder()
        .method(parts.method.clone())
        .uri(uri.clone())
        .version(http::Version::HTTP_11);
    if let Some(h) = builder.headers_mut() {
        *h = headers;
    }
    let outbound = builder
        .body(body.boxed())
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    ctx.upstream_start = Some(Instant::now());
    let sent = state.policy.bounded(state.proxy_client.request(outbound)).await;

    let upstream_resp = match sent {
        Some(Ok(resp)) => resp,
        Some(Err(e)) => return Err(upstream_failure(route, &uri, &e.to_string())),
        None => return Err(upstream_failure(route, &uri, "outbound deadline exceeded")),
    };

    Ok(build_downstream_response(upstream_resp))
}

fn upstream_failure(route: &CompiledRoute, uri: &Uri, reason: &str) -> GatewayError {
    tracing::error!(
        "proxy: backend request failed, route={}, upstream={}, error={}",
        route.name,
        uri,
        reason
    );
    metrics::counter!(
        "gateway_upstream_errors_total",
        "route" => route.name.clone(),
    )
    .increment(1);
    GatewayError::Backend(reason.to_string())
}

/// Destination base joined with the (rewritten) request path. Query strings
/// of both sides are kept, destination first.
fn upstream_uri(
    destination: &url::Url,
    route: &CompiledRoute,
    request_uri: &Uri,
) -> Result<Uri, GatewayError> {
    let rewritten = rewrite(request_uri.path(), &route.path, &route.rewrite);
    let path = single_joining_slash(destination.path(), &rewritten);

    let mut out = String::with_capacity(route.destination.len() + path.len() + 16);
    out.push_str(destination.scheme());
    out.push_str("://");
    out.push_str(&authority_of(destination));
    out.push_str(&path);

    match (destination.query(), request_uri.query()) {
        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => {
            out.push('?');
            out.push_str(a);
            out.push('&');
            out.push_str(b);
        }
        (Some(q), _) | (_, Some(q)) if !q.is_empty() => {
            out.push('?');
            out.push_str(q);
        }
        _ => {}
    }

    out.parse::<Uri>()
        .map_err(|_| GatewayError::InvalidDestination(route.destination.clone()))
}

fn authority_of(url: &url::Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn phase_log(ctx: &RequestContext, resp: &Response<BoxBody>) {
    let status = resp.status().as_u16();
    ctx.finalize_metrics(status);

    let upstream_ms = ctx
        .upstream_start
        .map(|t| t.elapsed().as_millis())
        .unwrap_or(0);

    tracing::info!(
        client_ip = %ctx.client_ip(),
        method = %ctx.method,
        host = %ctx.host,
        path = %ctx.uri_path,
        status = status,
        route = %ctx.route_name,
        latency_ms = %ctx.start.elapsed().as_millis(),
        upstream_ms = %upstream_ms,
        "access"
    );
}

fn build_downstream_response(upstream_resp: Response<Incoming>) -> Response<BoxBody> {
    let (mut parts, body) = upstream_resp.into_parts();
    remove_hop_headers(&mut parts.headers);
    Response::from_parts(parts, body.boxed())
}

fn remove_hop_headers(headers: &mut http::HeaderMap) {
    let hop_headers = [
        CONNECTION,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-authenticate"),
        HeaderName::from_static("proxy-authorization"),
        HeaderName::from_static("te"),
        HeaderName::from_static("trailers"),
        TRANSFER_ENCODING,
        HeaderName::from_static("upgrade"),
    ];

    for h in &hop_headers {
        headers.remove(h);
    }
}

/// `X-Forwarded-For` gains the peer IP, `X-Real-IP` is the peer IP,
/// `X-Forwarded-Host` is the inbound Host and `X-Forwarded-Proto` defaults
/// to `http` when no front proxy set it.
fn inject_forwarded_headers(
    headers: &mut http::HeaderMap,
    peer_addr: SocketAddr,
    original_host: &str,
) {
    static XFF: HeaderName = HeaderName::from_static("x-forwarded-for");
    static XFP: HeaderName = HeaderName::from_static("x-forwarded-proto");
    static XFH: HeaderName = HeaderName::from_static("x-forwarded-host");
    static XRI: HeaderName = HeaderName::from_static("x-real-ip");

    let peer_ip = peer_addr.ip().to_string();

    let forwarded_for = match headers.get(&XFF).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {peer_ip}"),
        None => peer_ip.clone(),
    };
    if let Ok(v) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(XFF.clone(), v);
    }

    if !headers.contains_key(&XFP) {
        headers.insert(XFP.clone(), HeaderValue::from_static("http"));
    }

    if !original_host.is_empty() {
        if let Ok(v) = HeaderValue::from_str(original_host) {
            headers.insert(XFH.clone(), v);
        }
    }

    if let Ok(v) = HeaderValue::from_str(&peer_ip) {
        headers.insert(XRI.clone(), v);
    }
}
