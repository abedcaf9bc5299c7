//! End-to-end tests: a mock backend and a mock auth service on ephemeral
//! ports, a gateway in front of them, driven with reqwest.
//!
//! Run with: `cargo test --test gateway_integration`

use bytes::Bytes;
use goma_gateway::config::{
    CorsConfig, GatewayConfig, MiddlewareConfig, RateLimitAlgorithm, RateLimitPolicy, RouteConfig,
    RouteMiddleware,
};
use goma_gateway::server::{self, GatewayState};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;

type Handler = fn(Request<Incoming>) -> Response<Full<Bytes>>;

async fn spawn_mock(handler: Handler) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let svc = service_fn(move |req| async move { Ok::<_, Infallible>(handler(req)) });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });
    addr
}

/// Echoes what it received. `/status/N` answers with status N.
fn echo(req: Request<Incoming>) -> Response<Full<Bytes>> {
    let path = req.uri().path().to_string();
    let status = path
        .strip_prefix("/status/")
        .and_then(|s| s.parse::<u16>().ok())
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::OK);

    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    let body = serde_json::json!({
        "path": path,
        "query": req.uri().query().unwrap_or(""),
        "host": header("host"),
        "x_forwarded_for": header("x-forwarded-for"),
        "x_real_ip": header("x-real-ip"),
        "x_forwarded_host": header("x-forwarded-host"),
        "x_auth_userid": header("x-auth-userid"),
    });

    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .header("x-backend", "echo")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// Admits `Authorization: Bearer good` and answers with a `userId` header.
fn auth_service(req: Request<Incoming>) -> Response<Full<Bytes>> {
    let ok = req
        .headers()
        .get("authorization")
        .map(|v| v == "Bearer good")
        .unwrap_or(false);
    if ok {
        Response::builder()
            .status(StatusCode::OK)
            .header("userId", "42")
            .body(Full::new(Bytes::new()))
            .unwrap()
    } else {
        Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }
}

struct Gateway {
    base: String,
    addr: SocketAddr,
    _shutdown: Arc<Notify>,
}

async fn start_gateway(cfg: GatewayConfig) -> Gateway {
    let state = GatewayState::new(cfg).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(Notify::new());
    tokio::spawn(server::run_proxy_server(listener, state, shutdown.clone()));
    Gateway {
        base: format!("http://{}", addr),
        addr,
        _shutdown: shutdown,
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

fn route(name: &str, path: &str, destination: String) -> RouteConfig {
    RouteConfig {
        name: name.to_string(),
        path: path.to_string(),
        destination,
        ..Default::default()
    }
}

fn basic_middleware() -> MiddlewareConfig {
    MiddlewareConfig {
        name: "basic-auth".to_string(),
        kind: "basic".to_string(),
        rule: serde_json::json!({"username": "goma", "password": "secret"}),
    }
}

fn jwt_middleware(auth_addr: SocketAddr) -> MiddlewareConfig {
    MiddlewareConfig {
        name: "jwt-auth".to_string(),
        kind: "jwt".to_string(),
        rule: serde_json::json!({
            "url": format!("http://{}/verify", auth_addr),
            "required_headers": ["Authorization"],
            "headers": {"userId": "X-Auth-UserId"},
            "params": {"userId": "auth_userId"},
        }),
    }
}

async fn json_body(resp: reqwest::Response) -> serde_json::Value {
    resp.json().await.unwrap()
}

#[tokio::test]
async fn forwards_with_rewrite_and_relays_response() {
    let backend = spawn_mock(echo).await;
    let mut hello = route("hello-ish", "/hello", format!("http://{}", backend));
    hello.rewrite = "/".to_string();
    let gw = start_gateway(GatewayConfig {
        routes: vec![hello],
        ..Default::default()
    })
    .await;

    let resp = client()
        .get(format!("{}/hello/x?page=2", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-backend"], "echo");
    let body = json_body(resp).await;
    assert_eq!(body["path"], "/x");
    assert_eq!(body["query"], "page=2");
    assert_eq!(body["host"], backend.to_string());
    assert_eq!(body["x_forwarded_for"], "127.0.0.1");
    assert_eq!(body["x_real_ip"], "127.0.0.1");
    assert_eq!(body["x_forwarded_host"], gw.addr.to_string());

    let resp = client()
        .get(format!("{}/hello/status/418", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 418);
}

#[tokio::test]
async fn disable_x_forward_keeps_original_host() {
    let backend = spawn_mock(echo).await;
    let mut r = route("raw", "/raw", format!("http://{}", backend));
    r.disable_x_forward = true;
    let gw = start_gateway(GatewayConfig {
        routes: vec![r],
        ..Default::default()
    })
    .await;

    let body = json_body(
        client()
            .get(format!("{}/raw/a", gw.base))
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(body["path"], "/raw/a");
    assert_eq!(body["host"], gw.addr.to_string());
    assert_eq!(body["x_real_ip"], "");
}

#[tokio::test]
async fn health_endpoint_reports_each_route() {
    let backend = spawn_mock(echo).await;
    let mut checked = route("checked", "/checked", format!("http://{}/", backend));
    checked.health_check = "ping".to_string();
    let mut failing = route("failing", "/failing", format!("http://{}", backend));
    failing.health_check = "/status/503".to_string();
    let gw = start_gateway(GatewayConfig {
        routes: vec![
            route("hello-ish", "/hello", "http://localhost:9000".to_string()),
            checked,
            failing,
        ],
        ..Default::default()
    })
    .await;

    let resp = client()
        .get(format!("{}/health", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "application/json");
    let body = json_body(resp).await;
    assert_eq!(body["status"], "healthy");
    let routes = body["routes"].as_array().unwrap();
    assert_eq!(routes[0]["name"], "hello-ish");
    assert_eq!(routes[0]["status"], "undefined");
    assert_eq!(routes[1]["status"], "healthy");
    assert_eq!(routes[2]["status"], "unhealthy");
    assert_eq!(
        routes[2]["error"],
        "health check failed with status code 503"
    );
}

#[tokio::test]
async fn healthz_is_forwarded_to_catch_all_route() {
    let backend = spawn_mock(echo).await;
    let gw = start_gateway(GatewayConfig {
        routes: vec![route("root", "/", format!("http://{}", backend))],
        ..Default::default()
    })
    .await;

    let resp = client()
        .get(format!("{}/healthz", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-backend"], "echo");
    let body = json_body(resp).await;
    assert_eq!(body["path"], "/healthz");
}

#[tokio::test]
async fn blocklisted_path_is_forbidden() {
    let backend = spawn_mock(echo).await;
    let mut r = route("hello", "/hello", format!("http://{}", backend));
    r.blocklist = vec!["/internal/*".to_string()];
    let gw = start_gateway(GatewayConfig {
        routes: vec![r],
        ..Default::default()
    })
    .await;

    let resp = client()
        .get(format!("{}/hello/internal/secrets", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body = json_body(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], 403);
    assert_eq!(
        body["message"],
        "Access to /hello/internal/secrets is forbidden"
    );

    let resp = client()
        .get(format!("{}/hello/public", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn unreachable_backend_is_502() {
    let gw = start_gateway(GatewayConfig {
        routes: vec![route("down", "/down", "http://127.0.0.1:1".to_string())],
        ..Default::default()
    })
    .await;

    let resp = client()
        .get(format!("{}/down/x", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body = json_body(resp).await;
    assert_eq!(
        body["message"],
        "The service is currently unavailable. Please try again later."
    );
}

#[tokio::test]
async fn invalid_destination_is_500() {
    let gw = start_gateway(GatewayConfig {
        routes: vec![route("bad", "/bad", "not a url".to_string())],
        ..Default::default()
    })
    .await;

    let resp = client()
        .get(format!("{}/bad", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    assert_eq!(json_body(resp).await["message"], "Internal server error");
}

#[tokio::test]
async fn unmatched_path_is_404() {
    let gw = start_gateway(GatewayConfig::default()).await;
    let resp = client()
        .get(format!("{}/nowhere", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(json_body(resp).await["message"], "Not found");
}

#[tokio::test]
async fn basic_auth_secures_sub_path_only() {
    let backend = spawn_mock(echo).await;
    let mut r = route("hello", "/hello", format!("http://{}", backend));
    r.middlewares = vec![RouteMiddleware {
        path: "/admin".to_string(),
        rules: vec!["basic-auth".to_string()],
    }];
    let gw = start_gateway(GatewayConfig {
        routes: vec![r],
        middlewares: vec![basic_middleware()],
        ..Default::default()
    })
    .await;

    let resp = client()
        .get(format!("{}/hello/admin/panel", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert!(resp.headers().contains_key("www-authenticate"));

    let resp = client()
        .get(format!("{}/hello/admin/panel", gw.base))
        .basic_auth("goma", Some("wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client()
        .get(format!("{}/hello/admin/panel", gw.base))
        .basic_auth("goma", Some("secret"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client()
        .get(format!("{}/hello/open", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn unresolved_middleware_falls_back_to_default_branch() {
    let backend = spawn_mock(echo).await;
    let mut r = route("hello", "/hello", format!("http://{}", backend));
    r.middlewares = vec![RouteMiddleware {
        path: "/admin".to_string(),
        rules: vec!["missing".to_string()],
    }];
    let gw = start_gateway(GatewayConfig {
        routes: vec![r],
        ..Default::default()
    })
    .await;

    let resp = client()
        .get(format!("{}/hello/admin", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn forward_auth_injects_headers_and_params() {
    let backend = spawn_mock(echo).await;
    let auth = spawn_mock(auth_service).await;
    let mut r = route("api", "/api", format!("http://{}", backend));
    r.middlewares = vec![RouteMiddleware {
        path: "/private".to_string(),
        rules: vec!["jwt-auth".to_string()],
    }];
    let gw = start_gateway(GatewayConfig {
        routes: vec![r],
        middlewares: vec![jwt_middleware(auth)],
        ..Default::default()
    })
    .await;

    let resp = client()
        .get(format!("{}/api/private/data?x=1", gw.base))
        .header("Authorization", "Bearer good")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body = json_body(resp).await;
    assert_eq!(body["path"], "/api/private/data");
    assert_eq!(body["x_auth_userid"], "42");
    assert_eq!(body["query"], "x=1&auth_userId=42");

    let resp = client()
        .get(format!("{}/api/private/data", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    assert_eq!(
        json_body(resp).await["message"],
        "Missing Authorization header"
    );

    let resp = client()
        .get(format!("{}/api/private/data", gw.base))
        .header("Authorization", "Bearer bad")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(json_body(resp).await["message"], "Unauthorized");
}

#[tokio::test]
async fn global_rate_limit_rejects_over_quota() {
    let backend = spawn_mock(echo).await;
    let gw = start_gateway(GatewayConfig {
        rate_limit: 2,
        rate_limit_policy: RateLimitPolicy {
            algorithm: RateLimitAlgorithm::TokenBucket,
            ..Default::default()
        },
        routes: vec![route("r", "/r", format!("http://{}", backend))],
        ..Default::default()
    })
    .await;

    let c = client();
    for _ in 0..2 {
        let resp = c.get(format!("{}/r/x", gw.base)).send().await.unwrap();
        assert_eq!(resp.status(), 200);
    }
    let resp = c.get(format!("{}/r/x", gw.base)).send().await.unwrap();
    assert_eq!(resp.status(), 429);
    assert_eq!(
        json_body(resp).await["message"],
        "Too many requests. Please try again later."
    );
}

#[tokio::test]
async fn cors_headers_and_preflight() {
    let backend = spawn_mock(echo).await;
    let headers: BTreeMap<String, String> = [(
        "Access-Control-Allow-Methods".to_string(),
        "GET, POST".to_string(),
    )]
    .into_iter()
    .collect();
    let gw = start_gateway(GatewayConfig {
        cors: CorsConfig {
            origins: vec!["https://app.example.com".to_string()],
            headers,
        },
        routes: vec![route("r", "/r", format!("http://{}", backend))],
        ..Default::default()
    })
    .await;

    let resp = client()
        .request(reqwest::Method::OPTIONS, format!("{}/r/x", gw.base))
        .header("Origin", "https://app.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    assert_eq!(
        resp.headers()["access-control-allow-origin"],
        "https://app.example.com"
    );
    assert_eq!(resp.headers()["access-control-allow-methods"], "GET, POST");

    let resp = client()
        .get(format!("{}/r/x", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["access-control-allow-methods"], "GET, POST");
    assert_eq!(resp.headers()["x-backend"], "echo");
}
