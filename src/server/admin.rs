use super::GatewayState;
use crate::metrics::Metrics;
use crate::proxy::context::{full_body, json_response, BoxBody};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use hyper::body::Incoming;
use hyper::{Request, Response};

pub fn handle_admin(
    req: Request<Incoming>,
    state: &GatewayState,
    metrics: Option<&Metrics>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let resp = match req.uri().path() {
        "/healthz" => json_response(StatusCode::OK, &serde_json::json!({"status": "ok"})),

        "/metrics" => match metrics {
            Some(m) => {
                let mut resp = Response::new(full_body(m.render()));
                resp.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
                );
                resp
            }
            None => not_found(),
        },

        "/routes" => json_response(StatusCode::OK, &routes_json(state)),

        _ => not_found(),
    };
    Ok(resp)
}

fn not_found() -> Response<BoxBody> {
    json_response(StatusCode::NOT_FOUND, &serde_json::json!({"error": "not found"}))
}

fn routes_json(state: &GatewayState) -> serde_json::Value {
    let branches: Vec<serde_json::Value> = state
        .dispatch
        .branches()
        .iter()
        .map(|b| {
            serde_json::json!({
                "prefix": b.prefix,
                "route": b.route.name,
                "destination": b.route.destination,
                "secured": b.secured,
                "filters": b.filters.iter().map(|f| f.describe()).collect::<Vec<_>>(),
            })
        })
        .collect();

    serde_json::json!({
        "root_filters": state
            .dispatch
            .root_filters()
            .iter()
            .map(|f| f.describe())
            .collect::<Vec<_>>(),
        "branches": branches,
    })
}
