use crate::config::{GatewayConfig, RouteConfig};
use crate::routing::path::single_joining_slash;
use futures_util::future::join_all;
use serde::Serialize;

const SUPPRESSED_ERROR: &str = "Route healthcheck errors disabled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// The route has no health check path.
    Undefined,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Undefined => "undefined",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteHealth {
    pub name: String,
    pub status: HealthStatus,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Always `"healthy"`; per-route results carry the real state.
    pub status: &'static str,
    pub routes: Vec<RouteHealth>,
}

#[derive(Debug, Clone)]
struct ProbeTarget {
    name: String,
    url: Option<String>,
}

/// Active health checker over every configured route, driven by requests to
/// the health endpoint. Results are advisory: nothing on the data path
/// consults them.
pub struct HealthProbe {
    targets: Vec<ProbeTarget>,
    show_errors: bool,
    client: reqwest::Client,
}

impl HealthProbe {
    pub fn new(cfg: &GatewayConfig, client: reqwest::Client) -> Self {
        Self {
            targets: cfg.routes.iter().map(probe_target).collect(),
            show_errors: !cfg.disable_route_health_check_error,
            client,
        }
    }

    /// Probes run concurrently but are reported in route order.
    pub async fn check_all(&self) -> HealthReport {
        let routes = join_all(self.targets.iter().map(|target| self.check_one(target))).await;

        HealthReport {
            status: "healthy",
            routes,
        }
    }

    async fn check_one(&self, target: &ProbeTarget) -> RouteHealth {
        let Some(url) = &target.url else {
            return RouteHealth {
                name: target.name.clone(),
                status: HealthStatus::Undefined,
                error: String::new(),
            };
        };

        let (status, error) = match probe(&self.client, url).await {
            Ok(()) => {
                tracing::info!("health: route is healthy, route={}, url={}", target.name, url);
                (HealthStatus::Healthy, String::new())
            }
            Err(e) => {
                tracing::error!(
                    "health: route is unhealthy, route={}, url={}, error={}",
                    target.name,
                    url,
                    e
                );
                let shown = if self.show_errors {
                    e
                } else {
                    SUPPRESSED_ERROR.to_string()
                };
                (HealthStatus::Unhealthy, shown)
            }
        };

        metrics::counter!(
            "gateway_health_checks_total",
            "route" => target.name.clone(),
            "status" => status.as_str(),
        )
        .increment(1);

        RouteHealth {
            name: target.name.clone(),
            status,
            error,
        }
    }
}

fn probe_target(route: &RouteConfig) -> ProbeTarget {
    let url = (!route.health_check.is_empty())
        .then(|| single_joining_slash(&route.destination, &route.health_check));
    ProbeTarget {
        name: route.name.clone(),
        url,
    }
}

async fn probe(client: &reqwest::Client, url: &str) -> Result<(), String> {
    let parsed =
        url::Url::parse(url).map_err(|e| format!("error parsing HealthCheck URL: {e}"))?;
    let resp = client
        .get(parsed)
        .send()
        .await
        .map_err(|e| format!("error performing HealthCheck request: {e}"))?;

    let code = resp.status().as_u16();
    if code >= 400 {
        return Err(format!("health check failed with status code {code}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(name: &str, destination: &str, health_check: &str) -> RouteConfig {
        RouteConfig {
            name: name.to_string(),
            path: format!("/{name}"),
            destination: destination.to_string(),
            health_check: health_check.to_string(),
            ..Default::default()
        }
    }

    fn probe_for(routes: Vec<RouteConfig>, suppress: bool) -> HealthProbe {
        let cfg = GatewayConfig {
            routes,
            disable_route_health_check_error: suppress,
            ..Default::default()
        };
        HealthProbe::new(&cfg, reqwest::Client::new())
    }

    #[test]
    fn probe_url_joins_destination_and_path() {
        let t = probe_target(&route("a", "http://backend:9000/", "/status"));
        assert_eq!(t.url.as_deref(), Some("http://backend:9000/status"));

        let t = probe_target(&route("b", "http://backend:9000", ""));
        assert!(t.url.is_none());
    }

    #[test]
    fn probe_url_inserts_missing_slash() {
        let t = probe_target(&route("a", "http://backend:9000/", "health"));
        assert_eq!(t.url.as_deref(), Some("http://backend:9000/health"));

        let t = probe_target(&route("b", "http://backend:9000", "health"));
        assert_eq!(t.url.as_deref(), Some("http://backend:9000/health"));

        let t = probe_target(&route("c", "http://backend:9000/api", "/status"));
        assert_eq!(t.url.as_deref(), Some("http://backend:9000/api/status"));
    }

    #[tokio::test]
    async fn route_without_health_check_is_undefined() {
        let report = probe_for(vec![route("hello-ish", "http://localhost:9000", "")], false)
            .check_all()
            .await;

        assert_eq!(report.status, "healthy");
        assert_eq!(report.routes.len(), 1);
        assert_eq!(report.routes[0].name, "hello-ish");
        assert_eq!(report.routes[0].status, HealthStatus::Undefined);
        assert!(report.routes[0].error.is_empty());
    }

    #[tokio::test]
    async fn unreachable_backend_is_unhealthy_but_aggregate_stays_healthy() {
        let report = probe_for(vec![route("down", "http://127.0.0.1:1", "/health")], false)
            .check_all()
            .await;

        assert_eq!(report.status, "healthy");
        assert_eq!(report.routes[0].status, HealthStatus::Unhealthy);
        assert!(report.routes[0]
            .error
            .starts_with("error performing HealthCheck request"));
    }

    #[tokio::test]
    async fn suppressed_errors_hide_detail() {
        let report = probe_for(vec![route("down", "http://127.0.0.1:1", "/health")], true)
            .check_all()
            .await;

        assert_eq!(report.routes[0].status, HealthStatus::Unhealthy);
        assert_eq!(report.routes[0].error, SUPPRESSED_ERROR);
    }

    #[tokio::test]
    async fn report_preserves_route_order() {
        let report = probe_for(
            vec![
                route("one", "http://127.0.0.1:1", "/h"),
                route("two", "http://localhost:9000", ""),
                route("three", "http://127.0.0.1:1", "/h"),
            ],
            false,
        )
        .check_all()
        .await;

        let names: Vec<_> = report.routes.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn check_all_runs_on_a_spawned_task() {
        let probe = std::sync::Arc::new(probe_for(
            vec![
                route("down", "http://127.0.0.1:1", "/h"),
                route("none", "http://localhost:9000", ""),
            ],
            false,
        ));

        let report = tokio::spawn({
            let probe = probe.clone();
            async move { probe.check_all().await }
        })
        .await
        .unwrap();

        assert_eq!(report.routes.len(), 2);
        assert_eq!(report.routes[0].status, HealthStatus::Unhealthy);
        assert_eq!(report.routes[1].status, HealthStatus::Undefined);
    }

    #[test]
    fn report_serializes_lowercase_status() {
        let report = HealthReport {
            status: "healthy",
            routes: vec![RouteHealth {
                name: "r".to_string(),
                status: HealthStatus::Undefined,
                error: String::new(),
            }],
        };
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["routes"][0]["status"], "undefined");
        assert_eq!(v["status"], "healthy");
    }
}
