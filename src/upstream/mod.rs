pub mod client;
pub mod health;

pub use client::{OutboundPolicy, ProxyClient};
pub use health::{HealthProbe, HealthReport, HealthStatus, RouteHealth};
