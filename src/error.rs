use http::StatusCode;
use std::fmt;

/// Failures the request pipeline can surface to a client.
///
/// `Display` carries the detail for logs; [`GatewayError::client_message`]
/// is what ends up in the JSON body.
#[derive(Debug)]
pub enum GatewayError {
    /// A route references a middleware name that is not defined.
    MiddlewareNotFound(String),
    /// A middleware definition whose rule does not fit its type.
    InvalidMiddleware { name: String, reason: String },
    /// Request path hit a route blocklist entry.
    Forbidden(String),
    /// A header required by a forward-auth gate is absent.
    MissingHeader(String),
    Unauthorized,
    /// The auth delegate failed or answered with a non-2xx status.
    UpstreamAuth(String),
    RateLimited,
    /// Backend unreachable or the proxied exchange failed.
    Backend(String),
    /// Destination or auth URL does not parse.
    InvalidDestination(String),
    NotFound,
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Forbidden(_) | GatewayError::MissingHeader(_) => StatusCode::FORBIDDEN,
            GatewayError::Unauthorized | GatewayError::UpstreamAuth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Backend(_) => StatusCode::BAD_GATEWAY,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::MiddlewareNotFound(_)
            | GatewayError::InvalidMiddleware { .. }
            | GatewayError::InvalidDestination(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn client_message(&self) -> String {
        match self {
            GatewayError::Forbidden(path) => format!("Access to {} is forbidden", path),
            GatewayError::MissingHeader(_) => "Missing Authorization header".to_string(),
            GatewayError::Unauthorized | GatewayError::UpstreamAuth(_) => {
                "Unauthorized".to_string()
            }
            GatewayError::RateLimited => {
                "Too many requests. Please try again later.".to_string()
            }
            GatewayError::Backend(_) => {
                "The service is currently unavailable. Please try again later.".to_string()
            }
            GatewayError::NotFound => "Not found".to_string(),
            GatewayError::MiddlewareNotFound(_)
            | GatewayError::InvalidMiddleware { .. }
            | GatewayError::InvalidDestination(_)
            | GatewayError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::MiddlewareNotFound(name) => write!(f, "middleware not found: {}", name),
            GatewayError::InvalidMiddleware { name, reason } => {
                write!(f, "invalid middleware '{}': {}", name, reason)
            }
            GatewayError::Forbidden(path) => write!(f, "path blocked: {}", path),
            GatewayError::MissingHeader(name) => write!(f, "missing required header: {}", name),
            GatewayError::Unauthorized => write!(f, "unauthorized"),
            GatewayError::UpstreamAuth(msg) => write!(f, "auth delegate error: {}", msg),
            GatewayError::RateLimited => write!(f, "rate limited"),
            GatewayError::Backend(msg) => write!(f, "backend error: {}", msg),
            GatewayError::InvalidDestination(url) => write!(f, "invalid destination: {}", url),
            GatewayError::NotFound => write!(f, "no route matched"),
            GatewayError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}
