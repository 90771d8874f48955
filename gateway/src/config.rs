use crate::routes::{PatternError, RoutePattern};
use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Empty backend name")]
    EmptyBackendName,

    #[error("Duplicate backend name: {0}")]
    DuplicateBackend(String),

    #[error("Route references unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Route requires backend \"{0}\" which is not configured")]
    MissingBackend(&'static str),

    #[error("Invalid path pattern {0:?}: {1}")]
    InvalidPattern(String, PatternError),

    #[error("Rate limit capacity must be greater than 0")]
    InvalidRateLimitCapacity,

    #[error("Rate limit refill must be greater than 0 tokens over a non-zero period")]
    InvalidRateLimitRefill,
}

/// HTTP methods supported for route matching
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn matches(&self, method: &hyper::Method) -> bool {
        match self {
            HttpMethod::Get => *method == hyper::Method::GET,
            HttpMethod::Post => *method == hyper::Method::POST,
            HttpMethod::Put => *method == hyper::Method::PUT,
            HttpMethod::Delete => *method == hyper::Method::DELETE,
        }
    }
}

/// Gateway configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for incoming requests
    pub listener: Listener,
    /// Admin listener for health endpoints
    pub admin_listener: Listener,
    /// Backend services requests are forwarded to
    pub backends: Vec<BackendConfig>,
    /// Request routing rules, evaluated top-down; declaration order is priority
    pub routes: Vec<RouteConfig>,
    /// Circuit breaker settings shared by all named operations
    #[serde(default)]
    pub breakers: BreakerSettings,
}

impl Config {
    /// Validates the gateway configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        let mut backend_names = HashSet::new();
        for backend in &self.backends {
            if backend.name.is_empty() {
                return Err(ValidationError::EmptyBackendName);
            }

            if !backend_names.insert(backend.name.as_str()) {
                return Err(ValidationError::DuplicateBackend(backend.name.clone()));
            }
        }

        for route in &self.routes {
            route.validate(&backend_names)?;
        }

        Ok(())
    }

    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.name == name)
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Backend service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Unique identifier for this backend, referenced from routes
    pub name: String,
    /// Base URL of the backend service
    ///
    /// Note: Uses the `url::Url` type so invalid URLs are rejected
    /// during config deserialization.
    pub url: Url,
}

/// Routing rule configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RouteConfig {
    /// Conditions for matching incoming requests
    pub r#match: Match,
    /// Action to take when the match conditions are met
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub action: Action,
    /// Filters applied in declared order before the action runs
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub filters: Vec<FilterConfig>,
}

impl RouteConfig {
    fn validate(&self, backend_names: &HashSet<&str>) -> Result<(), ValidationError> {
        RoutePattern::parse(&self.r#match.path)
            .map_err(|e| ValidationError::InvalidPattern(self.r#match.path.clone(), e))?;

        match &self.action {
            Action::Proxy { backend } => {
                if !backend_names.contains(backend.as_str()) {
                    return Err(ValidationError::UnknownBackend(backend.clone()));
                }
            }
            Action::Aggregate { op } => {
                // Aggregation resolves the principal against the identity
                // service and joins across the favorites/content stores.
                for required in op.required_backends().iter().copied() {
                    if !backend_names.contains(required) {
                        return Err(ValidationError::MissingBackend(required));
                    }
                }
            }
        }

        for filter in &self.filters {
            match filter {
                FilterConfig::RateLimit(rule) => rule.validate()?,
                FilterConfig::RequireAuth => {
                    if !backend_names.contains(AUTH_BACKEND) {
                        return Err(ValidationError::MissingBackend(AUTH_BACKEND));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Request matching criteria
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Match {
    /// HTTP methods to match; an empty list matches any method
    #[serde(default)]
    pub methods: Vec<HttpMethod>,
    /// Path pattern with at most one `*` segment and an optional trailing `**`
    pub path: String,
}

/// Well-known backend names the aggregation endpoints depend on.
pub const AUTH_BACKEND: &str = "auth";
pub const POSTS_BACKEND: &str = "posts";
pub const FAVORITES_BACKEND: &str = "favorites";

/// Action to perform when a route matches
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Forward the request verbatim to the named backend
    Proxy { backend: String },
    /// Handle the request with an in-gateway aggregation pipeline
    Aggregate { op: AggregateOp },
}

/// Aggregation pipelines built into the gateway
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    /// Whether the current principal favorited the post in the path
    FavoritedStatus,
    /// All posts favorited by the current principal, joined with metadata
    UserFavorites,
}

impl AggregateOp {
    fn required_backends(&self) -> &'static [&'static str] {
        match self {
            AggregateOp::FavoritedStatus => &[AUTH_BACKEND, FAVORITES_BACKEND],
            AggregateOp::UserFavorites => &[AUTH_BACKEND, FAVORITES_BACKEND, POSTS_BACKEND],
        }
    }
}

/// Per-route filter configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FilterConfig {
    /// Token-bucket rate limit, one bucket per route
    RateLimit(RateLimitRule),
    /// Reject anonymous callers with 401
    RequireAuth,
}

/// Token bucket parameters
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct RateLimitRule {
    /// Maximum burst size in tokens
    pub capacity: u32,
    /// Tokens added per refill period
    pub refill_tokens: u32,
    /// Refill period in milliseconds; zero is invalid configuration
    pub refill_period_ms: u64,
}

impl RateLimitRule {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.capacity == 0 {
            return Err(ValidationError::InvalidRateLimitCapacity);
        }
        if self.refill_tokens == 0 || self.refill_period_ms == 0 {
            return Err(ValidationError::InvalidRateLimitRefill);
        }
        Ok(())
    }

    /// Refill rate in tokens per millisecond
    pub fn refill_rate_per_ms(&self) -> f64 {
        self.refill_tokens as f64 / self.refill_period_ms as f64
    }
}

/// Circuit breaker settings, applied to every named operation
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct BreakerSettings {
    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long the breaker stays open before a half-open probe
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Upper bound on a primary call before the fallback is substituted
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    10_000
}

fn default_call_timeout_ms() -> u64 {
    1_000
}

impl Default for BreakerSettings {
    fn default() -> Self {
        BreakerSettings {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}
