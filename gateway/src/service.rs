use crate::aggregate::Aggregator;
use crate::breaker::CircuitBreakers;
use crate::client::BackendClient;
use crate::config::{
    AUTH_BACKEND, Action, AggregateOp, Config, FAVORITES_BACKEND, FilterConfig, POSTS_BACKEND,
};
use crate::errors::GatewayError;
use crate::limiter::RateLimiter;
use crate::metrics_defs::{REQUEST_DURATION, ROUTE_NOT_MATCHED};
use crate::principal::{AUTH_TOKEN_HEADER, Principal, resolve};
use crate::proxy::{self, ProxyClient};
use crate::routes::RouteTable;
use bytes::Bytes;
use http::HeaderValue;
use http::header::CONTENT_TYPE;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use shared::http::make_error_response;
use shared::{counter, histogram};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use url::Url;

type GatewayResponse = Response<BoxBody<Bytes, GatewayError>>;

/// The gateway entry point: resolves the principal from the session
/// token header, matches the route table, runs filters, and dispatches
/// to plain proxying or an aggregation pipeline.
#[derive(Clone)]
pub struct GatewayService {
    inner: Arc<Inner>,
}

struct Inner {
    table: RouteTable,
    limiter: RateLimiter,
    client: BackendClient,
    proxy_client: ProxyClient,
    backends: HashMap<String, Url>,
    auth_url: Option<Url>,
    aggregator: Option<Aggregator>,
}

impl GatewayService {
    /// Builds the service from a validated configuration.
    pub fn new(config: &Config) -> Result<Self, GatewayError> {
        let table = RouteTable::new(config.routes.clone())
            .map_err(|e| GatewayError::InternalError(format!("invalid route pattern: {e}")))?;

        let backends: HashMap<String, Url> = config
            .backends
            .iter()
            .map(|b| (b.name.clone(), b.url.clone()))
            .collect();

        let client = BackendClient::new();
        let breakers = Arc::new(CircuitBreakers::new(config.breakers));

        // The aggregation pipelines exist only when both stores they
        // join across are configured; config validation enforces this
        // for any route that needs them.
        let aggregator = match (
            backends.get(FAVORITES_BACKEND),
            backends.get(POSTS_BACKEND),
        ) {
            (Some(favorites), Some(posts)) => Some(Aggregator::new(
                client.clone(),
                breakers.clone(),
                favorites.clone(),
                posts.clone(),
            )),
            _ => None,
        };

        Ok(GatewayService {
            inner: Arc::new(Inner {
                table,
                limiter: RateLimiter::new(),
                client,
                proxy_client: proxy::new_client(),
                auth_url: backends.get(AUTH_BACKEND).cloned(),
                backends,
                aggregator,
            }),
        })
    }
}

impl Inner {
    async fn resolve_principal(&self, token: Option<&HeaderValue>) -> Principal {
        match &self.auth_url {
            Some(auth_url) => resolve(&self.client, auth_url, token).await,
            None => Principal::Anonymous,
        }
    }

    async fn handle<B>(&self, req: Request<B>) -> Result<GatewayResponse, GatewayError>
    where
        B: hyper::body::Body + Send + 'static,
        B::Data: Send,
        B::Error: std::fmt::Display,
    {
        let start = std::time::Instant::now();

        let (parts, body) = req.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| GatewayError::RequestBodyError(e.to_string()))?
            .to_bytes();

        let token = parts.headers.get(AUTH_TOKEN_HEADER).cloned();
        let path = parts.uri.path().to_string();

        let Some(matched) = self.table.find(&parts.method, &path) else {
            counter!(ROUTE_NOT_MATCHED).increment(1);
            tracing::warn!(method = %parts.method, path = %path, "No route matched");
            return Ok(make_error_response(StatusCode::NOT_FOUND));
        };

        tracing::debug!(method = %parts.method, path = %path, route = %matched.config.r#match.path, "Matched route");

        // Filters run in declared order; the first rejection wins
        let mut principal: Option<Principal> = None;
        for filter in &matched.config.filters {
            match filter {
                FilterConfig::RateLimit(rule) => {
                    if !self.limiter.try_acquire(&matched.config.r#match.path, rule) {
                        return Ok(make_error_response(StatusCode::TOO_MANY_REQUESTS));
                    }
                }
                FilterConfig::RequireAuth => {
                    let resolved = self.resolve_principal(token.as_ref()).await;
                    if resolved.is_anonymous() {
                        return Ok(make_error_response(StatusCode::UNAUTHORIZED));
                    }
                    principal = Some(resolved);
                }
            }
        }

        let response = match &matched.config.action {
            Action::Proxy { backend } => {
                let backend_url = self.backends.get(backend).ok_or_else(|| {
                    GatewayError::InternalError(format!("Unknown backend: {backend}"))
                })?;
                let request = Request::from_parts(parts, body);

                match proxy::forward(&self.proxy_client, backend_url, request).await {
                    Ok(response) => {
                        response.map(|bytes| Full::new(bytes).map_err(|e| match e {}).boxed())
                    }
                    Err(GatewayError::BackendTimeout(backend)) => {
                        tracing::warn!(backend = %backend, "backend timed out");
                        make_error_response(StatusCode::GATEWAY_TIMEOUT)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "backend call failed");
                        make_error_response(StatusCode::BAD_GATEWAY)
                    }
                }
            }
            Action::Aggregate { op } => {
                let aggregator = self.aggregator.as_ref().ok_or_else(|| {
                    GatewayError::InternalError("aggregation backends not configured".to_string())
                })?;
                let principal = match principal {
                    Some(principal) => principal,
                    None => self.resolve_principal(token.as_ref()).await,
                };

                match op {
                    AggregateOp::FavoritedStatus => {
                        let slug = matched.capture.ok_or_else(|| {
                            GatewayError::InternalError(
                                "favorited-status route must capture a slug segment".to_string(),
                            )
                        })?;
                        let status = aggregator
                            .favorited_status(&slug, &principal, token.as_ref())
                            .await;
                        json_ok(&status)?
                    }
                    AggregateOp::UserFavorites => {
                        let posts = aggregator.user_favorites(&principal, token.as_ref()).await;
                        json_ok(&posts)?
                    }
                }
            }
        };

        histogram!(REQUEST_DURATION).record(start.elapsed().as_secs_f64());
        Ok(response)
    }
}

fn json_ok<T: Serialize>(value: &T) -> Result<GatewayResponse, GatewayError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| GatewayError::InternalError(format!("Failed to serialize response: {e}")))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(bytes)).map_err(|e| match e {}).boxed())
        .map_err(|e| GatewayError::InternalError(format!("Failed to build response: {e}")))
}

impl Service<Request<Incoming>> for GatewayService {
    type Response = GatewayResponse;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move {
            match inner.handle(req).await {
                Ok(response) => Ok(response),
                Err(e) => {
                    tracing::error!(error = %e, "request handling failed");
                    Ok(make_error_response(StatusCode::INTERNAL_SERVER_ERROR))
                }
            }
        })
    }
}
