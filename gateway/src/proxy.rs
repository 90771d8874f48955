use crate::errors::{GatewayError, Result};
use crate::metrics_defs::BACKEND_ERRORS;
use crate::principal::AUTH_TOKEN_HEADER;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use shared::counter;
use shared::http::filter_hop_by_hop;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

/// Plain proxy routes relay the backend response as-is; this bound only
/// protects the gateway from a backend that never answers at all.
const PROXY_TIMEOUT_SECS: u64 = 30;

pub type ProxyClient = Client<HttpConnector, Full<Bytes>>;

pub fn new_client() -> ProxyClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

/// Forwards a request verbatim to a backend: method, inbound path and
/// query joined onto the backend base URL, and body. Of the inbound
/// headers only content-type and the auth token are copied; the
/// backend response is relayed unchanged apart from hop-by-hop
/// headers.
pub async fn forward(
    client: &ProxyClient,
    backend_url: &Url,
    request: Request<Bytes>,
) -> Result<Response<Bytes>> {
    let backend = backend_url.host_str().unwrap_or(backend_url.as_str());

    let path_and_query = match request.uri().path_and_query() {
        Some(pq) => pq.as_str(),
        None => {
            return Err(GatewayError::InternalError(
                "Request URI missing path and query".to_string(),
            ));
        }
    };

    let mut url = backend_url.clone();
    if let Some((path, query)) = path_and_query.split_once('?') {
        url.set_path(path);
        url.set_query(Some(query));
    } else {
        url.set_path(path_and_query);
    }

    let (parts, body) = request.into_parts();
    let mut builder = Request::builder().method(parts.method).uri(url.to_string());
    if let Some(content_type) = parts.headers.get(CONTENT_TYPE) {
        builder = builder.header(CONTENT_TYPE, content_type);
    }
    if let Some(token) = parts.headers.get(AUTH_TOKEN_HEADER) {
        builder = builder.header(AUTH_TOKEN_HEADER, token);
    }

    let outbound = builder
        .body(Full::new(body))
        .map_err(|e| GatewayError::InternalError(format!("Failed to build request: {e}")))?;

    let response = timeout(
        Duration::from_secs(PROXY_TIMEOUT_SECS),
        client.request(outbound),
    )
    .await
    .map_err(|_| {
        counter!(BACKEND_ERRORS).increment(1);
        GatewayError::BackendTimeout(backend.to_string())
    })?
    .map_err(|e| {
        counter!(BACKEND_ERRORS).increment(1);
        GatewayError::BackendRequestFailed(backend.to_string(), e.to_string())
    })?;

    let (mut parts, body) = response.into_parts();
    filter_hop_by_hop(&mut parts.headers, parts.version);

    let body_bytes = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| GatewayError::ResponseBodyError(e.to_string()))?;

    Ok(Response::from_parts(parts, body_bytes))
}
