use crate::errors::{GatewayError, Result};
use crate::metrics_defs::BACKEND_ERRORS;
use crate::principal::AUTH_TOKEN_HEADER;
use http::HeaderValue;
use serde::de::DeserializeOwned;
use shared::counter;
use url::Url;

/// Typed HTTP client for backend JSON endpoints.
///
/// Every outbound call copies the inbound auth-token header (when
/// present) onto the request; downstream services authenticate the end
/// user from that same header, the gateway never re-mints credentials.
/// No other inbound headers are forwarded.
#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new() -> Self {
        BackendClient {
            client: reqwest::Client::new(),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        token: Option<&HeaderValue>,
    ) -> Result<T> {
        let backend = url.host_str().unwrap_or("backend").to_string();

        let mut request = self.client.get(url);
        if let Some(token) = token {
            request = request.header(AUTH_TOKEN_HEADER, token);
        }

        let response = request.send().await.map_err(|e| {
            counter!(BACKEND_ERRORS).increment(1);
            GatewayError::BackendRequestFailed(backend.clone(), e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            counter!(BACKEND_ERRORS).increment(1);
            return Err(GatewayError::BackendStatus(status.as_u16(), backend));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::ResponseDeserializationError(e.to_string()))
    }
}

impl Default for BackendClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Joins extra path segments onto a backend base URL, percent-encoding
/// each segment.
pub fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| GatewayError::InternalError(format!("backend URL cannot be a base: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{captured_header, json_backend};
    use serde::Deserialize;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Names(Vec<String>);

    #[test]
    fn test_endpoint_encodes_segments() {
        let base: Url = "http://favorites:8083".parse().unwrap();
        let url = endpoint(&base, &["posts", "hello world", "favorites"]).unwrap();
        assert_eq!(url.as_str(), "http://favorites:8083/posts/hello%20world/favorites");
    }

    #[tokio::test]
    async fn test_auth_token_propagated_when_present() {
        let (addr, seen) = captured_header(json_backend(&["user"])).await;
        let url: Url = format!("http://{addr}/posts/a/favorites").parse().unwrap();

        let client = BackendClient::new();
        let token = HeaderValue::from_static("t1");
        let names: Names = client.get_json(url, Some(&token)).await.unwrap();

        assert_eq!(names, Names(vec!["user".into()]));
        assert_eq!(seen.lock().unwrap().as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_no_auth_token_when_absent() {
        let (addr, seen) = captured_header(json_backend(&["user"])).await;
        let url: Url = format!("http://{addr}/posts/a/favorites").parse().unwrap();

        let client = BackendClient::new();
        let _: Names = client.get_json(url, None).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), None);
    }

    #[tokio::test]
    async fn test_non_2xx_is_an_error() {
        let (addr, _seen) = captured_header(crate::testutils::status_backend(404)).await;
        let url: Url = format!("http://{addr}/posts/a/favorites").parse().unwrap();

        let client = BackendClient::new();
        let result = client.get_json::<Names>(url, None).await;

        assert!(matches!(result, Err(GatewayError::BackendStatus(404, _))));
    }
}
