use crate::client::{BackendClient, endpoint};
use http::HeaderValue;
use serde::Deserialize;
use url::Url;

/// Header carrying the opaque session token. Downstream services
/// authenticate the end user from this same header.
pub const AUTH_TOKEN_HEADER: &str = "X-AUTH-TOKEN";

/// The identity associated with an inbound request.
///
/// Carried explicitly through the request-handling call chain; there is
/// no ambient security context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    User { name: String },
}

impl Principal {
    pub fn name(&self) -> Option<&str> {
        match self {
            Principal::Anonymous => None,
            Principal::User { name } => Some(name),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }
}

#[derive(Deserialize)]
struct UserInfo {
    username: String,
    #[serde(default)]
    #[allow(dead_code)]
    roles: Vec<String>,
}

/// Resolves the principal for a session token against the identity
/// service. An absent token, a malformed one, or a failed lookup all
/// yield the anonymous principal rather than an error.
pub async fn resolve(
    client: &BackendClient,
    auth_url: &Url,
    token: Option<&HeaderValue>,
) -> Principal {
    let Some(token) = token else {
        return Principal::Anonymous;
    };

    let url = match endpoint(auth_url, &["user"]) {
        Ok(url) => url,
        Err(e) => {
            tracing::error!(error = %e, "invalid identity service URL");
            return Principal::Anonymous;
        }
    };

    match client.get_json::<UserInfo>(url, Some(token)).await {
        Ok(user) => Principal::User {
            name: user.username,
        },
        Err(e) => {
            tracing::debug!(error = %e, "principal lookup failed, treating as anonymous");
            Principal::Anonymous
        }
    }
}
