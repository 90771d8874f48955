use crate::breaker::CircuitBreakers;
use crate::client::{BackendClient, endpoint};
use crate::errors::GatewayError;
use crate::principal::Principal;
use http::HeaderValue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use url::Url;

pub const POSTS_FAVORITED_OP: &str = "posts-favorited";
pub const USER_FAVORITES_OP: &str = "user-favorites-aggregate";

/// Upper bound on concurrent content-store lookups for one request, so
/// a user with a very large favorite set cannot overload the backend.
const MAX_CONCURRENT_LOOKUPS: usize = 50;

/// Post metadata as served by the content service.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub created_at: String,
}

/// One entry of the joined favorited-posts listing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FavoritedPost {
    pub slug: String,
    pub title: String,
    pub created_at: String,
}

impl FavoritedPost {
    /// Synthetic entry returned when the aggregate could not be loaded.
    fn loading_failed() -> Self {
        FavoritedPost {
            slug: "not_loaded".to_string(),
            title: "Loading failed".to_string(),
            created_at: String::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FavoritedStatus {
    pub favorited: bool,
}

/// Fan-out/join pipelines over the favorites and content stores.
///
/// Both endpoints degrade instead of failing: every downstream error or
/// timeout is absorbed by a circuit breaker and replaced with a
/// fallback value, so callers always receive a valid response even in
/// full backend outage. That behavior is deliberate.
pub struct Aggregator {
    client: BackendClient,
    breakers: Arc<CircuitBreakers>,
    favorites_url: Url,
    posts_url: Url,
}

impl Aggregator {
    pub fn new(
        client: BackendClient,
        breakers: Arc<CircuitBreakers>,
        favorites_url: Url,
        posts_url: Url,
    ) -> Self {
        Aggregator {
            client,
            breakers,
            favorites_url,
            posts_url,
        }
    }

    /// Whether the current principal favorited the given post.
    ///
    /// Single downstream dependency wrapped directly in the
    /// "posts-favorited" breaker; fallback is `favorited: false`.
    pub async fn favorited_status(
        &self,
        slug: &str,
        principal: &Principal,
        token: Option<&HeaderValue>,
    ) -> FavoritedStatus {
        let fallback = FavoritedStatus { favorited: false };

        // An anonymous caller can never be a member of the set
        let Some(name) = principal.name() else {
            return fallback;
        };

        self.breakers
            .execute(
                POSTS_FAVORITED_OP,
                async {
                    let url = endpoint(&self.favorites_url, &["posts", slug, "favorites"])?;
                    let users: Vec<String> = self.client.get_json(url, token).await?;
                    Ok(FavoritedStatus {
                        favorited: users.iter().any(|u| u.as_str() == name),
                    })
                },
                fallback,
            )
            .await
    }

    /// All posts favorited by the current principal, joined with their
    /// content-store metadata.
    ///
    /// The whole two-stage pipeline runs under the
    /// "user-favorites-aggregate" breaker: a partial join is never
    /// exposed. Any leaf failure, or the overall timeout, yields the
    /// single synthetic "Loading failed" entry instead. Ordering of the
    /// returned list is unspecified.
    pub async fn user_favorites(
        &self,
        principal: &Principal,
        token: Option<&HeaderValue>,
    ) -> Vec<FavoritedPost> {
        let fallback = vec![FavoritedPost::loading_failed()];

        let Some(name) = principal.name() else {
            return fallback;
        };

        self.breakers
            .execute(
                USER_FAVORITES_OP,
                self.join_favorites(name, token),
                fallback,
            )
            .await
    }

    async fn join_favorites(
        &self,
        name: &str,
        token: Option<&HeaderValue>,
    ) -> Result<Vec<FavoritedPost>, GatewayError> {
        let url = endpoint(&self.favorites_url, &["users", name, "favorites"])?;
        let slugs: Vec<String> = self.client.get_json(url, token).await?;

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_LOOKUPS));
        let mut join_set = JoinSet::new();

        for slug in slugs {
            let client = self.client.clone();
            let url = endpoint(&self.posts_url, &["posts", &slug])?;
            let token = token.cloned();
            let semaphore = semaphore.clone();

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| GatewayError::InternalError(e.to_string()))?;
                let post: Post = client.get_json(url, token.as_ref()).await?;
                Ok::<_, GatewayError>(FavoritedPost {
                    slug,
                    title: post.title,
                    created_at: post.created_at,
                })
            });
        }

        let mut posts = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let post =
                joined.map_err(|e| GatewayError::InternalError(format!("Task panicked: {e}")))??;
            posts.push(post);
        }

        // Dropping the JoinSet on an early error above aborts the
        // remaining lookups on a best-effort basis.
        Ok(posts)
    }
}
