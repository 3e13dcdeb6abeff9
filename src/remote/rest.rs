/// REST backend (relational or document store behind the same HTTP API)
///
/// Both server dialects are accepted: the wire types in `models` carry the
/// aliases, this adapter only builds requests and maps failures.
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;

use crate::{
    cached,
    error::{AuthError, AuthResult, RemoteError, RemoteResult},
    models::{
        ApiComment, ApiHistoryEntry, ApiId, ApiMovie, ApiPost, ApiUser, Comment, CommentDraft,
        FavoriteEntry, FavoriteStatus, FavoriteToggle, HistoryEntry, MovieRef, Post, PostDraft,
        PostPatch, ProviderSet, Recommendation, RecommendedMovie, User, ValidationError,
    },
    remote::{
        lookup_cache::{LookupCache, LookupKey},
        IdentityBackend, RemoteAdapter,
    },
};

pub const DEFAULT_PROVIDER_CACHE_TTL: u64 = 3600; // 1 hour

#[derive(Debug, Deserialize)]
struct ApiToggleResponse {
    status: FavoriteStatus,
    #[serde(default)]
    favorites: Vec<ApiMovie>,
}

#[derive(Debug, Deserialize)]
struct ApiRecommendResponse {
    #[serde(default)]
    mood: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    movies: Vec<ApiMovie>,
}

#[derive(Clone)]
pub struct RestAdapter {
    http_client: HttpClient,
    base_url: String,
    cache: LookupCache,
    provider_ttl: u64,
}

impl RestAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(HttpClient::new(), base_url)
    }

    pub fn with_client(http_client: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: LookupCache::new(),
            provider_ttl: DEFAULT_PROVIDER_CACHE_TTL,
        }
    }

    pub fn with_provider_ttl(mut self, ttl_secs: u64) -> Self {
        self.provider_ttl = ttl_secs;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends the request and decodes a successful JSON body
    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResult<T> {
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Sends the request, ignoring the body of a successful response
    async fn execute(&self, request: RequestBuilder) -> RemoteResult<()> {
        Self::check(request.send().await?).await?;
        Ok(())
    }

    async fn check(response: Response) -> RemoteResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status, &body))
    }

    async fn fetch_identity<T: DeserializeOwned>(&self, request: RequestBuilder) -> AuthResult<T> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::from_status(status, &body));
        }
        Ok(response.json().await?)
    }

    fn convert_toggle(&self, movie: &MovieRef, response: ApiToggleResponse) -> FavoriteToggle {
        let canonical = match response.status {
            FavoriteStatus::Added => normalize::<_, MovieRef>(response.favorites, "favorite")
                .into_iter()
                .find(|f| f.external_id == movie.external_id)
                .unwrap_or_else(|| movie.clone()),
            FavoriteStatus::Removed => movie.clone(),
        };
        FavoriteToggle {
            status: response.status,
            canonical,
        }
    }

    fn convert_recommendation(&self, mood: &str, response: ApiRecommendResponse) -> Recommendation {
        Recommendation {
            mood: response.mood.unwrap_or_else(|| mood.to_string()),
            explanation: response.explanation.filter(|e| !e.trim().is_empty()),
            movies: normalize::<_, RecommendedMovie>(response.movies, "recommendation"),
        }
    }
}

/// Converts wire items, dropping the ones that cannot be normalized
pub(crate) fn normalize<A, T>(items: Vec<A>, what: &str) -> Vec<T>
where
    T: TryFrom<A, Error = ValidationError>,
{
    items
        .into_iter()
        .filter_map(|item| match T::try_from(item) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(kind = what, error = %e, "Skipping malformed item");
                None
            }
        })
        .collect()
}

pub(crate) fn malformed(err: ValidationError) -> RemoteError {
    RemoteError::Network(format!("Malformed response: {}", err))
}

/// Fills the id some backends leave out of update responses
fn fill_missing_id(id: &mut Option<ApiId>, fallback: &str) {
    id.get_or_insert_with(|| ApiId::Text(fallback.to_string()));
}

#[async_trait::async_trait]
impl RemoteAdapter for RestAdapter {
    #[tracing::instrument(skip(self), fields(adapter = "rest"))]
    async fn get_favorites(&self, user_id: &str) -> RemoteResult<Vec<FavoriteEntry>> {
        let request = self
            .http_client
            .post(self.url("/favorites"))
            .json(&json!({ "email": user_id, "action": "get" }));
        let favorites: Vec<ApiMovie> = self.fetch(request).await?;

        Ok(normalize(favorites, "favorite"))
    }

    #[tracing::instrument(skip(self, movie), fields(adapter = "rest", movie_id = %movie.external_id))]
    async fn toggle_favorite(&self, user_id: &str, movie: &MovieRef) -> RemoteResult<FavoriteToggle> {
        let request = self
            .http_client
            .post(self.url("/favorites"))
            .json(&json!({ "email": user_id, "movie": ApiMovie::from(movie) }));
        let response: ApiToggleResponse = self.fetch(request).await?;
        let toggle = self.convert_toggle(movie, response);

        tracing::info!(
            movie_id = %movie.external_id,
            status = ?toggle.status,
            adapter = "rest",
            "Favorite toggled"
        );

        Ok(toggle)
    }

    #[tracing::instrument(skip(self), fields(adapter = "rest"))]
    async fn get_history(&self, user_id: &str) -> RemoteResult<Vec<HistoryEntry>> {
        let request = self
            .http_client
            .get(self.url("/history"))
            .query(&[("email", user_id)]);
        let entries: Vec<ApiHistoryEntry> = self.fetch(request).await?;

        let mut history: Vec<HistoryEntry> = entries.into_iter().map(HistoryEntry::from).collect();
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(history)
    }

    #[tracing::instrument(skip(self), fields(adapter = "rest"))]
    async fn delete_history(&self, user_id: &str, id: &str) -> RemoteResult<()> {
        let request = self
            .http_client
            .delete(self.url(&format!("/history/{}", id)))
            .query(&[("email", user_id)]);
        self.execute(request).await
    }

    #[tracing::instrument(skip(self), fields(adapter = "rest"))]
    async fn list_posts(&self) -> RemoteResult<Vec<Post>> {
        let posts: Vec<ApiPost> = self.fetch(self.http_client.get(self.url("/posts"))).await?;

        let mut posts: Vec<Post> = normalize(posts, "post");
        posts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(posts)
    }

    #[tracing::instrument(skip(self, author, draft), fields(adapter = "rest", author = %author.id))]
    async fn create_post(&self, author: &User, draft: &PostDraft) -> RemoteResult<Post> {
        let rating = draft.validate()?;
        let request = self.http_client.post(self.url("/posts")).json(&json!({
            "email": author.id,
            "movieTitle": draft.movie_title.trim(),
            "content": draft.content.trim(),
            "rating": i64::from(rating),
            "anonymous": draft.anonymous,
            "profileIcon": draft.display_icon(&author.display_icon),
        }));
        let api: ApiPost = self.fetch(request).await?;
        let post = Post::try_from(api).map_err(malformed)?;

        tracing::info!(post_id = %post.id, adapter = "rest", "Post created");
        Ok(post)
    }

    #[tracing::instrument(skip(self, patch), fields(adapter = "rest"))]
    async fn update_post(&self, user_id: &str, id: &str, patch: &PostPatch) -> RemoteResult<Post> {
        let mut body = serde_json::to_value(patch)
            .map_err(|e| RemoteError::Validation(format!("Unencodable patch: {}", e)))?;
        body["email"] = json!(user_id);

        let request = self
            .http_client
            .put(self.url(&format!("/posts/{}", id)))
            .json(&body);
        let mut api: ApiPost = self.fetch(request).await?;
        fill_missing_id(&mut api.id, id);

        Post::try_from(api).map_err(malformed)
    }

    #[tracing::instrument(skip(self), fields(adapter = "rest"))]
    async fn delete_post(&self, user_id: &str, id: &str) -> RemoteResult<()> {
        let request = self
            .http_client
            .delete(self.url(&format!("/posts/{}", id)))
            .json(&json!({ "email": user_id }));
        self.execute(request).await
    }

    #[tracing::instrument(skip(self, author, draft), fields(adapter = "rest", author = %author.id))]
    async fn add_comment(
        &self,
        author: &User,
        post_id: &str,
        draft: &CommentDraft,
    ) -> RemoteResult<Comment> {
        draft.validate()?;
        let request = self
            .http_client
            .post(self.url(&format!("/posts/{}/comments", post_id)))
            .json(&json!({
                "email": author.id,
                "content": draft.content.trim(),
                "profileIcon": author.display_icon,
            }));
        let api: ApiComment = self.fetch(request).await?;

        Comment::try_from(api).map_err(malformed)
    }

    #[tracing::instrument(skip(self, content), fields(adapter = "rest"))]
    async fn update_comment(
        &self,
        user_id: &str,
        post_id: &str,
        comment_id: &str,
        content: &str,
    ) -> RemoteResult<Comment> {
        let request = self
            .http_client
            .put(self.url(&format!("/posts/{}/comments/{}", post_id, comment_id)))
            .json(&json!({ "email": user_id, "content": content }));
        let mut api: ApiComment = self.fetch(request).await?;
        fill_missing_id(&mut api.id, comment_id);

        Comment::try_from(api).map_err(malformed)
    }

    #[tracing::instrument(skip(self), fields(adapter = "rest"))]
    async fn delete_comment(&self, user_id: &str, post_id: &str, comment_id: &str) -> RemoteResult<()> {
        let request = self
            .http_client
            .delete(self.url(&format!("/posts/{}/comments/{}", post_id, comment_id)))
            .json(&json!({ "email": user_id }));
        self.execute(request).await
    }

    async fn get_watch_providers(&self, movie_id: &str) -> RemoteResult<ProviderSet> {
        cached!(
            self.cache,
            LookupKey::Providers(movie_id.to_string()),
            self.provider_ttl,
            async move {
                let request = self
                    .http_client
                    .get(self.url(&format!("/movie/{}/providers", movie_id)));
                let providers: ProviderSet = self.fetch(request).await?;

                tracing::info!(
                    movie_id = %movie_id,
                    flatrate = providers.flatrate.len(),
                    rent = providers.rent.len(),
                    buy = providers.buy.len(),
                    adapter = "rest",
                    "Watch providers fetched"
                );

                Ok::<_, RemoteError>(providers)
            }
        )
    }

    #[tracing::instrument(skip(self), fields(adapter = "rest"))]
    async fn recommend(&self, mood: &str, user_id: Option<&str>) -> RemoteResult<Recommendation> {
        if mood.trim().is_empty() {
            return Err(RemoteError::Validation("Mood is required".to_string()));
        }

        let mut body = json!({ "mood": mood });
        if let Some(email) = user_id {
            body["email"] = json!(email);
        }
        let response: ApiRecommendResponse = self
            .fetch(self.http_client.post(self.url("/recommend")).json(&body))
            .await?;

        Ok(self.convert_recommendation(mood, response))
    }

    fn name(&self) -> &'static str {
        "rest"
    }
}

#[async_trait::async_trait]
impl IdentityBackend for RestAdapter {
    #[tracing::instrument(skip(self, secret), fields(adapter = "rest"))]
    async fn signup(&self, id: &str, secret: &str) -> AuthResult<User> {
        let request = self
            .http_client
            .post(self.url("/signup"))
            .json(&json!({ "email": id, "password": secret }));
        let user: ApiUser = self.fetch_identity(request).await?;
        Ok(user.into())
    }

    #[tracing::instrument(skip(self, secret), fields(adapter = "rest"))]
    async fn login(&self, id: &str, secret: &str) -> AuthResult<User> {
        let request = self
            .http_client
            .post(self.url("/login"))
            .json(&json!({ "email": id, "password": secret }));
        let user: ApiUser = self.fetch_identity(request).await?;
        Ok(user.into())
    }

    #[tracing::instrument(skip(self), fields(adapter = "rest"))]
    async fn update_profile_icon(&self, user_id: &str, icon: &str) -> AuthResult<()> {
        let request = self
            .http_client
            .put(self.url("/profile/icon"))
            .json(&json!({ "email": user_id, "profileIcon": icon }));
        let _: serde_json::Value = self.fetch_identity(request).await?;
        Ok(())
    }

    /// The REST API has no account lookup; persisted sessions are trusted
    async fn user_exists(&self, _user_id: &str) -> AuthResult<bool> {
        Ok(true)
    }
}
