/// Managed document database backend
///
/// Talks to a [`DocumentStore`] directly instead of going through the HTTP
/// API, so it enforces ownership and validation itself. The document layout
/// is the one the document-store REST backend writes, which lets both
/// adapters read each other's data.
use chrono::{SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::{
    cached,
    db::{Direction, DocumentStore, Query, StoredDocument},
    error::{AuthError, AuthResult, RemoteError, RemoteResult},
    models::{
        ApiComment, ApiHistoryEntry, ApiMovie, ApiPost, Comment, CommentDraft, FavoriteEntry,
        FavoriteStatus, FavoriteToggle, HistoryEntry, MovieRef, Post, PostDraft, PostPatch,
        ProviderSet, Recommendation, RecommendedMovie, User, DEFAULT_ICON,
    },
    remote::{
        lookup_cache::{LookupCache, LookupKey},
        rest::{malformed, normalize, DEFAULT_PROVIDER_CACHE_TTL},
        IdentityBackend, RemoteAdapter,
    },
};

const USERS: &str = "users";
const POSTS: &str = "posts";
const HISTORY: &str = "search_history";
const CATALOG: &str = "catalog";
const PROVIDERS: &str = "providers";

const HISTORY_LIMIT: usize = 20;
const POSTS_LIMIT: usize = 50;
const RECOMMENDATION_COUNT: usize = 5;

const FALLBACK_EXPLANATION: &str = "We couldn't connect services, but try these favorites!";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDocument {
    password_hash: String,
    salt: String,
    #[serde(default)]
    favorites: Vec<ApiMovie>,
    #[serde(default)]
    profile_icon: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

impl UserDocument {
    fn to_user(&self, email: &str) -> User {
        User {
            id: email.to_string(),
            display_icon: self
                .profile_icon
                .clone()
                .filter(|icon| !icon.is_empty())
                .unwrap_or_else(|| DEFAULT_ICON.to_string()),
            created_at: self.created_at.as_deref().and_then(crate::models::parse_timestamp),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostDocument {
    author: String,
    movie_title: String,
    content: String,
    rating: i64,
    #[serde(default)]
    anonymous: bool,
    profile_icon: String,
    movie_poster: Option<String>,
    movie_year: Option<String>,
    movie_plot: Option<String>,
    timestamp: String,
    #[serde(default)]
    comments: Vec<CommentDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentDocument {
    id: String,
    author: String,
    content: String,
    profile_icon: String,
    timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryDocument {
    mood: String,
    #[serde(rename = "result_count")]
    result_count: u32,
    email: String,
    timestamp: String,
}

/// Catalog details copied onto a new post
#[derive(Debug, Default)]
struct Enrichment {
    poster: Option<String>,
    year: Option<String>,
    plot: Option<String>,
}

pub struct DocumentAdapter<S> {
    store: S,
    cache: LookupCache,
    lookup_ttl: u64,
}

impl<S: DocumentStore> DocumentAdapter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: LookupCache::new(),
            lookup_ttl: DEFAULT_PROVIDER_CACHE_TTL,
        }
    }

    pub fn with_lookup_ttl(mut self, ttl_secs: u64) -> Self {
        self.lookup_ttl = ttl_secs;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Adds movies to the catalog used for recommendations and post enrichment
    pub async fn seed_catalog(&self, movies: &[MovieRef]) -> RemoteResult<()> {
        for movie in movies {
            let data = encode(&ApiMovie::from(movie))?;
            self.store.set(CATALOG, &movie.external_id, data).await?;
        }
        tracing::info!(count = movies.len(), adapter = "document", "Catalog seeded");
        Ok(())
    }

    pub async fn seed_providers(&self, movie_id: &str, providers: &ProviderSet) -> RemoteResult<()> {
        self.store
            .set(PROVIDERS, movie_id, encode(providers)?)
            .await
    }

    async fn user_document(&self, email: &str) -> RemoteResult<Option<UserDocument>> {
        self.store
            .get(USERS, email)
            .await?
            .map(|data| decode(data, "user"))
            .transpose()
    }

    async fn require_user(&self, email: &str) -> RemoteResult<UserDocument> {
        self.user_document(email)
            .await?
            .ok_or_else(|| RemoteError::NotFound("User not found".to_string()))
    }

    async fn post_document(&self, id: &str) -> RemoteResult<PostDocument> {
        let data = self
            .store
            .get(POSTS, id)
            .await?
            .ok_or_else(|| RemoteError::NotFound("Post not found".to_string()))?;
        decode(data, "post")
    }

    async fn save_comments(&self, post_id: &str, comments: &[CommentDocument]) -> RemoteResult<()> {
        let mut fields = Map::new();
        fields.insert("comments".to_string(), encode(comments)?);
        self.store.update(POSTS, post_id, fields).await
    }

    async fn catalog(&self) -> RemoteResult<Vec<MovieRef>> {
        let documents = self.store.query(&Query::collection(CATALOG)).await?;
        Ok(normalize(wire_items::<ApiMovie>(documents, "catalog movie"), "catalog movie"))
    }

    /// Catalog movies whose title or overview mentions a word of the mood
    async fn search_catalog(&self, mood: &str) -> RemoteResult<Vec<MovieRef>> {
        cached!(
            self.cache,
            LookupKey::Catalog(mood.to_string()),
            self.lookup_ttl,
            async {
                let words: Vec<String> = mood
                    .split_whitespace()
                    .map(str::to_lowercase)
                    .filter(|word| word.chars().count() >= 3)
                    .collect();

                let matches: Vec<MovieRef> = self
                    .catalog()
                    .await?
                    .into_iter()
                    .filter(|movie| {
                        let haystack =
                            format!("{} {}", movie.title, movie.overview).to_lowercase();
                        words.iter().any(|word| haystack.contains(word.as_str()))
                    })
                    .take(RECOMMENDATION_COUNT)
                    .collect();

                Ok::<_, RemoteError>(matches)
            }
        )
    }

    async fn enrichment(&self, movie_title: &str) -> Enrichment {
        let catalog = match self.catalog().await {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::warn!(error = %e, movie_title, "Catalog lookup failed, post not enriched");
                return Enrichment::default();
            }
        };

        catalog
            .into_iter()
            .find(|movie| movie.title.eq_ignore_ascii_case(movie_title.trim()))
            .map(|movie| Enrichment {
                poster: movie.poster_path,
                year: movie
                    .release_date
                    .as_deref()
                    .and_then(|date| date.get(..4))
                    .map(str::to_string),
                plot: Some(movie.overview).filter(|plot| !plot.is_empty()),
            })
            .unwrap_or_default()
    }

    async fn record_history(&self, email: &str, mood: &str, result_count: usize) {
        let entry = HistoryDocument {
            mood: mood.to_string(),
            result_count: result_count as u32,
            email: email.to_string(),
            timestamp: now(),
        };

        let result = match encode(&entry) {
            Ok(data) => self.store.add(HISTORY, data).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            // The recommendation itself still succeeded
            tracing::error!(error = %e, email, "Failed to record search history");
        }
    }
}

/// Rejects the call unless `user_id` owns the resource
fn ensure_owner(owner: &str, user_id: &str, what: &str) -> RemoteResult<()> {
    if owner == user_id {
        Ok(())
    } else {
        Err(RemoteError::Authorization(format!(
            "{} belongs to another user",
            what
        )))
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> RemoteResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| RemoteError::Network(format!("Document encoding error: {}", e)))
}

fn decode<T: DeserializeOwned>(data: Value, what: &str) -> RemoteResult<T> {
    serde_json::from_value(data)
        .map_err(|e| RemoteError::Network(format!("Malformed {} document: {}", what, e)))
}

/// Deserializes query results into wire types, skipping documents that do not fit
fn wire_items<A: DeserializeOwned>(documents: Vec<StoredDocument>, what: &str) -> Vec<A> {
    documents
        .into_iter()
        .filter_map(|document| {
            let id = document.id.clone();
            match serde_json::from_value(document.with_id()) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::warn!(kind = what, id = %id, error = %e, "Skipping malformed document");
                    None
                }
            }
        })
        .collect()
}

fn to_post(id: &str, document: &PostDocument) -> RemoteResult<Post> {
    let mut data = encode(document)?;
    data["id"] = json!(id);
    let api: ApiPost = decode(data, "post")?;
    Post::try_from(api).map_err(malformed)
}

fn to_comment(document: &CommentDocument) -> RemoteResult<Comment> {
    let api: ApiComment = decode(encode(document)?, "comment")?;
    Comment::try_from(api).map_err(malformed)
}

fn hash_password(salt: &str, secret: &str) -> String {
    format!("{:x}", Sha256::digest(format!("{}{}", salt, secret).as_bytes()))
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Shown when the catalog has nothing at all
fn fallback_movies() -> Vec<MovieRef> {
    [
        ("27205", "Inception", 8.4, "/8Z8dptZQl1qWhIdHgtiKTfIv1HQ.jpg", "2010-07-15", "Dream within a dream."),
        ("157336", "Interstellar", 8.4, "/gEU2QniE6E77NI6lCU6MxlNBvIx.jpg", "2014-11-05", "Space travel."),
        ("155", "The Dark Knight", 8.5, "/qJ2tW6WMUDux911r6m7haRef0WH.jpg", "2008-07-14", "Batman vs Joker."),
    ]
    .into_iter()
    .map(|(id, title, vote, poster, released, overview)| MovieRef {
        external_id: id.to_string(),
        title: title.to_string(),
        poster_path: Some(poster.to_string()),
        release_date: Some(released.to_string()),
        overview: overview.to_string(),
        vote_average: vote,
    })
    .collect()
}

#[async_trait::async_trait]
impl<S: DocumentStore> RemoteAdapter for DocumentAdapter<S> {
    #[tracing::instrument(skip(self), fields(adapter = "document"))]
    async fn get_favorites(&self, user_id: &str) -> RemoteResult<Vec<FavoriteEntry>> {
        let user = self.require_user(user_id).await?;
        Ok(normalize(user.favorites, "favorite"))
    }

    #[tracing::instrument(skip(self, movie), fields(adapter = "document", movie_id = %movie.external_id))]
    async fn toggle_favorite(&self, user_id: &str, movie: &MovieRef) -> RemoteResult<FavoriteToggle> {
        // Read-modify-write without a transaction: a concurrent toggle from
        // another client between the read and the update is lost
        let mut user = self.require_user(user_id).await?;
        let existing = user
            .favorites
            .iter()
            .position(|favorite| favorite.external_id().as_deref() == Some(movie.external_id.as_str()));

        let toggle = match existing {
            Some(index) => {
                let removed = user.favorites.remove(index);
                FavoriteToggle {
                    status: FavoriteStatus::Removed,
                    canonical: MovieRef::try_from(removed).unwrap_or_else(|_| movie.clone()),
                }
            }
            None => {
                user.favorites.push(ApiMovie::from(movie));
                FavoriteToggle {
                    status: FavoriteStatus::Added,
                    canonical: movie.clone(),
                }
            }
        };

        let mut fields = Map::new();
        fields.insert("favorites".to_string(), encode(&user.favorites)?);
        self.store.update(USERS, user_id, fields).await?;

        Ok(toggle)
    }

    #[tracing::instrument(skip(self), fields(adapter = "document"))]
    async fn get_history(&self, user_id: &str) -> RemoteResult<Vec<HistoryEntry>> {
        let query = Query::collection(HISTORY)
            .where_eq("email", user_id)
            .order_by("timestamp", Direction::Descending)
            .limit(HISTORY_LIMIT);
        let documents = self.store.query(&query).await?;

        Ok(wire_items::<ApiHistoryEntry>(documents, "history")
            .into_iter()
            .map(HistoryEntry::from)
            .collect())
    }

    #[tracing::instrument(skip(self), fields(adapter = "document"))]
    async fn delete_history(&self, user_id: &str, id: &str) -> RemoteResult<()> {
        let data = self
            .store
            .get(HISTORY, id)
            .await?
            .ok_or_else(|| RemoteError::NotFound("History entry not found".to_string()))?;
        let entry: HistoryDocument = decode(data, "history")?;
        ensure_owner(&entry.email, user_id, "History entry")?;

        self.store.delete(HISTORY, id).await
    }

    #[tracing::instrument(skip(self), fields(adapter = "document"))]
    async fn list_posts(&self) -> RemoteResult<Vec<Post>> {
        let query = Query::collection(POSTS)
            .order_by("timestamp", Direction::Descending)
            .limit(POSTS_LIMIT);
        let documents = self.store.query(&query).await?;

        Ok(normalize(wire_items::<ApiPost>(documents, "post"), "post"))
    }

    #[tracing::instrument(skip(self, author, draft), fields(adapter = "document", author = %author.id))]
    async fn create_post(&self, author: &User, draft: &PostDraft) -> RemoteResult<Post> {
        let rating = draft.validate()?;
        let enrichment = self.enrichment(draft.movie_title.trim()).await;

        let document = PostDocument {
            author: author.id.clone(),
            movie_title: draft.movie_title.trim().to_string(),
            content: draft.content.trim().to_string(),
            rating: rating.into(),
            anonymous: draft.anonymous,
            profile_icon: draft.display_icon(&author.display_icon),
            movie_poster: enrichment.poster,
            movie_year: enrichment.year,
            movie_plot: enrichment.plot,
            timestamp: now(),
            comments: Vec::new(),
        };
        let id = self.store.add(POSTS, encode(&document)?).await?;

        tracing::info!(post_id = %id, adapter = "document", "Post created");
        to_post(&id, &document)
    }

    #[tracing::instrument(skip(self, patch), fields(adapter = "document"))]
    async fn update_post(&self, user_id: &str, id: &str, patch: &PostPatch) -> RemoteResult<Post> {
        let mut document = self.post_document(id).await?;
        ensure_owner(&document.author, user_id, "Post")?;

        let mut fields = Map::new();
        if let Some(title) = &patch.movie_title {
            document.movie_title = title.clone();
            fields.insert("movieTitle".to_string(), json!(title));
        }
        if let Some(content) = &patch.content {
            if content.trim().is_empty() {
                return Err(RemoteError::Validation("review content cannot be empty".to_string()));
            }
            document.content = content.clone();
            fields.insert("content".to_string(), json!(content));
        }
        if let Some(rating) = patch.rating {
            document.rating = rating.into();
            fields.insert("rating".to_string(), json!(document.rating));
        }

        if !fields.is_empty() {
            self.store.update(POSTS, id, fields).await?;
        }
        to_post(id, &document)
    }

    #[tracing::instrument(skip(self), fields(adapter = "document"))]
    async fn delete_post(&self, user_id: &str, id: &str) -> RemoteResult<()> {
        let document = self.post_document(id).await?;
        ensure_owner(&document.author, user_id, "Post")?;

        self.store.delete(POSTS, id).await
    }

    #[tracing::instrument(skip(self, author, draft), fields(adapter = "document", author = %author.id))]
    async fn add_comment(
        &self,
        author: &User,
        post_id: &str,
        draft: &CommentDraft,
    ) -> RemoteResult<Comment> {
        draft.validate()?;
        let mut document = self.post_document(post_id).await?;

        let comment = CommentDocument {
            id: uuid::Uuid::new_v4().to_string(),
            author: author.id.clone(),
            content: draft.content.clone(),
            profile_icon: author.display_icon.clone(),
            timestamp: now(),
        };
        document.comments.push(comment.clone());
        self.save_comments(post_id, &document.comments).await?;

        to_comment(&comment)
    }

    #[tracing::instrument(skip(self, content), fields(adapter = "document"))]
    async fn update_comment(
        &self,
        user_id: &str,
        post_id: &str,
        comment_id: &str,
        content: &str,
    ) -> RemoteResult<Comment> {
        CommentDraft {
            content: content.to_string(),
        }
        .validate()?;

        let mut document = self.post_document(post_id).await?;
        let comment = document
            .comments
            .iter_mut()
            .find(|comment| comment.id == comment_id)
            .ok_or_else(|| RemoteError::NotFound("Comment not found".to_string()))?;
        ensure_owner(&comment.author, user_id, "Comment")?;

        comment.content = content.to_string();
        let updated = comment.clone();
        self.save_comments(post_id, &document.comments).await?;

        to_comment(&updated)
    }

    #[tracing::instrument(skip(self), fields(adapter = "document"))]
    async fn delete_comment(&self, user_id: &str, post_id: &str, comment_id: &str) -> RemoteResult<()> {
        let mut document = self.post_document(post_id).await?;
        let index = document
            .comments
            .iter()
            .position(|comment| comment.id == comment_id)
            .ok_or_else(|| RemoteError::NotFound("Comment not found".to_string()))?;
        ensure_owner(&document.comments[index].author, user_id, "Comment")?;

        document.comments.remove(index);
        self.save_comments(post_id, &document.comments).await
    }

    async fn get_watch_providers(&self, movie_id: &str) -> RemoteResult<ProviderSet> {
        cached!(
            self.cache,
            LookupKey::Providers(movie_id.to_string()),
            self.lookup_ttl,
            async {
                // Movies nobody has listed providers for have none
                let providers = match self.store.get(PROVIDERS, movie_id).await? {
                    Some(data) => decode(data, "providers")?,
                    None => ProviderSet::default(),
                };

                tracing::info!(
                    movie_id = %movie_id,
                    flatrate = providers.flatrate.len(),
                    rent = providers.rent.len(),
                    buy = providers.buy.len(),
                    adapter = "document",
                    "Watch providers fetched"
                );

                Ok::<_, RemoteError>(providers)
            }
        )
    }

    #[tracing::instrument(skip(self), fields(adapter = "document"))]
    async fn recommend(&self, mood: &str, user_id: Option<&str>) -> RemoteResult<Recommendation> {
        if mood.trim().is_empty() {
            return Err(RemoteError::Validation("Mood is required".to_string()));
        }

        let matches = self.search_catalog(mood).await?;
        let (movies, explanation) = if matches.is_empty() {
            let mut fallback: Vec<MovieRef> = self
                .catalog()
                .await?
                .into_iter()
                .take(RECOMMENDATION_COUNT)
                .collect();
            if fallback.is_empty() {
                fallback = fallback_movies();
            }
            (fallback, FALLBACK_EXPLANATION.to_string())
        } else {
            (matches, format!("Here are some picks for your mood: '{}'", mood))
        };

        if let Some(email) = user_id {
            self.record_history(email, mood, movies.len()).await;
        }

        Ok(Recommendation {
            mood: mood.to_string(),
            explanation: Some(explanation),
            movies: movies
                .into_iter()
                .map(|movie| RecommendedMovie {
                    movie,
                    reason: None,
                })
                .collect(),
        })
    }

    fn name(&self) -> &'static str {
        "document"
    }
}

#[async_trait::async_trait]
impl<S: DocumentStore> IdentityBackend for DocumentAdapter<S> {
    #[tracing::instrument(skip(self, secret), fields(adapter = "document"))]
    async fn signup(&self, id: &str, secret: &str) -> AuthResult<User> {
        if id.trim().is_empty() || secret.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        if self.user_document(id).await?.is_some() {
            return Err(AuthError::AlreadyExists);
        }

        let salt = uuid::Uuid::new_v4().simple().to_string();
        let document = UserDocument {
            password_hash: hash_password(&salt, secret),
            salt,
            favorites: Vec::new(),
            profile_icon: Some(DEFAULT_ICON.to_string()),
            created_at: Some(now()),
        };
        self.store.set(USERS, id, encode(&document)?).await?;

        tracing::info!(user = %id, adapter = "document", "User signed up");
        Ok(document.to_user(id))
    }

    #[tracing::instrument(skip(self, secret), fields(adapter = "document"))]
    async fn login(&self, id: &str, secret: &str) -> AuthResult<User> {
        let document = self
            .user_document(id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if hash_password(&document.salt, secret) != document.password_hash {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(document.to_user(id))
    }

    #[tracing::instrument(skip(self), fields(adapter = "document"))]
    async fn update_profile_icon(&self, user_id: &str, icon: &str) -> AuthResult<()> {
        if icon.trim().is_empty() {
            return Err(AuthError::Validation("Profile icon required".to_string()));
        }
        if self.user_document(user_id).await?.is_none() {
            return Err(AuthError::Unauthenticated);
        }

        // Comments live inside their posts, so every post is scanned. All
        // rewrites are worked out before anything is written.
        let mut rewrites = Vec::new();
        for stored in self.store.query(&Query::collection(POSTS)).await? {
            let mut document: PostDocument = match decode(stored.data, "post") {
                Ok(document) => document,
                Err(e) => {
                    tracing::warn!(post_id = %stored.id, error = %e, "Skipping malformed post");
                    continue;
                }
            };
            let mut fields = Map::new();

            if document.author == user_id && !document.anonymous && document.profile_icon != icon {
                fields.insert("profileIcon".to_string(), json!(icon));
            }
            let mut comments_changed = false;
            for comment in document.comments.iter_mut().filter(|c| c.author == user_id) {
                comment.profile_icon = icon.to_string();
                comments_changed = true;
            }
            if comments_changed {
                fields.insert("comments".to_string(), encode(&document.comments)?);
            }

            if !fields.is_empty() {
                rewrites.push((stored.id, fields));
            }
        }

        let mut fields = Map::new();
        fields.insert("profileIcon".to_string(), json!(icon));
        self.store.update(USERS, user_id, fields).await?;

        let rewritten = rewrites.len();
        for (id, fields) in rewrites {
            self.store.update(POSTS, &id, fields).await?;
        }

        tracing::info!(user = %user_id, posts = rewritten, adapter = "document", "Profile icon updated");
        Ok(())
    }

    async fn user_exists(&self, user_id: &str) -> AuthResult<bool> {
        Ok(self.user_document(user_id).await?.is_some())
    }

    fn verifies_sessions(&self) -> bool {
        true
    }
}
