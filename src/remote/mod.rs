/// Backend abstraction
///
/// The client can talk to several incompatible backends (REST over a
/// relational store, REST over a document store, or a document database
/// directly). Each one implements the same contracts here, so the sync engine
/// and the identity store never see backend-specific shapes.
use crate::{
    error::{AuthResult, RemoteResult},
    models::{
        Comment, CommentDraft, FavoriteEntry, FavoriteToggle, HistoryEntry, MovieRef, Post,
        PostDraft, PostPatch, ProviderSet, Recommendation, User,
    },
};

pub mod document;
pub mod lookup_cache;
pub mod rest;

pub use document::DocumentAdapter;
pub use rest::RestAdapter;

/// Collection operations against one backend
///
/// Calls that act on a post or comment take the acting user; backends reject
/// the call with `Authorization` when that user is not the owner.
#[async_trait::async_trait]
pub trait RemoteAdapter: Send + Sync {
    async fn get_favorites(&self, user_id: &str) -> RemoteResult<Vec<FavoriteEntry>>;

    /// Adds the movie when absent and removes it when present, server side
    async fn toggle_favorite(&self, user_id: &str, movie: &MovieRef)
        -> RemoteResult<FavoriteToggle>;

    /// Newest first
    async fn get_history(&self, user_id: &str) -> RemoteResult<Vec<HistoryEntry>>;

    async fn delete_history(&self, user_id: &str, id: &str) -> RemoteResult<()>;

    /// Newest first
    async fn list_posts(&self) -> RemoteResult<Vec<Post>>;

    async fn create_post(&self, author: &User, draft: &PostDraft) -> RemoteResult<Post>;

    async fn update_post(&self, user_id: &str, id: &str, patch: &PostPatch) -> RemoteResult<Post>;

    async fn delete_post(&self, user_id: &str, id: &str) -> RemoteResult<()>;

    async fn add_comment(
        &self,
        author: &User,
        post_id: &str,
        draft: &CommentDraft,
    ) -> RemoteResult<Comment>;

    async fn update_comment(
        &self,
        user_id: &str,
        post_id: &str,
        comment_id: &str,
        content: &str,
    ) -> RemoteResult<Comment>;

    async fn delete_comment(&self, user_id: &str, post_id: &str, comment_id: &str)
        -> RemoteResult<()>;

    async fn get_watch_providers(&self, movie_id: &str) -> RemoteResult<ProviderSet>;

    /// Opaque recommendation service; records a history entry when a user is given
    async fn recommend(&self, mood: &str, user_id: Option<&str>) -> RemoteResult<Recommendation>;

    /// Adapter name for logging and debugging
    fn name(&self) -> &'static str;
}

/// Account operations against one backend
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait IdentityBackend: Send + Sync {
    async fn signup(&self, id: &str, secret: &str) -> AuthResult<User>;

    async fn login(&self, id: &str, secret: &str) -> AuthResult<User>;

    async fn update_profile_icon(&self, user_id: &str, icon: &str) -> AuthResult<()>;

    async fn user_exists(&self, user_id: &str) -> AuthResult<bool>;

    /// Whether a restored session should be checked against the backend
    ///
    /// REST backends trust the persisted identity; a direct database client
    /// can cheaply confirm the account still exists.
    fn verifies_sessions(&self) -> bool {
        false
    }
}
