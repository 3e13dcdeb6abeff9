#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use movieguru_sync::{
    db::MemoryDocumentStore,
    error::{AuthResult, RemoteError, RemoteResult},
    identity::{IdentityStore, MemorySessionStore},
    models::{
        Comment, CommentDraft, FavoriteEntry, FavoriteToggle, HistoryEntry, MovieRef, Post,
        PostDraft, PostPatch, ProviderSet, Recommendation, User,
    },
    remote::{DocumentAdapter, IdentityBackend, RemoteAdapter},
    sync::SyncEngine,
};

pub const PASSWORD: &str = "hunter2";

/// In-memory document backend with scripted failures and call gates
///
/// A gated call blocks after it is recorded until the test releases it, so
/// tests can observe what the engine does while operations are pending.
pub struct ScriptedAdapter {
    documents: DocumentAdapter<MemoryDocumentStore>,
    failures: Mutex<HashMap<&'static str, VecDeque<RemoteError>>>,
    gates: Mutex<HashMap<&'static str, Arc<Semaphore>>>,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self {
            documents: DocumentAdapter::new(MemoryDocumentStore::new()),
            failures: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// The backend itself, for arranging data and checking what it holds
    pub fn documents(&self) -> &DocumentAdapter<MemoryDocumentStore> {
        &self.documents
    }

    /// The next call of `op` fails with `err` without reaching the backend
    pub fn fail_next(&self, op: &'static str, err: RemoteError) {
        self.failures.lock().entry(op).or_default().push_back(err);
    }

    /// Calls of `op` wait until released
    pub fn gate(&self, op: &'static str) {
        self.gates.lock().insert(op, Arc::new(Semaphore::new(0)));
    }

    /// Lets `count` waiting or future calls of `op` through
    pub fn release(&self, op: &'static str, count: usize) {
        if let Some(gate) = self.gates.lock().get(op) {
            gate.add_permits(count);
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|call| **call == op).count()
    }

    /// Waits until `op` has been called `count` times
    pub async fn wait_for_calls(&self, op: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.call_count(op) < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{} was not called {} times", op, count));
    }

    async fn enter(&self, op: &'static str) -> RemoteResult<()> {
        self.calls.lock().push(op);

        let gate = self.gates.lock().get(op).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        match self.failures.lock().get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl RemoteAdapter for ScriptedAdapter {
    async fn get_favorites(&self, user_id: &str) -> RemoteResult<Vec<FavoriteEntry>> {
        self.enter("get_favorites").await?;
        self.documents.get_favorites(user_id).await
    }

    async fn toggle_favorite(&self, user_id: &str, movie: &MovieRef) -> RemoteResult<FavoriteToggle> {
        self.enter("toggle_favorite").await?;
        self.documents.toggle_favorite(user_id, movie).await
    }

    async fn get_history(&self, user_id: &str) -> RemoteResult<Vec<HistoryEntry>> {
        self.enter("get_history").await?;
        self.documents.get_history(user_id).await
    }

    async fn delete_history(&self, user_id: &str, id: &str) -> RemoteResult<()> {
        self.enter("delete_history").await?;
        self.documents.delete_history(user_id, id).await
    }

    async fn list_posts(&self) -> RemoteResult<Vec<Post>> {
        self.enter("list_posts").await?;
        self.documents.list_posts().await
    }

    async fn create_post(&self, author: &User, draft: &PostDraft) -> RemoteResult<Post> {
        self.enter("create_post").await?;
        self.documents.create_post(author, draft).await
    }

    async fn update_post(&self, user_id: &str, id: &str, patch: &PostPatch) -> RemoteResult<Post> {
        self.enter("update_post").await?;
        self.documents.update_post(user_id, id, patch).await
    }

    async fn delete_post(&self, user_id: &str, id: &str) -> RemoteResult<()> {
        self.enter("delete_post").await?;
        self.documents.delete_post(user_id, id).await
    }

    async fn add_comment(
        &self,
        author: &User,
        post_id: &str,
        draft: &CommentDraft,
    ) -> RemoteResult<Comment> {
        self.enter("add_comment").await?;
        self.documents.add_comment(author, post_id, draft).await
    }

    async fn update_comment(
        &self,
        user_id: &str,
        post_id: &str,
        comment_id: &str,
        content: &str,
    ) -> RemoteResult<Comment> {
        self.enter("update_comment").await?;
        self.documents
            .update_comment(user_id, post_id, comment_id, content)
            .await
    }

    async fn delete_comment(&self, user_id: &str, post_id: &str, comment_id: &str) -> RemoteResult<()> {
        self.enter("delete_comment").await?;
        self.documents.delete_comment(user_id, post_id, comment_id).await
    }

    async fn get_watch_providers(&self, movie_id: &str) -> RemoteResult<ProviderSet> {
        self.enter("get_watch_providers").await?;
        self.documents.get_watch_providers(movie_id).await
    }

    async fn recommend(&self, mood: &str, user_id: Option<&str>) -> RemoteResult<Recommendation> {
        self.enter("recommend").await?;
        self.documents.recommend(mood, user_id).await
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[async_trait::async_trait]
impl IdentityBackend for ScriptedAdapter {
    async fn signup(&self, id: &str, secret: &str) -> AuthResult<User> {
        self.documents.signup(id, secret).await
    }

    async fn login(&self, id: &str, secret: &str) -> AuthResult<User> {
        self.documents.login(id, secret).await
    }

    async fn update_profile_icon(&self, user_id: &str, icon: &str) -> AuthResult<()> {
        self.documents.update_profile_icon(user_id, icon).await
    }

    async fn user_exists(&self, user_id: &str) -> AuthResult<bool> {
        self.documents.user_exists(user_id).await
    }

    fn verifies_sessions(&self) -> bool {
        true
    }
}

pub struct Harness {
    pub adapter: Arc<ScriptedAdapter>,
    pub identity: IdentityStore,
    pub engine: SyncEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let adapter = Arc::new(ScriptedAdapter::new());
        let identity = IdentityStore::new(adapter.clone(), Arc::new(MemorySessionStore::new()));
        let engine = SyncEngine::new(adapter.clone(), identity.clone(), timeout);

        Self {
            adapter,
            identity,
            engine,
        }
    }

    /// Creates an account directly in the backend
    pub async fn account(&self, email: &str) -> User {
        self.adapter.documents().signup(email, PASSWORD).await.unwrap()
    }

    /// Signs `email` up through the identity store and loads its collections
    pub async fn sign_in(&self, email: &str) -> User {
        let user = self.identity.signup(email, PASSWORD).await.unwrap();
        self.engine.load().await.unwrap();
        user
    }
}

pub fn movie(id: &str, title: &str) -> MovieRef {
    MovieRef {
        external_id: id.to_string(),
        title: title.to_string(),
        poster_path: Some(format!("/{}.jpg", id)),
        release_date: Some("1995-12-15".to_string()),
        overview: format!("{} overview", title),
        vote_average: 7.5,
    }
}

pub fn draft(title: &str, rating: i64) -> PostDraft {
    PostDraft {
        movie_title: title.to_string(),
        content: format!("Thoughts on {}", title),
        rating,
        anonymous: false,
    }
}

pub fn comment(content: &str) -> CommentDraft {
    CommentDraft {
        content: content.to_string(),
    }
}

/// Polls until `condition` holds, failing the test after a few seconds
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}
