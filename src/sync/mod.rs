//! Couples cache mutations to backend calls.
//!
//! Every mutation follows the same protocol: the local change is applied
//! synchronously and the call returns a [`PendingOperation`]; the remote call
//! runs on a spawned task once its turn comes (see [`Sequencer`]); success
//! reconciles the target with the server's canonical value and failure puts
//! the target back the way it was.
//!
//! Rollback is tracked per target key. For each key with operations in
//! flight the engine keeps the last authoritative slice of the cache (the
//! base) and the queue of optimistic mutations applied on top of it. When an
//! operation resolves, the base is moved forward (confirmed) or left alone
//! (reverted), restored into the cache, and the remaining mutations are
//! replayed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::{
    cache::{self, CollectionCache, CollectionState, Entry, Slice, TargetKey},
    error::{RemoteError, RemoteResult, SyncError, SyncResult},
    identity::IdentityStore,
    models::{
        is_local_id, new_local_id, Comment, CommentDraft, FavoriteEntry, FavoriteStatus,
        FavoriteToggle, HistoryEntry, MovieRef, Post, PostDraft, PostPatch, ProviderSet,
        Recommendation, User,
    },
    remote::RemoteAdapter,
};

pub mod operation;
pub mod sequencer;

pub use operation::{CacheEvent, PendingOperation, Phase};
pub use sequencer::{Sequencer, Ticket};

pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Most recent searches kept in the cache
pub const HISTORY_LIMIT: usize = 20;

/// Most recent posts kept in the cache
pub const POSTS_LIMIT: usize = 50;

const EVENT_CAPACITY: usize = 256;

/// Fetches a load makes before installing what it has even if it raced a confirmation
const LOAD_ATTEMPTS: usize = 3;

type Mutation = Arc<dyn Fn(&mut CollectionCache) + Send + Sync>;

struct Queued {
    op: u64,
    mutation: Mutation,
}

struct Inflight {
    base: Slice,
    queue: VecDeque<Queued>,
}

/// How a resolved operation leaves its target
enum Settlement {
    /// The target's authoritative value is now this (`None`: gone)
    Confirmed(Option<Entry>),
    /// A placeholder was accepted under the server's id
    Replaced(Entry),
    Reverted,
}

#[derive(Default)]
struct EngineState {
    cache: CollectionCache,
    inflight: HashMap<TargetKey, Inflight>,
    /// Bumped on every reset; resolutions from an older session are dropped
    generation: u64,
    /// User the cache belongs to
    session: Option<String>,
    /// Bumped whenever a confirmation moves authoritative state forward
    confirmations: u64,
}

impl EngineState {
    fn apply(&mut self, key: &TargetKey, op: u64, mutation: Mutation) {
        let cache = &self.cache;
        let inflight = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Inflight {
                base: cache.slice(key),
                queue: VecDeque::new(),
            });
        mutation(&mut self.cache);
        inflight.queue.push_back(Queued { op, mutation });
    }

    fn settle(&mut self, key: &TargetKey, op: u64, settlement: Settlement) {
        let Some(mut inflight) = self.inflight.remove(key) else {
            return;
        };
        inflight.queue.retain(|queued| queued.op != op);

        match settlement {
            Settlement::Replaced(entry) => {
                // Placeholder keys never carry follow-up operations
                self.confirmations += 1;
                self.replace_placeholder(key, entry);
                return;
            }
            Settlement::Confirmed(entry) => {
                self.confirmations += 1;
                inflight.base = inflight.base.with_entry(entry);
            }
            Settlement::Reverted => {}
        }

        self.cache.restore_slice(key, &inflight.base);
        for queued in &inflight.queue {
            (queued.mutation)(&mut self.cache);
        }

        if let TargetKey::Comment { comment_id, .. } = key {
            let comment = match &inflight.base.entry {
                Some(Entry::Comment(comment)) => Some(comment.clone()),
                _ => None,
            };
            let index = inflight.base.index;
            self.patch_parent_base(key, |post| {
                cache::restore_comment(post, comment_id, comment, index)
            });
        }

        if !inflight.queue.is_empty() {
            self.inflight.insert(key.clone(), inflight);
        }
    }

    fn replace_placeholder(&mut self, key: &TargetKey, entry: Entry) {
        match (key, entry) {
            (TargetKey::Post(placeholder), Entry::Post(post)) => {
                self.cache.apply_post_reconcile(placeholder, post);
            }
            (
                TargetKey::Comment {
                    post_id,
                    comment_id,
                },
                Entry::Comment(comment),
            ) => {
                self.cache
                    .apply_comment_reconcile(post_id, comment_id, comment.clone());
                self.patch_parent_base(key, |post| {
                    cache::reconcile_comment(post, comment_id, comment)
                });
            }
            (key, _) => tracing::error!(key = %key, "Canonical entry does not match its key"),
        }
    }

    /// Keeps a pending post operation's base in step with its resolved comments
    ///
    /// Without this, a failed post delete would bring back the thread as it
    /// was when the delete was issued, placeholders included.
    fn patch_parent_base(&mut self, key: &TargetKey, change: impl FnOnce(&mut Post)) {
        let Some(post_id) = key.post_id() else {
            return;
        };
        if let Some(Inflight {
            base:
                Slice {
                    entry: Some(Entry::Post(post)),
                    ..
                },
            ..
        }) = self.inflight.get_mut(&TargetKey::Post(post_id.to_string()))
        {
            change(post);
        }
    }

    /// Replaces the fetched parts of the cache and replays what is still in flight
    fn install(
        &mut self,
        favorites: Option<Vec<FavoriteEntry>>,
        history: Option<Vec<HistoryEntry>>,
        posts: Option<Vec<Post>>,
    ) {
        let refreshed = |key: &TargetKey| match key {
            TargetKey::Favorite(_) => favorites.is_some(),
            TargetKey::History(_) => history.is_some(),
            TargetKey::Post(_) | TargetKey::Comment { .. } => posts.is_some(),
        };
        let stale: HashSet<TargetKey> = self
            .inflight
            .keys()
            .filter(|key| refreshed(key))
            .cloned()
            .collect();

        let current = self.cache.snapshot();
        self.cache.restore(CollectionState {
            favorites: favorites.unwrap_or(current.favorites),
            history: history.unwrap_or(current.history),
            posts: posts.unwrap_or(current.posts),
        });

        let mut replay = Vec::new();
        for (key, inflight) in self.inflight.iter_mut() {
            if stale.contains(key) {
                inflight.base = self.cache.slice(key);
                replay.extend(
                    inflight
                        .queue
                        .iter()
                        .map(|queued| (queued.op, Arc::clone(&queued.mutation))),
                );
            }
        }
        replay.sort_by_key(|(op, _)| *op);
        for (_, mutation) in replay {
            mutation(&mut self.cache);
        }
    }

    fn apply_author_icon(&mut self, author_id: &str, icon: &str) {
        self.cache.apply_author_icon(author_id, icon);
        for inflight in self.inflight.values_mut() {
            match &mut inflight.base.entry {
                Some(Entry::Post(post)) => post.apply_author_icon(author_id, icon),
                Some(Entry::Comment(comment)) if comment.author_id == author_id => {
                    comment.display_icon = icon.to_string();
                }
                _ => {}
            }
        }
    }

    fn reset(&mut self) {
        self.cache = CollectionCache::new();
        self.inflight.clear();
        self.generation += 1;
    }

    /// Starts a fresh cache unless it already belongs to `user_id`
    fn switch_session(&mut self, user_id: Option<&str>) -> bool {
        if self.session.as_deref() == user_id {
            return false;
        }
        self.reset();
        self.session = user_id.map(str::to_string);
        true
    }
}

/// Outcome of installing fetched collections
enum Install {
    Done,
    /// A confirmation landed while fetching; the fetch may predate it
    Stale,
    /// The session changed while fetching
    Dropped,
}

struct Inner {
    remote: Arc<dyn RemoteAdapter>,
    identity: IdentityStore,
    state: Mutex<EngineState>,
    sequencer: Sequencer,
    timeout: Duration,
    events: broadcast::Sender<CacheEvent>,
    next_op: AtomicU64,
}

impl Inner {
    async fn bounded<T>(&self, call: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Network(format!(
                "no response within {:?}",
                self.timeout
            ))),
        }
    }

    fn emit(&self, key: &TargetKey, phase: Phase) {
        // No subscribers is fine
        let _ = self.events.send(CacheEvent {
            key: key.clone(),
            phase,
        });
    }

    /// Generation and confirmation count a fetch starts from
    fn mark(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.generation, state.confirmations)
    }

    fn install(
        &self,
        (generation, confirmations): (u64, u64),
        force: bool,
        favorites: Option<Vec<FavoriteEntry>>,
        history: Option<Vec<HistoryEntry>>,
        posts: Option<Vec<Post>>,
    ) -> Install {
        let mut state = self.state.lock();
        if state.generation != generation {
            return Install::Dropped;
        }
        if !force && state.confirmations != confirmations {
            return Install::Stale;
        }
        state.install(favorites, history, posts);
        Install::Done
    }

    fn switch_session(&self, user_id: Option<&str>) {
        if self.state.lock().switch_session(user_id) {
            tracing::debug!(user_id = ?user_id, "Collection cache cleared for session change");
        }
    }

    fn reset(&self) {
        self.state.lock().reset();
        tracing::debug!("Collection cache cleared");
    }
}

/// The only writer of the collection cache
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RemoteAdapter>, identity: IdentityStore, timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                remote,
                identity,
                state: Mutex::new(EngineState::default()),
                sequencer: Sequencer::new(),
                timeout,
                events,
                next_op: AtomicU64::new(1),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Runs `f` against the cache while holding it still
    pub fn read<R>(&self, f: impl FnOnce(&CollectionCache) -> R) -> R {
        f(&self.inner.state.lock().cache)
    }

    pub fn snapshot(&self) -> CollectionState {
        self.read(|cache| cache.snapshot())
    }

    pub fn favorites(&self) -> Vec<FavoriteEntry> {
        self.read(|cache| cache.favorites().to_vec())
    }

    pub fn is_favorite(&self, external_id: &str) -> bool {
        self.read(|cache| cache.is_favorite(external_id))
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.read(|cache| cache.history().to_vec())
    }

    pub fn posts(&self) -> Vec<Post> {
        self.read(|cache| cache.posts().to_vec())
    }

    pub fn post(&self, id: &str) -> Option<Post> {
        self.read(|cache| cache.post(id).cloned())
    }

    /// Targets with operations still waiting for the backend
    pub fn pending_targets(&self) -> usize {
        self.inner.state.lock().inflight.len()
    }

    /// Change feed for views; a revert is visible here as soon as it happens
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Replaces the cache with the signed-in user's collections
    ///
    /// Operations still in flight are replayed on top of the fetched state.
    /// A fetch that raced a confirmation is retried, since it may not
    /// include what was just confirmed.
    pub async fn load(&self) -> SyncResult<()> {
        let user = self.require_user()?;
        self.inner.switch_session(Some(user.id.as_str()));
        let remote = &self.inner.remote;

        for attempt in 1..=LOAD_ATTEMPTS {
            let mark = self.inner.mark();
            let (favorites, history, posts) = tokio::try_join!(
                self.inner.bounded(remote.get_favorites(&user.id)),
                self.inner.bounded(remote.get_history(&user.id)),
                self.inner.bounded(remote.list_posts()),
            )?;

            let favorites = unique_favorites(favorites);
            let history = newest_first(history, |h| h.timestamp, HISTORY_LIMIT);
            let posts = newest_first(posts, |p| p.timestamp, POSTS_LIMIT);
            let counts = (favorites.len(), history.len(), posts.len());

            let force = attempt == LOAD_ATTEMPTS;
            match self
                .inner
                .install(mark, force, Some(favorites), Some(history), Some(posts))
            {
                Install::Done => {
                    tracing::info!(
                        user_id = %user.id,
                        adapter = self.inner.remote.name(),
                        favorites = counts.0,
                        history = counts.1,
                        posts = counts.2,
                        "Collections loaded"
                    );
                    return Ok(());
                }
                Install::Stale => {
                    tracing::debug!(user_id = %user.id, attempt, "Fetch raced a confirmation, refetching");
                }
                Install::Dropped => return Ok(()),
            }
        }
        Ok(())
    }

    /// Clears the cache and forgets everything in flight
    pub fn reset(&self) {
        self.inner.reset();
    }

    /// Keeps the cache in step with the identity store
    ///
    /// A new user gets a fresh cache and a load, logout clears the cache, and
    /// an icon change is rewritten onto the user's posts and comments.
    pub fn follow_identity(&self) -> JoinHandle<()> {
        let mut changes = self.inner.identity.subscribe();
        let mut last = changes.borrow_and_update().clone();
        let engine = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let current = changes.borrow_and_update().clone();
                let Some(inner) = engine.upgrade() else {
                    break;
                };

                match (&last, &current) {
                    (Some(before), Some(after)) if before.id == after.id => {
                        if before.display_icon != after.display_icon {
                            inner
                                .state
                                .lock()
                                .apply_author_icon(&after.id, &after.display_icon);
                            tracing::debug!(user_id = %after.id, "Author icon rewritten in cache");
                        }
                    }
                    (_, None) => inner.switch_session(None),
                    (_, Some(after)) => {
                        // Operations issued since the switch already moved
                        // the cache to this session and must survive
                        inner.switch_session(Some(after.id.as_str()));
                        let engine = SyncEngine { inner };
                        if let Err(e) = engine.load().await {
                            tracing::warn!(user_id = %after.id, error = %e, "Initial load failed");
                        }
                    }
                }
                last = current;
            }
        })
    }

    // ------------------------------------------------------------------
    // Optimistic mutations
    // ------------------------------------------------------------------

    /// Flips the movie's membership now; the backend toggles the same way
    pub fn toggle_favorite(&self, movie: &MovieRef) -> SyncResult<PendingOperation<FavoriteToggle>> {
        let user = self.require_user()?;
        let key = TargetKey::Favorite(movie.external_id.clone());

        let local = movie.clone();
        let mutation: Mutation = Arc::new(move |cache: &mut CollectionCache| {
            cache.apply_favorite_toggle(&local);
        });

        let movie = movie.clone();
        Ok(self.launch(
            user.id.clone(),
            key,
            mutation,
            move |remote| async move { remote.toggle_favorite(&user.id, &movie).await },
            |toggle: &FavoriteToggle| {
                Settlement::Confirmed(match toggle.status {
                    FavoriteStatus::Added => Some(Entry::Favorite(toggle.canonical.clone())),
                    FavoriteStatus::Removed => None,
                })
            },
        ))
    }

    pub fn delete_history(&self, id: &str) -> SyncResult<PendingOperation<()>> {
        let user = self.require_user()?;
        reject_unconfirmed(id)?;
        let key = TargetKey::History(id.to_string());

        let local = id.to_string();
        let mutation: Mutation = Arc::new(move |cache: &mut CollectionCache| cache.apply_history_removal(&local));

        let id = id.to_string();
        Ok(self.launch(
            user.id.clone(),
            key,
            mutation,
            move |remote| async move { remote.delete_history(&user.id, &id).await },
            |_: &()| Settlement::Confirmed(None),
        ))
    }

    /// Shows a placeholder post at once; the server's post replaces it
    ///
    /// The placeholder id is available through [`PendingOperation::key`].
    pub fn create_post(&self, draft: PostDraft) -> SyncResult<PendingOperation<Post>> {
        let user = self.require_user()?;
        let rating = draft.validate()?;

        let placeholder = Post {
            id: new_local_id(),
            author_id: user.id.clone(),
            movie_title: draft.movie_title.trim().to_string(),
            content: draft.content.trim().to_string(),
            rating,
            anonymous: draft.anonymous,
            display_icon: draft.display_icon(&user.display_icon),
            timestamp: Utc::now(),
            comments: Vec::new(),
            movie_poster: None,
            movie_year: None,
            movie_plot: None,
        };
        let key = TargetKey::Post(placeholder.id.clone());
        let mutation: Mutation = Arc::new(move |cache: &mut CollectionCache| cache.apply_post_upsert(placeholder.clone()));

        Ok(self.launch(
            user.id.clone(),
            key,
            mutation,
            move |remote| async move { remote.create_post(&user, &draft).await },
            |post: &Post| Settlement::Replaced(Entry::Post(post.clone())),
        ))
    }

    pub fn edit_post(&self, id: &str, patch: PostPatch) -> SyncResult<PendingOperation<Post>> {
        let user = self.require_user()?;
        if patch.is_empty() {
            return Err(SyncError::Validation("nothing to change".to_string()));
        }
        self.require_post(id)?;
        let key = TargetKey::Post(id.to_string());

        let (local_id, local_patch) = (id.to_string(), patch.clone());
        let mutation: Mutation =
            Arc::new(move |cache: &mut CollectionCache| cache.apply_post_edit(&local_id, &local_patch));

        let id = id.to_string();
        Ok(self.launch(
            user.id.clone(),
            key,
            mutation,
            move |remote| async move { remote.update_post(&user.id, &id, &patch).await },
            |post: &Post| Settlement::Confirmed(Some(Entry::Post(post.clone()))),
        ))
    }

    /// Removes the post now; the remote delete waits for pending comment work on it
    pub fn delete_post(&self, id: &str) -> SyncResult<PendingOperation<()>> {
        let user = self.require_user()?;
        self.require_post(id)?;
        let key = TargetKey::Post(id.to_string());

        let local = id.to_string();
        let mutation: Mutation = Arc::new(move |cache: &mut CollectionCache| cache.apply_post_removal(&local));

        let id = id.to_string();
        Ok(self.launch(
            user.id.clone(),
            key,
            mutation,
            move |remote| async move { remote.delete_post(&user.id, &id).await },
            |_: &()| Settlement::Confirmed(None),
        ))
    }

    pub fn add_comment(&self, post_id: &str, draft: CommentDraft) -> SyncResult<PendingOperation<Comment>> {
        let user = self.require_user()?;
        self.require_post(post_id)?;
        draft.validate()?;

        let placeholder = Comment {
            id: new_local_id(),
            author_id: user.id.clone(),
            content: draft.content.trim().to_string(),
            display_icon: user.display_icon.clone(),
            timestamp: Utc::now(),
        };
        let key = TargetKey::comment(post_id, placeholder.id.clone());

        let local_post = post_id.to_string();
        let mutation: Mutation = Arc::new(move |cache: &mut CollectionCache| {
            cache.apply_comment_upsert(&local_post, placeholder.clone())
        });

        let post_id = post_id.to_string();
        Ok(self.launch(
            user.id.clone(),
            key,
            mutation,
            move |remote| async move { remote.add_comment(&user, &post_id, &draft).await },
            |comment: &Comment| Settlement::Replaced(Entry::Comment(comment.clone())),
        ))
    }

    pub fn edit_comment(
        &self,
        post_id: &str,
        comment_id: &str,
        content: &str,
    ) -> SyncResult<PendingOperation<Comment>> {
        let user = self.require_user()?;
        self.require_comment(post_id, comment_id)?;
        let draft = CommentDraft {
            content: content.trim().to_string(),
        };
        draft.validate()?;
        let key = TargetKey::comment(post_id, comment_id);

        let (local_post, local_comment, local_content) =
            (post_id.to_string(), comment_id.to_string(), draft.content.clone());
        let mutation: Mutation = Arc::new(move |cache: &mut CollectionCache| {
            cache.apply_comment_edit(&local_post, &local_comment, &local_content)
        });

        let (post_id, comment_id) = (post_id.to_string(), comment_id.to_string());
        Ok(self.launch(
            user.id.clone(),
            key,
            mutation,
            move |remote| async move {
                remote
                    .update_comment(&user.id, &post_id, &comment_id, &draft.content)
                    .await
            },
            |comment: &Comment| Settlement::Confirmed(Some(Entry::Comment(comment.clone()))),
        ))
    }

    pub fn delete_comment(&self, post_id: &str, comment_id: &str) -> SyncResult<PendingOperation<()>> {
        let user = self.require_user()?;
        self.require_comment(post_id, comment_id)?;
        let key = TargetKey::comment(post_id, comment_id);

        let (local_post, local_comment) = (post_id.to_string(), comment_id.to_string());
        let mutation: Mutation =
            Arc::new(move |cache: &mut CollectionCache| cache.apply_comment_removal(&local_post, &local_comment));

        let (post_id, comment_id) = (post_id.to_string(), comment_id.to_string());
        Ok(self.launch(
            user.id.clone(),
            key,
            mutation,
            move |remote| async move { remote.delete_comment(&user.id, &post_id, &comment_id).await },
            |_: &()| Settlement::Confirmed(None),
        ))
    }

    // ------------------------------------------------------------------
    // Pass-through calls
    // ------------------------------------------------------------------

    /// Asks the recommendation service; signed-in users get their history refreshed
    pub async fn recommend(&self, mood: &str) -> SyncResult<Recommendation> {
        let mood = mood.trim();
        if mood.is_empty() {
            return Err(SyncError::Validation("mood cannot be empty".to_string()));
        }

        let user = self.inner.identity.current();
        let mark = self.inner.mark();
        let recommendation = self
            .inner
            .bounded(self.inner.remote.recommend(mood, user.as_ref().map(|u| u.id.as_str())))
            .await?;

        tracing::info!(
            mood = %mood,
            movies = recommendation.movies.len(),
            "Recommendations received"
        );

        if let Some(user) = user {
            match self.inner.bounded(self.inner.remote.get_history(&user.id)).await {
                Ok(history) => {
                    let history = newest_first(history, |h| h.timestamp, HISTORY_LIMIT);
                    if let Install::Stale = self.inner.install(mark, false, None, Some(history), None) {
                        tracing::debug!(user_id = %user.id, "History refresh raced a confirmation, skipped");
                    }
                }
                Err(e) => tracing::warn!(user_id = %user.id, error = %e, "History refresh failed"),
            }
        }

        Ok(recommendation)
    }

    pub async fn watch_providers(&self, movie_id: &str) -> SyncResult<ProviderSet> {
        Ok(self
            .inner
            .bounded(self.inner.remote.get_watch_providers(movie_id))
            .await?)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn require_user(&self) -> SyncResult<User> {
        self.inner.identity.current().ok_or(SyncError::Unauthenticated)
    }

    fn require_post(&self, id: &str) -> SyncResult<()> {
        reject_unconfirmed(id)?;
        if self.read(|cache| cache.post(id).is_none()) {
            return Err(RemoteError::NotFound(format!("post {} is not loaded", id)).into());
        }
        Ok(())
    }

    fn require_comment(&self, post_id: &str, comment_id: &str) -> SyncResult<()> {
        self.require_post(post_id)?;
        reject_unconfirmed(comment_id)?;
        let present = self.read(|cache| {
            cache
                .post(post_id)
                .and_then(|post| post.comment(comment_id))
                .is_some()
        });
        if !present {
            return Err(RemoteError::NotFound(format!("comment {} is not loaded", comment_id)).into());
        }
        Ok(())
    }

    /// Applies `mutation` now and resolves `call` in the background
    fn launch<T, Call, Fut, Settle>(
        &self,
        owner: String,
        key: TargetKey,
        mutation: Mutation,
        call: Call,
        settle: Settle,
    ) -> PendingOperation<T>
    where
        T: Send + 'static,
        Call: FnOnce(Arc<dyn RemoteAdapter>) -> Fut + Send + 'static,
        Fut: Future<Output = RemoteResult<T>> + Send + 'static,
        Settle: FnOnce(&T) -> Settlement + Send + 'static,
    {
        let op = self.inner.next_op.fetch_add(1, Ordering::Relaxed);

        // Queue position and local change are taken together so issue order
        // and apply order agree
        let (mut ticket, generation) = {
            let mut state = self.inner.state.lock();
            // The identity may have changed before the follower caught up
            if state.switch_session(Some(owner.as_str())) {
                tracing::debug!(user_id = %owner, "Collection cache cleared for session change");
            }
            let ticket = self.inner.sequencer.enqueue(key.clone());
            state.apply(&key, op, mutation);
            (ticket, state.generation)
        };
        tracing::debug!(key = %key, op, "Applied optimistically");
        self.inner.emit(&key, Phase::Applied);

        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            ticket.turn().await;
            let result = inner.bounded(call(Arc::clone(&inner.remote))).await;

            let (settlement, phase) = match &result {
                Ok(value) => (settle(value), Phase::Confirmed),
                Err(_) => (Settlement::Reverted, Phase::Reverted),
            };
            let current = {
                let mut state = inner.state.lock();
                let current = state.generation == generation;
                if current {
                    state.settle(&task_key, op, settlement);
                }
                current
            };
            // Followers start only once this target is settled
            drop(ticket);

            match &result {
                Ok(_) => tracing::info!(
                    key = %task_key,
                    op,
                    adapter = inner.remote.name(),
                    "Confirmed"
                ),
                Err(e) => tracing::warn!(
                    key = %task_key,
                    op,
                    adapter = inner.remote.name(),
                    kind = ?e.kind(),
                    error = %e,
                    "Reverted"
                ),
            }
            if current {
                inner.emit(&task_key, phase);
            }

            result.map_err(SyncError::from)
        });

        PendingOperation::new(key, handle)
    }
}

fn reject_unconfirmed(id: &str) -> SyncResult<()> {
    if is_local_id(id) {
        return Err(SyncError::Unconfirmed(id.to_string()));
    }
    Ok(())
}

/// Collapses duplicate favorites, keeping the first occurrence
fn unique_favorites(favorites: Vec<FavoriteEntry>) -> Vec<FavoriteEntry> {
    let mut seen = HashSet::new();
    favorites
        .into_iter()
        .filter(|f| seen.insert(f.external_id.clone()))
        .collect()
}

fn newest_first<T, K: Ord>(mut items: Vec<T>, by: impl Fn(&T) -> K, limit: usize) -> Vec<T> {
    items.sort_by(|a, b| by(b).cmp(&by(a)));
    items.truncate(limit);
    items
}
