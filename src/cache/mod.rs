//! In-memory copy of the signed-in user's collections.
//!
//! Every operation here is pure and total: nothing touches the network and
//! nothing fails. Operating on an id that is not present is a no-op.

use serde::{Deserialize, Serialize};

use crate::models::{Comment, FavoriteEntry, HistoryEntry, MovieRef, Post, PostPatch};

pub mod key;

pub use key::TargetKey;

/// Full contents of the cache; also the snapshot type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionState {
    pub favorites: Vec<FavoriteEntry>,
    pub history: Vec<HistoryEntry>,
    pub posts: Vec<Post>,
}

/// Result of a local favorite toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleResult {
    pub was_favorite: bool,
    pub is_favorite: bool,
}

/// One entry of the cache, as addressed by a [`TargetKey`]
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Favorite(FavoriteEntry),
    History(HistoryEntry),
    Post(Post),
    Comment(Comment),
}

/// The part of the cache owned by one target key, with its position
///
/// `index` is where the entry sat when the slice was taken; it is used to
/// put an entry back in place after it was removed. Slices of absent entries
/// carry `usize::MAX`, so an entry restored through them is appended.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub index: usize,
    pub entry: Option<Entry>,
}

impl Slice {
    pub fn absent() -> Self {
        Self {
            index: usize::MAX,
            entry: None,
        }
    }

    /// Same position, different contents
    pub fn with_entry(&self, entry: Option<Entry>) -> Self {
        Self {
            index: self.index,
            entry,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollectionCache {
    state: CollectionState,
}

impl CollectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn favorites(&self) -> &[FavoriteEntry] {
        &self.state.favorites
    }

    pub fn is_favorite(&self, external_id: &str) -> bool {
        self.state
            .favorites
            .iter()
            .any(|f| f.external_id == external_id)
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.state.history
    }

    pub fn posts(&self) -> &[Post] {
        &self.state.posts
    }

    pub fn post(&self, id: &str) -> Option<&Post> {
        self.state.posts.iter().find(|p| p.id == id)
    }

    // ------------------------------------------------------------------
    // Snapshot / restore
    // ------------------------------------------------------------------

    /// Deep copy of the current state
    pub fn snapshot(&self) -> CollectionState {
        self.state.clone()
    }

    /// Replaces the current state wholesale
    pub fn restore(&mut self, snapshot: CollectionState) {
        self.state = snapshot;
    }

    /// Copies out the part of the state a key addresses
    pub fn slice(&self, key: &TargetKey) -> Slice {
        let found = match key {
            TargetKey::Favorite(id) => position(&self.state.favorites, |f| &f.external_id == id)
                .map(|i| (i, Entry::Favorite(self.state.favorites[i].clone()))),
            TargetKey::History(id) => position(&self.state.history, |h| &h.id == id)
                .map(|i| (i, Entry::History(self.state.history[i].clone()))),
            TargetKey::Post(id) => position(&self.state.posts, |p| &p.id == id)
                .map(|i| (i, Entry::Post(self.state.posts[i].clone()))),
            TargetKey::Comment {
                post_id,
                comment_id,
            } => self.post(post_id).and_then(|post| {
                position(&post.comments, |c| &c.id == comment_id)
                    .map(|i| (i, Entry::Comment(post.comments[i].clone())))
            }),
        };

        match found {
            Some((index, entry)) => Slice {
                index,
                entry: Some(entry),
            },
            None => Slice::absent(),
        }
    }

    /// Puts one key's part of the state back to `slice`, leaving the rest alone
    ///
    /// A post that is still present keeps its current comment thread: comments
    /// are restored through their own keys.
    pub fn restore_slice(&mut self, key: &TargetKey, slice: &Slice) {
        match (key, &slice.entry) {
            (TargetKey::Favorite(id), entry) => {
                let value = match entry {
                    Some(Entry::Favorite(movie)) => Some(movie.clone()),
                    _ => None,
                };
                put_back(&mut self.state.favorites, |f| &f.external_id == id, value, slice.index);
            }
            (TargetKey::History(id), entry) => {
                let value = match entry {
                    Some(Entry::History(h)) => Some(h.clone()),
                    _ => None,
                };
                put_back(&mut self.state.history, |h| &h.id == id, value, slice.index);
            }
            (TargetKey::Post(id), Some(Entry::Post(saved))) => {
                match self.state.posts.iter_mut().find(|p| &p.id == id) {
                    Some(current) => current.overwrite_header(saved),
                    None => {
                        let index = slice.index.min(self.state.posts.len());
                        self.state.posts.insert(index, saved.clone());
                    }
                }
            }
            (TargetKey::Post(id), _) => self.apply_post_removal(id),
            (
                TargetKey::Comment {
                    post_id,
                    comment_id,
                },
                entry,
            ) => {
                let value = match entry {
                    Some(Entry::Comment(c)) => Some(c.clone()),
                    _ => None,
                };
                if let Some(post) = self.state.posts.iter_mut().find(|p| &p.id == post_id) {
                    put_back(&mut post.comments, |c| &c.id == comment_id, value, slice.index);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Removes the movie if present, inserts it otherwise
    pub fn apply_favorite_toggle(&mut self, movie: &MovieRef) -> ToggleResult {
        match position(&self.state.favorites, |f| f.external_id == movie.external_id) {
            Some(index) => {
                self.state.favorites.remove(index);
                ToggleResult {
                    was_favorite: true,
                    is_favorite: false,
                }
            }
            None => {
                self.state.favorites.push(movie.clone());
                ToggleResult {
                    was_favorite: false,
                    is_favorite: true,
                }
            }
        }
    }

    pub fn apply_history_removal(&mut self, id: &str) {
        self.state.history.retain(|h| h.id != id);
    }

    /// Replaces the post with the same id, or adds it as the newest post
    pub fn apply_post_upsert(&mut self, post: Post) {
        match self.state.posts.iter_mut().find(|p| p.id == post.id) {
            Some(existing) => *existing = post,
            None => self.state.posts.insert(0, post),
        }
    }

    pub fn apply_post_edit(&mut self, id: &str, patch: &PostPatch) {
        if let Some(post) = self.state.posts.iter_mut().find(|p| p.id == id) {
            post.apply_patch(patch);
        }
    }

    pub fn apply_post_removal(&mut self, id: &str) {
        self.state.posts.retain(|p| p.id != id);
    }

    /// Swaps an unconfirmed post for the server's version, in place
    ///
    /// Comments already shown locally are kept behind the server's thread.
    pub fn apply_post_reconcile(&mut self, placeholder_id: &str, canonical: Post) {
        if !self.state.posts.iter().any(|p| p.id == placeholder_id) {
            return;
        }
        // A refresh may already have brought the canonical post in
        self.state.posts.retain(|p| p.id != canonical.id);
        let Some(current) = self.state.posts.iter_mut().find(|p| p.id == placeholder_id) else {
            return;
        };
        let local_comments = std::mem::take(&mut current.comments);
        let mut merged = canonical;
        for comment in local_comments {
            if merged.comment(&comment.id).is_none() {
                merged.comments.push(comment);
            }
        }
        *current = merged;
    }

    /// Replaces the comment with the same id, or appends it to the thread
    pub fn apply_comment_upsert(&mut self, post_id: &str, comment: Comment) {
        let Some(post) = self.state.posts.iter_mut().find(|p| p.id == post_id) else {
            return;
        };
        match post.comments.iter_mut().find(|c| c.id == comment.id) {
            Some(existing) => *existing = comment,
            None => post.comments.push(comment),
        }
    }

    pub fn apply_comment_edit(&mut self, post_id: &str, comment_id: &str, content: &str) {
        if let Some(comment) = self
            .state
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .and_then(|p| p.comments.iter_mut().find(|c| c.id == comment_id))
        {
            comment.content = content.to_string();
        }
    }

    pub fn apply_comment_removal(&mut self, post_id: &str, comment_id: &str) {
        if let Some(post) = self.state.posts.iter_mut().find(|p| p.id == post_id) {
            post.comments.retain(|c| c.id != comment_id);
        }
    }

    /// Swaps an unconfirmed comment for the server's version, in place
    pub fn apply_comment_reconcile(&mut self, post_id: &str, placeholder_id: &str, canonical: Comment) {
        if let Some(post) = self.state.posts.iter_mut().find(|p| p.id == post_id) {
            reconcile_comment(post, placeholder_id, canonical);
        }
    }

    /// Rewrites the icon on everything the user authored, except anonymous posts
    pub fn apply_author_icon(&mut self, author_id: &str, icon: &str) {
        for post in &mut self.state.posts {
            post.apply_author_icon(author_id, icon);
        }
    }
}

/// Swaps a placeholder comment for its canonical version inside one post
pub(crate) fn reconcile_comment(post: &mut Post, placeholder_id: &str, canonical: Comment) {
    if !post.comments.iter().any(|c| c.id == placeholder_id) {
        return;
    }
    post.comments.retain(|c| c.id != canonical.id);
    if let Some(comment) = post.comments.iter_mut().find(|c| c.id == placeholder_id) {
        *comment = canonical;
    }
}

/// Sets one comment of a detached post, as [`CollectionCache::restore_slice`] would
pub(crate) fn restore_comment(post: &mut Post, comment_id: &str, value: Option<Comment>, index: usize) {
    put_back(&mut post.comments, |c| c.id == comment_id, value, index);
}

fn position<T>(items: &[T], pred: impl Fn(&T) -> bool) -> Option<usize> {
    items.iter().position(pred)
}

/// Sets the element matching `pred` to `value`: replaced in place when present,
/// removed when `value` is `None`, inserted near `index` when absent
fn put_back<T>(items: &mut Vec<T>, pred: impl Fn(&T) -> bool, value: Option<T>, index: usize) {
    match (position(items, &pred), value) {
        (Some(i), Some(v)) => items[i] = v,
        (Some(i), None) => {
            items.remove(i);
        }
        (None, Some(v)) => {
            let i = index.min(items.len());
            items.insert(i, v);
        }
        (None, None) => {}
    }
}
