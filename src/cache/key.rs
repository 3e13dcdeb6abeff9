use std::fmt::Display;

/// Identity of the logical resource an operation targets
///
/// Operations on the same key are serialized; see [`TargetKey::must_follow`]
/// for the relation between a post and its comments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetKey {
    Favorite(String),
    History(String),
    Post(String),
    Comment { post_id: String, comment_id: String },
}

impl TargetKey {
    pub fn comment(post_id: impl Into<String>, comment_id: impl Into<String>) -> Self {
        TargetKey::Comment {
            post_id: post_id.into(),
            comment_id: comment_id.into(),
        }
    }

    /// Post the key belongs to, for post and comment keys
    pub fn post_id(&self) -> Option<&str> {
        match self {
            TargetKey::Post(id) => Some(id),
            TargetKey::Comment { post_id, .. } => Some(post_id),
            _ => None,
        }
    }

    /// Whether an operation on `self` has to wait for queued operations on `other`
    ///
    /// Same key always; a post waits for every comment on it and a comment
    /// waits for its post.
    pub fn must_follow(&self, other: &TargetKey) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (TargetKey::Post(post), TargetKey::Comment { post_id, .. })
            | (TargetKey::Comment { post_id, .. }, TargetKey::Post(post)) => post == post_id,
            _ => false,
        }
    }
}

impl Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKey::Favorite(id) => write!(f, "fav:{}", id),
            TargetKey::History(id) => write!(f, "history:{}", id),
            TargetKey::Post(id) => write!(f, "post:{}", id),
            TargetKey::Comment {
                post_id,
                comment_id,
            } => write!(f, "comment:{}/{}", post_id, comment_id),
        }
    }
}
