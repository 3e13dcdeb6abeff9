use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{parse_timestamp, ValidationError, DEFAULT_ICON};

/// Star rating of a review, always within 1..=5
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "i64", into = "i64")]
pub struct Rating(u8);

impl Rating {
    pub const MIN: i64 = 1;
    pub const MAX: i64 = 5;

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Rating {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Rating(value as u8))
        } else {
            Err(ValidationError(format!(
                "rating must be between {} and {}, got {}",
                Self::MIN,
                Self::MAX,
                value
            )))
        }
    }
}

impl From<Rating> for i64 {
    fn from(rating: Rating) -> Self {
        rating.0 as i64
    }
}

/// A movie review, owned and editable only by its author
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub movie_title: String,
    pub content: String,
    pub rating: Rating,
    pub anonymous: bool,
    pub display_icon: String,
    pub timestamp: DateTime<Utc>,
    pub comments: Vec<Comment>,
    /// Filled by the backend from the movie catalog
    pub movie_poster: Option<String>,
    pub movie_year: Option<String>,
    pub movie_plot: Option<String>,
}

impl Post {
    pub fn comment(&self, comment_id: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == comment_id)
    }

    /// Copies every field except the comment thread
    pub fn overwrite_header(&mut self, other: &Post) {
        self.id = other.id.clone();
        self.author_id = other.author_id.clone();
        self.movie_title = other.movie_title.clone();
        self.content = other.content.clone();
        self.rating = other.rating;
        self.anonymous = other.anonymous;
        self.display_icon = other.display_icon.clone();
        self.timestamp = other.timestamp;
        self.movie_poster = other.movie_poster.clone();
        self.movie_year = other.movie_year.clone();
        self.movie_plot = other.movie_plot.clone();
    }

    /// Rewrites the author's icon on the post and their comments
    ///
    /// Anonymous posts keep the default icon.
    pub fn apply_author_icon(&mut self, author_id: &str, icon: &str) {
        if self.author_id == author_id && !self.anonymous {
            self.display_icon = icon.to_string();
        }
        for comment in &mut self.comments {
            if comment.author_id == author_id {
                comment.display_icon = icon.to_string();
            }
        }
    }

    /// Applies an edit in place, the same way the backend merges it
    pub fn apply_patch(&mut self, patch: &PostPatch) {
        if let Some(title) = &patch.movie_title {
            self.movie_title = title.clone();
        }
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(rating) = patch.rating {
            self.rating = rating;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub author_id: String,
    pub content: String,
    pub display_icon: String,
    pub timestamp: DateTime<Utc>,
}

/// Input for a new post, validated before any optimistic change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostDraft {
    pub movie_title: String,
    pub content: String,
    pub rating: i64,
    #[serde(default)]
    pub anonymous: bool,
}

impl PostDraft {
    pub fn validate(&self) -> Result<Rating, ValidationError> {
        if self.movie_title.trim().is_empty() {
            return Err(ValidationError("movie title cannot be empty".to_string()));
        }
        if self.content.trim().is_empty() {
            return Err(ValidationError("review content cannot be empty".to_string()));
        }
        Rating::try_from(self.rating)
    }

    /// Icon shown on the post: anonymous posts never reveal the author's icon
    pub fn display_icon(&self, author_icon: &str) -> String {
        if self.anonymous {
            DEFAULT_ICON.to_string()
        } else {
            author_icon.to_string()
        }
    }
}

/// Partial edit of a post; absent fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movie_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
}

impl PostPatch {
    /// Builds a patch from raw input, rejecting out-of-range ratings
    pub fn new(
        movie_title: Option<String>,
        content: Option<String>,
        rating: Option<i64>,
    ) -> Result<Self, ValidationError> {
        let rating = rating.map(Rating::try_from).transpose()?;
        if matches!(&content, Some(c) if c.trim().is_empty()) {
            return Err(ValidationError("review content cannot be empty".to_string()));
        }
        Ok(Self {
            movie_title,
            content,
            rating,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.movie_title.is_none() && self.content.is_none() && self.rating.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommentDraft {
    pub content: String,
}

impl CommentDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.content.trim().is_empty() {
            return Err(ValidationError("comment cannot be empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// Post payload from either dialect
#[derive(Debug, Clone, Deserialize)]
pub struct ApiPost {
    #[serde(default)]
    pub id: Option<super::ApiId>,
    #[serde(alias = "author_id", alias = "authorId", alias = "email")]
    pub author: String,
    #[serde(rename = "movieTitle", alias = "movie_title")]
    pub movie_title: String,
    pub content: String,
    #[serde(default = "default_rating")]
    pub rating: i64,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default, rename = "profileIcon", alias = "display_icon", alias = "displayIcon")]
    pub profile_icon: Option<String>,
    #[serde(default, alias = "created_at", alias = "createdAt")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub comments: Vec<ApiComment>,
    #[serde(default, rename = "moviePoster", alias = "movie_poster")]
    pub movie_poster: Option<String>,
    #[serde(default, rename = "movieYear", alias = "movie_year")]
    pub movie_year: Option<String>,
    #[serde(default, rename = "moviePlot", alias = "movie_plot")]
    pub movie_plot: Option<String>,
}

fn default_rating() -> i64 {
    Rating::MAX
}

impl TryFrom<ApiPost> for Post {
    type Error = ValidationError;

    fn try_from(api: ApiPost) -> Result<Self, Self::Error> {
        let id = api
            .id
            .map(|id| id.to_string())
            .ok_or_else(|| ValidationError(format!("post on '{}' has no id", api.movie_title)))?;
        let rating = Rating::try_from(api.rating)?;
        let comments = api
            .comments
            .into_iter()
            .map(Comment::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Post {
            id,
            author_id: api.author,
            movie_title: api.movie_title,
            content: api.content,
            rating,
            anonymous: api.anonymous,
            display_icon: api.profile_icon.unwrap_or_else(|| DEFAULT_ICON.to_string()),
            timestamp: api
                .timestamp
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_default(),
            comments,
            movie_poster: api.movie_poster,
            movie_year: api.movie_year,
            movie_plot: api.movie_plot,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiComment {
    #[serde(default)]
    pub id: Option<super::ApiId>,
    #[serde(alias = "author_id", alias = "authorId", alias = "email")]
    pub author: String,
    pub content: String,
    #[serde(default, rename = "profileIcon", alias = "display_icon", alias = "displayIcon")]
    pub profile_icon: Option<String>,
    #[serde(default, alias = "created_at", alias = "createdAt")]
    pub timestamp: Option<String>,
}

impl TryFrom<ApiComment> for Comment {
    type Error = ValidationError;

    fn try_from(api: ApiComment) -> Result<Self, Self::Error> {
        let id = api
            .id
            .map(|id| id.to_string())
            .ok_or_else(|| ValidationError("comment has no id".to_string()))?;

        Ok(Comment {
            id,
            author_id: api.author,
            content: api.content,
            display_icon: api.profile_icon.unwrap_or_else(|| DEFAULT_ICON.to_string()),
            timestamp: api
                .timestamp
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_default(),
        })
    }
}
