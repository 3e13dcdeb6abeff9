use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub mod post;
pub mod user;

pub use post::{
    ApiComment, ApiPost, Comment, CommentDraft, Post, PostDraft, PostPatch, Rating,
};
pub use user::{ApiUser, User, DEFAULT_ICON};

/// Rejected input, raised before anything reaches the cache or the backend
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// Snapshot of a catalog item at the time it was saved
///
/// Never re-fetched from the catalog once stored in a collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MovieRef {
    pub external_id: String,
    pub title: String,
    pub poster_path: Option<String>,
    pub release_date: Option<String>,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub vote_average: f64,
}

/// A movie in a user's favorites; membership is keyed by `external_id`
pub type FavoriteEntry = MovieRef;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FavoriteStatus {
    Added,
    Removed,
}

/// Backend answer to a favorite toggle
#[derive(Debug, Clone, PartialEq)]
pub struct FavoriteToggle {
    pub status: FavoriteStatus,
    pub canonical: FavoriteEntry,
}

/// One mood search, newest first for display
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub query: String,
    pub result_count: u32,
    pub timestamp: DateTime<Utc>,
}

/// A recommendation returned for a mood
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedMovie {
    #[serde(flatten)]
    pub movie: MovieRef,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub mood: String,
    pub explanation: Option<String>,
    pub movies: Vec<RecommendedMovie>,
}

/// Streaming providers for one movie, grouped by how it can be watched
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderSet {
    #[serde(default)]
    pub flatrate: Vec<WatchProvider>,
    #[serde(default)]
    pub rent: Vec<WatchProvider>,
    #[serde(default)]
    pub buy: Vec<WatchProvider>,
    #[serde(default)]
    pub link: Option<String>,
}

impl ProviderSet {
    pub fn is_empty(&self) -> bool {
        self.flatrate.is_empty() && self.rent.is_empty() && self.buy.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchProvider {
    #[serde(alias = "provider_id")]
    pub provider_id: u64,
    #[serde(alias = "provider_name")]
    pub provider_name: String,
    #[serde(default, alias = "logo_path")]
    pub logo_path: Option<String>,
}

// ============================================================================
// Wire Types (both backend dialects)
// ============================================================================

/// Movie id as it appears on the wire: TMDB ids are numeric, some stores keep strings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ApiId {
    Number(i64),
    Text(String),
}

impl ApiId {
    /// Numeric ids go back on the wire as numbers so backends compare them equal
    pub fn from_external(external_id: &str) -> Self {
        external_id
            .parse::<i64>()
            .map(ApiId::Number)
            .unwrap_or_else(|_| ApiId::Text(external_id.to_string()))
    }
}

impl Display for ApiId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiId::Number(id) => write!(f, "{}", id),
            ApiId::Text(id) => write!(f, "{}", id),
        }
    }
}

/// Movie payload from either dialect
///
/// Relational rows carry their own row `id` next to `tmdb_id`; document
/// payloads use `id` for the catalog id itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMovie {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ApiId>,
    #[serde(
        default,
        alias = "externalId",
        alias = "external_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub tmdb_id: Option<ApiId>,
    pub title: String,
    #[serde(default, alias = "posterPath")]
    pub poster_path: Option<String>,
    #[serde(default, alias = "releaseDate")]
    pub release_date: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default, alias = "voteAverage")]
    pub vote_average: Option<f64>,
    #[serde(default, alias = "aiReason", skip_serializing)]
    pub ai_reason: Option<String>,
}

impl ApiMovie {
    pub fn external_id(&self) -> Option<String> {
        self.tmdb_id
            .as_ref()
            .or(self.id.as_ref())
            .map(|id| id.to_string())
    }
}

impl TryFrom<ApiMovie> for MovieRef {
    type Error = ValidationError;

    fn try_from(api: ApiMovie) -> Result<Self, Self::Error> {
        let external_id = api
            .external_id()
            .ok_or_else(|| ValidationError(format!("Movie '{}' has no id", api.title)))?;

        Ok(MovieRef {
            external_id,
            title: api.title,
            poster_path: api.poster_path,
            release_date: api.release_date,
            overview: api.overview.unwrap_or_default(),
            vote_average: api.vote_average.unwrap_or_default(),
        })
    }
}

impl From<&MovieRef> for ApiMovie {
    fn from(movie: &MovieRef) -> Self {
        ApiMovie {
            id: Some(ApiId::from_external(&movie.external_id)),
            tmdb_id: None,
            title: movie.title.clone(),
            poster_path: movie.poster_path.clone(),
            release_date: movie.release_date.clone(),
            overview: Some(movie.overview.clone()),
            vote_average: Some(movie.vote_average),
            ai_reason: None,
        }
    }
}

impl TryFrom<ApiMovie> for RecommendedMovie {
    type Error = ValidationError;

    fn try_from(api: ApiMovie) -> Result<Self, Self::Error> {
        let reason = api.ai_reason.clone();
        Ok(RecommendedMovie {
            movie: MovieRef::try_from(api)?,
            reason,
        })
    }
}

/// History row from either dialect
#[derive(Debug, Clone, Deserialize)]
pub struct ApiHistoryEntry {
    #[serde(default)]
    pub id: Option<ApiId>,
    #[serde(alias = "mood")]
    pub query: String,
    #[serde(default, alias = "resultCount")]
    pub result_count: Option<u32>,
    #[serde(default, alias = "created_at", alias = "createdAt")]
    pub timestamp: Option<String>,
}

impl From<ApiHistoryEntry> for HistoryEntry {
    fn from(api: ApiHistoryEntry) -> Self {
        // Some backends return history documents without their ids; those
        // entries get a local id and cannot be deleted remotely
        let id = api
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(new_local_id);

        HistoryEntry {
            id,
            query: api.query,
            result_count: api.result_count.unwrap_or_default(),
            timestamp: api
                .timestamp
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_default(),
        }
    }
}

/// Prefix of ids that exist only locally, before any server has confirmed them
pub const LOCAL_ID_PREFIX: &str = "local-";

pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

pub fn new_local_id() -> String {
    format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4())
}

/// Parses the timestamp formats seen across backends
///
/// RFC 3339 from the relational API, Python `str(datetime)` from the
/// document API (with or without offset).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
