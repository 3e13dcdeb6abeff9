use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::parse_timestamp;

/// Icon for new users and for anonymous posts
pub const DEFAULT_ICON: &str = "👤";

/// The signed-in user; `id` is the stable identity (the email address)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub display_icon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_icon: DEFAULT_ICON.to_string(),
            created_at: Some(Utc::now()),
        }
    }

    pub fn with_icon(&self, icon: impl Into<String>) -> Self {
        Self {
            display_icon: icon.into(),
            ..self.clone()
        }
    }
}

/// Signup / login response body
#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    #[serde(alias = "id")]
    pub email: String,
    #[serde(default, rename = "profileIcon", alias = "display_icon", alias = "displayIcon")]
    pub profile_icon: Option<String>,
    #[serde(default, rename = "createdAt", alias = "created_at")]
    pub created_at: Option<String>,
}

impl From<ApiUser> for User {
    fn from(api: ApiUser) -> Self {
        User {
            id: api.email,
            display_icon: api
                .profile_icon
                .filter(|icon| !icon.is_empty())
                .unwrap_or_else(|| DEFAULT_ICON.to_string()),
            created_at: api.created_at.as_deref().and_then(parse_timestamp),
        }
    }
}
