use std::path::PathBuf;

use parking_lot::Mutex;

use crate::{
    error::{AuthError, AuthResult},
    models::User,
};

/// Where the active identity survives a restart
#[async_trait::async_trait]
pub trait SessionPersistence: Send + Sync {
    async fn load(&self) -> AuthResult<Option<User>>;

    async fn save(&self, user: &User) -> AuthResult<()>;

    async fn clear(&self) -> AuthResult<()>;
}

/// Keeps the session as one JSON record on disk
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl SessionPersistence for FileSessionStore {
    async fn load(&self) -> AuthResult<Option<User>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::Storage(e.to_string())),
        };

        // A corrupt record is treated as no session rather than a hard failure
        match serde_json::from_str::<User>(&raw) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring unreadable session record"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, user: &User) -> AuthResult<()> {
        let json =
            serde_json::to_string_pretty(user).map_err(|e| AuthError::Storage(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AuthError::Storage(e.to_string()))?;
        }

        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| AuthError::Storage(e.to_string()))
    }

    async fn clear(&self) -> AuthResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Storage(e.to_string())),
        }
    }
}

/// Process-local session, for tests and ephemeral clients
#[derive(Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<User>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(user: User) -> Self {
        Self {
            record: Mutex::new(Some(user)),
        }
    }
}

#[async_trait::async_trait]
impl SessionPersistence for MemorySessionStore {
    async fn load(&self) -> AuthResult<Option<User>> {
        Ok(self.record.lock().clone())
    }

    async fn save(&self, user: &User) -> AuthResult<()> {
        *self.record.lock() = Some(user.clone());
        Ok(())
    }

    async fn clear(&self) -> AuthResult<()> {
        self.record.lock().take();
        Ok(())
    }
}
