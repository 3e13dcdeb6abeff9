//! Who is signed in, independent of the active backend.
//!
//! The store is process-wide state with explicit lifecycle rules: on startup
//! call [`IdentityStore::restore_session`], on logout the persisted record is
//! cleared. Interested components follow changes through
//! [`IdentityStore::subscribe`] instead of ad hoc storage reads.

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    error::{AuthError, AuthResult},
    models::User,
    remote::IdentityBackend,
};

pub mod session;

pub use session::{FileSessionStore, MemorySessionStore, SessionPersistence};

#[derive(Clone)]
pub struct IdentityStore {
    inner: Arc<IdentityInner>,
}

struct IdentityInner {
    backend: Arc<dyn IdentityBackend>,
    persistence: Arc<dyn SessionPersistence>,
    current: watch::Sender<Option<User>>,
}

impl IdentityStore {
    pub fn new(backend: Arc<dyn IdentityBackend>, persistence: Arc<dyn SessionPersistence>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            inner: Arc::new(IdentityInner {
                backend,
                persistence,
                current,
            }),
        }
    }

    /// The active user, if any
    pub fn current(&self) -> Option<User> {
        self.inner.current.borrow().clone()
    }

    /// Receives every identity change: login, logout, icon update
    pub fn subscribe(&self) -> watch::Receiver<Option<User>> {
        self.inner.current.subscribe()
    }

    /// Rebuilds the session from the persisted record at process start
    ///
    /// Backends that verify sessions get an existence check; when the account
    /// is gone the stale record is dropped. An unreachable backend keeps the
    /// local session.
    pub async fn restore_session(&self) -> AuthResult<Option<User>> {
        let Some(user) = self.inner.persistence.load().await? else {
            return Ok(None);
        };

        if self.inner.backend.verifies_sessions() {
            match self.inner.backend.user_exists(&user.id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(user_id = %user.id, "Persisted session refers to a removed account");
                    self.inner.persistence.clear().await?;
                    self.inner.current.send_replace(None);
                    return Ok(None);
                }
                Err(AuthError::Network(e)) => {
                    tracing::warn!(user_id = %user.id, error = %e, "Could not verify session, keeping it");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(user_id = %user.id, "Session restored");
        self.inner.current.send_replace(Some(user.clone()));
        Ok(Some(user))
    }

    pub async fn signup(&self, id: &str, secret: &str) -> AuthResult<User> {
        let user = self.inner.backend.signup(id, secret).await?;
        self.activate(user).await
    }

    pub async fn login(&self, id: &str, secret: &str) -> AuthResult<User> {
        let user = self.inner.backend.login(id, secret).await?;
        self.activate(user).await
    }

    /// Ends the session; never needs the network
    pub async fn logout(&self) {
        let previous = self.inner.current.send_replace(None);
        if let Err(e) = self.inner.persistence.clear().await {
            tracing::warn!(error = %e, "Failed to clear persisted session");
        }
        if let Some(user) = previous {
            tracing::info!(user_id = %user.id, "Logged out");
        }
    }

    /// Changes the user's icon once the backend has confirmed it
    ///
    /// Not optimistic: the persisted identity and subscribers only see the new
    /// icon after the write went through.
    pub async fn update_profile_icon(&self, icon: &str) -> AuthResult<User> {
        let user = self.current().ok_or(AuthError::Unauthenticated)?;
        if icon.trim().is_empty() {
            return Err(AuthError::Validation("Profile icon required".to_string()));
        }

        self.inner.backend.update_profile_icon(&user.id, icon).await?;

        let updated = user.with_icon(icon);
        self.inner.persistence.save(&updated).await?;
        self.inner.current.send_replace(Some(updated.clone()));

        tracing::info!(user_id = %updated.id, icon = %icon, "Profile icon updated");
        Ok(updated)
    }

    async fn activate(&self, user: User) -> AuthResult<User> {
        self.inner.persistence.save(&user).await?;
        self.inner.current.send_replace(Some(user.clone()));
        tracing::info!(user_id = %user.id, "Signed in");
        Ok(user)
    }
}
