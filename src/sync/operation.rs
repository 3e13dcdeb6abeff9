use tokio::task::JoinHandle;

use crate::{
    cache::TargetKey,
    error::{RemoteError, SyncResult},
};

/// Where an optimistic change stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Applied locally, waiting for the backend
    Applied,
    Confirmed,
    Reverted,
}

/// Published every time the cache changes because of a sync operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub key: TargetKey,
    pub phase: Phase,
}

/// Handle to an operation whose optimistic change is already visible
///
/// Awaiting [`PendingOperation::outcome`] yields the confirmed value or the
/// error that caused the revert. Dropping the handle does not cancel
/// anything: the operation still resolves and the cache is still reconciled.
#[must_use = "the outcome carries the error to surface on revert"]
pub struct PendingOperation<T> {
    key: TargetKey,
    handle: JoinHandle<SyncResult<T>>,
}

impl<T> PendingOperation<T> {
    pub(crate) fn new(key: TargetKey, handle: JoinHandle<SyncResult<T>>) -> Self {
        Self { key, handle }
    }

    /// The target this operation is serialized on
    pub fn key(&self) -> &TargetKey {
        &self.key
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn outcome(self) -> SyncResult<T> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(RemoteError::Network(format!("operation aborted: {}", e)).into()),
        }
    }
}
