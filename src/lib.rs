//! Optimistic sync core of the MovieGuru client.
//!
//! Keeps a local copy of the signed-in user's collections (favorites, search
//! history, reviews and their comments) consistent with one of several
//! backends, applying every change locally first and rolling it back if the
//! backend rejects it.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod models;
pub mod remote;
pub mod sync;

pub use cache::{CollectionCache, CollectionState, TargetKey};
pub use error::{AuthError, RemoteError, SyncError};
pub use identity::IdentityStore;
pub use sync::{CacheEvent, PendingOperation, Phase, SyncEngine};
