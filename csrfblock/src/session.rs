//! Session store adapter
//!
//! The middleware does not manage sessions; it reads and writes a single key
//! in whatever session backend the host application already runs. The host's
//! session layer inserts a [`Session`] handle into request extensions, and
//! this crate talks to it through the [`SessionStore`] trait.
//!
//! Backend failures are the adapter's concern: an implementation that cannot
//! reach its backend should log the problem and behave as if the key were
//! absent.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Key-value access to an externally owned session.
///
/// The middleware uses exactly one key (the configured `session_key`); the
/// backend owns the session lifetime and its per-key atomicity.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: String);

    /// Delete the value stored under `key`.
    async fn remove(&self, key: &str);
}

/// Cloneable per-request session handle.
///
/// Insert one into request extensions from the host's session middleware,
/// before the CSRF layer runs:
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use axum::{extract::Request, middleware::Next, response::Response};
/// use csrfblock::{MemoryStore, Session};
///
/// async fn attach_session(mut request: Request, next: Next) -> Response {
///     let session = Session::new(Arc::new(MemoryStore::default()));
///     request.extensions_mut().insert(session);
///     next.run(request).await
/// }
/// ```
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn SessionStore>,
}

impl Session {
    /// Wrap a store implementation in a request-attachable handle.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Read the value stored under `key`, if any.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.store.get(key).await
    }

    /// Store `value` under `key`.
    pub async fn set(&self, key: &str, value: String) {
        self.store.set(key, value).await;
    }

    /// Delete the value stored under `key`.
    pub async fn remove(&self, key: &str) {
        self.store.remove(key).await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("store", &"dyn SessionStore")
            .finish()
    }
}

/// In-memory [`SessionStore`] for tests and single-process demos.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    async fn set(&self, key: &str, value: String) {
        self.values.lock().insert(key.to_string(), value);
    }

    async fn remove(&self, key: &str) {
        self.values.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let session = Session::new(Arc::new(MemoryStore::default()));

        assert_eq!(session.get("csrfblock.token").await, None);

        session
            .set("csrfblock.token", "deadbeef".to_string())
            .await;
        assert_eq!(
            session.get("csrfblock.token").await,
            Some("deadbeef".to_string())
        );

        session.remove("csrfblock.token").await;
        assert_eq!(session.get("csrfblock.token").await, None);
    }

    #[tokio::test]
    async fn test_clones_share_the_store() {
        let session = Session::new(Arc::new(MemoryStore::default()));
        let other = session.clone();

        session.set("k", "v".to_string()).await;
        assert_eq!(other.get("k").await, Some("v".to_string()));
    }
}
