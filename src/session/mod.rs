//! Server-side sessions keyed by an opaque id carried in a signed cookie.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::task::JoinHandle;

use crate::{
    config::{Config, SessionType},
    entity::SessionData,
    error::Error,
};

mod cookies;
mod filesystem;
mod memory;

pub use cookies::{
    clear_cookie, new_session_id, session_cookie, verify_session_id, SESSION_COOKIE,
};
pub use filesystem::FileStore;
pub use memory::MemoryStore;

/// Storage for session records. Any backend works as long as it is keyed by
/// the session id.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn get(&self, id: &str) -> Result<Option<SessionData>, Error>;

    async fn set(&self, id: &str, data: SessionData) -> Result<(), Error>;

    /// Removing an unknown id is not an error.
    async fn clear(&self, id: &str) -> Result<(), Error>;

    /// Deletes every expired record and returns how many went.
    async fn sweep_expired(&self) -> Result<usize, Error>;
}

/// Backend selected by `SESSION_TYPE`.
pub fn open_store(config: &Config) -> Arc<dyn SessionStore> {
    match config.session_type {
        SessionType::Memory => Arc::new(MemoryStore::default()),
        SessionType::Filesystem => Arc::new(FileStore::new(config.session_dir.clone())),
    }
}

/// How often [`spawn_sweeper`] runs when started from `main`.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Calls [`SessionStore::sweep_expired`] every `period` until the task is aborted.
pub fn spawn_sweeper(store: Arc<dyn SessionStore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(period);
        loop {
            ticks.tick().await;
            match store.sweep_expired().await {
                Ok(0) => {}
                Ok(removed) => debug!("swept {removed} expired sessions"),
                Err(err) => warn!("session sweep failed: {err}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweeper_runs_in_background() {
        let store = Arc::new(MemoryStore::default());
        store
            .set("old", SessionData::new(time::Duration::seconds(-1)))
            .await
            .unwrap();

        let sweeper = spawn_sweeper(store.clone(), Duration::from_millis(10));
        for _ in 0..50 {
            if store.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sweeper.abort();

        assert!(store.is_empty().await);
    }
}
