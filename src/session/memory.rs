use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::SessionStore;
use crate::{entity::SessionData, error::Error};

/// Sessions kept in process memory, lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    map: RwLock<HashMap<String, SessionData>>,
}

impl MemoryStore {
    pub async fn len(&self) -> usize {
        self.map.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.map.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<SessionData>, Error> {
        Ok(self.map.read().await.get(id).cloned())
    }

    async fn set(&self, id: &str, data: SessionData) -> Result<(), Error> {
        self.map.write().await.insert(id.to_string(), data);
        Ok(())
    }

    async fn clear(&self, id: &str) -> Result<(), Error> {
        self.map.write().await.remove(id);
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<usize, Error> {
        let mut map = self.map.write().await;
        let before = map.len();
        map.retain(|_, data| !data.is_expired());
        Ok(before - map.len())
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    #[tokio::test]
    async fn set_get_clear() {
        let store = MemoryStore::default();
        let mut data = SessionData::new(Duration::minutes(5));
        data.user_email = Some("a@b.com".into());

        store.set("one", data.clone()).await.unwrap();
        assert_eq!(store.get("one").await.unwrap(), Some(data));
        assert_eq!(store.get("two").await.unwrap(), None);

        store.clear("one").await.unwrap();
        store.clear("one").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn sweep_drops_only_expired() {
        let store = MemoryStore::default();
        store.set("live", SessionData::new(Duration::minutes(5))).await.unwrap();
        for n in 0..3 {
            store
                .set(&format!("old-{n}"), SessionData::new(Duration::seconds(-1)))
                .await
                .unwrap();
        }

        assert_eq!(store.sweep_expired().await.unwrap(), 3);
        assert_eq!(store.len().await, 1);
        assert!(store.get("live").await.unwrap().is_some());
    }
}
