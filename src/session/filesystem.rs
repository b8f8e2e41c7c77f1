use std::{io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::fs;

use super::SessionStore;
use crate::{entity::SessionData, error::Error};

/// One JSON file per session under a directory, survives restarts.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, id: &str) -> Result<PathBuf, Error> {
        // ids become file names
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(Error::Session(format!("invalid session id {id:?}")));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn get(&self, id: &str) -> Result<Option<SessionData>, Error> {
        let path = self.path(id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, id: &str, data: SessionData) -> Result<(), Error> {
        let path = self.path(id)?;
        fs::create_dir_all(&self.dir).await?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&data)?).await?;
        fs::rename(&tmp, &path).await?;
        debug!("session written: {}", path.display());
        Ok(())
    }

    async fn clear(&self, id: &str) -> Result<(), Error> {
        let path = self.path(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn sweep_expired(&self) -> Result<usize, Error> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let expired = match fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<SessionData>(&bytes) {
                    Ok(data) => data.is_expired(),
                    Err(err) => {
                        warn!("dropping unreadable session {}: {err}", path.display());
                        true
                    }
                },
                // cleared concurrently
                Err(err) if err.kind() == ErrorKind::NotFound => false,
                Err(err) => return Err(err.into()),
            };
            if expired {
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    #[tokio::test]
    async fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = SessionData::new(Duration::minutes(5));
        data.oauth_state = Some("state".into());

        FileStore::new(dir.path().join("sessions"))
            .set("abc-123", data.clone())
            .await
            .unwrap();

        let reopened = FileStore::new(dir.path().join("sessions"));
        assert_eq!(reopened.get("abc-123").await.unwrap(), Some(data));

        reopened.clear("abc-123").await.unwrap();
        assert_eq!(reopened.get("abc-123").await.unwrap(), None);
        reopened.clear("abc-123").await.unwrap();
    }

    #[tokio::test]
    async fn sweep_removes_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(store.sweep_expired().await.unwrap(), 0);

        store.set("live", SessionData::new(Duration::minutes(5))).await.unwrap();
        store.set("old", SessionData::new(Duration::seconds(-1))).await.unwrap();
        std::fs::write(dir.path().join("garbage.json"), b"{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        assert_eq!(store.sweep_expired().await.unwrap(), 2);
        assert!(store.get("live").await.unwrap().is_some());
        assert_eq!(store.get("old").await.unwrap(), None);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn sweep_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("never-created"));
        assert_eq!(store.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.get("").await.is_err());
    }
}
