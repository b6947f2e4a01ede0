use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::fs;
use tokio::time::interval;
use tracing::{debug, error, info};

/// How often the background sweep looks for expired artifacts.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Filesystem store for the TTL-bounded temporary artifacts: processed
/// uploads the provider fetches by URL, and generated results the widget
/// displays. Keys are relative paths like `uploads/{id}.jpg`.
#[derive(Clone, Debug)]
pub struct LocalFileStorage {
    base_dir: PathBuf,
    base_url: String,
}

impl LocalFileStorage {
    pub fn new(base_dir: PathBuf, base_url: String) -> Self {
        Self {
            base_dir,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve_path(key);
        match fs::metadata(path).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes an artifact. A file that is already gone is not an error,
    /// so concurrent sweeps and failure cleanup never race each other.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve_path(key);
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn get_public_url(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        format!("{}/{}", self.base_url, key)
    }

    pub fn upload_key(id: &str) -> String {
        format!("uploads/{id}.jpg")
    }

    pub fn result_key(id: &str) -> String {
        format!("results/{id}.jpg")
    }

    pub fn resolve_path(&self, key: &str) -> PathBuf {
        let normalized = key.trim_start_matches('/');
        self.base_dir.join(Path::new(normalized))
    }

    /// Deletes every stored file whose modification age reaches
    /// `max_age`. Best-effort: unreadable entries are skipped, missing
    /// files are fine. Returns the number of files removed.
    pub async fn sweep_expired(&self, max_age: Duration) -> Result<usize> {
        let mut removed = 0;
        let mut top = match fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = top.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                removed += sweep_dir(&path, max_age).await?;
            } else {
                removed += sweep_file(&path, max_age).await?;
            }
        }
        Ok(removed)
    }
}

async fn sweep_dir(dir: &Path, max_age: Duration) -> Result<usize> {
    let mut removed = 0;
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() {
            removed += sweep_file(&path, max_age).await?;
        }
    }
    Ok(removed)
}

async fn sweep_file(path: &Path, max_age: Duration) -> Result<usize> {
    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(_) => return Ok(0),
    };
    let age = metadata
        .modified()
        .ok()
        .and_then(|modified| modified.elapsed().ok());
    let Some(age) = age else {
        return Ok(0);
    };
    if age < max_age {
        return Ok(0);
    }
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "removed expired artifact");
            Ok(1)
        }
        // Another sweep pass (or failure cleanup) got there first.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(err) => {
            error!(path = %path.display(), error = %err, "failed to remove expired artifact");
            Ok(0)
        }
    }
}

/// Background task that enforces the artifact TTL.
pub fn spawn_sweeper(storage: Arc<LocalFileStorage>, ttl: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            match storage.sweep_expired(ttl).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "swept expired artifacts"),
                Err(err) => error!(error = %err, "artifact sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(dir: &tempfile::TempDir) -> LocalFileStorage {
        LocalFileStorage::new(
            dir.path().to_path_buf(),
            "http://localhost:8787/tmp".to_string(),
        )
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage(&dir);
        let key = LocalFileStorage::upload_key("abc123");

        storage.put(&key, b"jpeg bytes").await.expect("put");
        assert!(storage.exists(&key).await.expect("exists"));
        assert_eq!(
            storage.get(&key).await.expect("get"),
            Some(b"jpeg bytes".to_vec())
        );
        assert_eq!(storage.get("uploads/missing.jpg").await.expect("get"), None);
    }

    #[tokio::test]
    async fn public_url_joins_base_and_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage(&dir);
        assert_eq!(
            storage.get_public_url(&LocalFileStorage::result_key("abc")),
            "http://localhost:8787/tmp/results/abc.jpg"
        );
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage(&dir);
        let key = LocalFileStorage::result_key("gone");

        storage.put(&key, b"x").await.expect("put");
        storage.delete(&key).await.expect("first delete");
        storage.delete(&key).await.expect("second delete");
        assert!(!storage.exists(&key).await.expect("exists"));
    }

    #[tokio::test]
    async fn sweep_removes_aged_files_and_is_repeatable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage(&dir);
        storage
            .put(&LocalFileStorage::upload_key("a"), b"x")
            .await
            .expect("put");
        storage
            .put(&LocalFileStorage::result_key("b"), b"y")
            .await
            .expect("put");

        // TTL of zero makes every stored file expired.
        let removed = storage.sweep_expired(Duration::ZERO).await.expect("sweep");
        assert_eq!(removed, 2);
        assert!(!storage
            .exists(&LocalFileStorage::upload_key("a"))
            .await
            .expect("exists"));

        let removed = storage.sweep_expired(Duration::ZERO).await.expect("sweep");
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn sweep_leaves_fresh_files_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = storage(&dir);
        let key = LocalFileStorage::upload_key("fresh");
        storage.put(&key, b"x").await.expect("put");

        let removed = storage
            .sweep_expired(Duration::from_secs(3600))
            .await
            .expect("sweep");
        assert_eq!(removed, 0);
        assert!(storage.exists(&key).await.expect("exists"));
    }

    #[tokio::test]
    async fn sweep_of_missing_base_dir_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("never-created");
        let storage = LocalFileStorage::new(missing, "http://localhost/tmp".to_string());
        assert_eq!(
            storage.sweep_expired(Duration::ZERO).await.expect("sweep"),
            0
        );
    }
}
