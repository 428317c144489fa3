use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::fs;

/// Key for the persisted [`crate::guard::rate_limiter::RateLimitState`] record.
pub const LOGIN_RATE_LIMIT_KEY: &str = "login_rate_limit";

/// Key for the one-shot onboarding completion flag.
pub const ONBOARDING_COMPLETED_KEY: &str = "onboarding_completed";

/// Persisted key-value store shared by the guard components.
///
/// Each component owns a distinct key and never touches another component's
/// key, so the store is single-writer-per-key within one running process.
/// Values are JSON strings; callers own the encoding.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// # Errors
    /// Returns an error if the underlying storage cannot be read.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// # Errors
    /// Returns an error if the underlying storage cannot be written.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error.
    ///
    /// # Errors
    /// Returns an error if the underlying storage cannot be written.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// One JSON file per key under a state directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to read {}", path.display()))
            }
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.path_for(key);
        fs::write(&path, value)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to remove {}", path.display()))
            }
        }
    }
}

/// In-memory store for tests and the simulate action.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
