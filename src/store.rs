//! Sync cursor persistence.
//!
//! The loop reads the cursor once at startup and writes the new `next_batch`
//! after every dispatched cycle.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cursor store io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cursor store error: {0}")]
    Other(String),
}

/// A durable slot holding one sync cursor.
pub trait CursorStore: Send + Sync {
    /// Returns the stored cursor, or `None` when nothing usable is stored.
    fn read(&self) -> BoxFuture<'_, Result<Option<String>, StoreError>>;

    /// Replaces the stored cursor.
    fn write<'a>(&'a self, cursor: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// Stores the cursor as the whole content of a single file.
///
/// A missing or blank file reads as no cursor. Writes go to a sibling
/// `<name>.tmp` file that is then renamed over the cursor file, so a crash
/// mid-write leaves the previous cursor in place.
#[derive(Clone, Debug)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CursorStore for FileCursorStore {
    fn read(&self) -> BoxFuture<'_, Result<Option<String>, StoreError>> {
        async move {
            match tokio::fs::read_to_string(&self.path).await {
                Ok(text) => Ok(non_blank(&text)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(self.io_error(err)),
            }
        }
        .boxed()
    }

    fn write<'a>(&'a self, cursor: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            let temp = self.temp_path();
            tokio::fs::write(&temp, cursor)
                .await
                .map_err(|err| self.io_error(err))?;
            tokio::fs::rename(&temp, &self.path)
                .await
                .map_err(|err| self.io_error(err))
        }
        .boxed()
    }
}

/// Keeps the cursor in process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursor: RwLock<Option<String>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with `cursor` already stored.
    pub fn with_cursor(cursor: impl Into<String>) -> Self {
        Self {
            cursor: RwLock::new(Some(cursor.into())),
        }
    }

    /// Returns the currently stored cursor.
    pub fn cursor(&self) -> Option<String> {
        self.cursor.read().ok().and_then(|guard| guard.clone())
    }
}

impl CursorStore for MemoryCursorStore {
    fn read(&self) -> BoxFuture<'_, Result<Option<String>, StoreError>> {
        let cursor = self
            .cursor
            .read()
            .map(|guard| guard.as_deref().and_then(non_blank))
            .map_err(|_| StoreError::Other("cursor lock poisoned".to_string()));
        futures_util::future::ready(cursor).boxed()
    }

    fn write<'a>(&'a self, cursor: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        let result = self
            .cursor
            .write()
            .map(|mut guard| *guard = Some(cursor.to_string()))
            .map_err(|_| StoreError::Other("cursor lock poisoned".to_string()));
        futures_util::future::ready(result).boxed()
    }
}

fn non_blank(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
