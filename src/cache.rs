//! Single-slot local persistence
//!
//! `JsonFileSlot` holds one serde value in one file. The snapshot cache (the
//! fallback used when the remote store is down) and the auth session both
//! live in one of these. Reads and writes are synchronous.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::models::MetricsSnapshot;

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("Cache I/O failed for {path}: {message}")]
  Io { path: String, message: String },

  #[error("Cache contents unreadable: {0}")]
  Corrupt(String),
}

impl CacheError {
  fn io(path: &Path, e: std::io::Error) -> Self {
    CacheError::Io {
      path: path.display().to_string(),
      message: e.to_string(),
    }
  }
}

/// ---------------------------------------------------------------------------
/// JSON file slot
/// ---------------------------------------------------------------------------

pub struct JsonFileSlot<T> {
  path: PathBuf,
  _value: PhantomData<fn() -> T>,
}

impl<T> JsonFileSlot<T>
where
  T: Serialize + DeserializeOwned,
{
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      _value: PhantomData,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn load(&self) -> Result<Option<T>, CacheError> {
    let raw = match fs::read_to_string(&self.path) {
      Ok(raw) => raw,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(CacheError::io(&self.path, e)),
    };

    if raw.trim().is_empty() {
      return Ok(None);
    }

    serde_json::from_str(&raw)
      .map(Some)
      .map_err(|e| CacheError::Corrupt(e.to_string()))
  }

  /// Write to a sibling temp file, then rename over the slot
  pub fn store(&self, value: &T) -> Result<(), CacheError> {
    if let Some(parent) = self.path.parent() {
      if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
      }
    }

    let json = serde_json::to_string_pretty(value).map_err(|e| CacheError::Corrupt(e.to_string()))?;
    let tmp = self.path.with_extension("tmp");
    fs::write(&tmp, json).map_err(|e| CacheError::io(&tmp, e))?;
    fs::rename(&tmp, &self.path).map_err(|e| CacheError::io(&self.path, e))?;
    Ok(())
  }

  pub fn clear(&self) -> Result<(), CacheError> {
    match fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(CacheError::io(&self.path, e)),
    }
  }
}

/// ---------------------------------------------------------------------------
/// Snapshot cache
/// ---------------------------------------------------------------------------

/// Last-known metrics on this device
pub trait SnapshotCache: Send + Sync {
  fn get(&self) -> Result<Option<MetricsSnapshot>, CacheError>;
  fn set(&self, snapshot: &MetricsSnapshot) -> Result<(), CacheError>;
}

impl SnapshotCache for JsonFileSlot<MetricsSnapshot> {
  fn get(&self) -> Result<Option<MetricsSnapshot>, CacheError> {
    self.load()
  }

  fn set(&self, snapshot: &MetricsSnapshot) -> Result<(), CacheError> {
    self.store(snapshot)
  }
}

/// Process-local cache, for ephemeral sessions
#[derive(Default)]
pub struct MemorySnapshotCache {
  slot: Mutex<Option<MetricsSnapshot>>,
}

impl MemorySnapshotCache {
  pub fn new() -> Self {
    Self::default()
  }
}

impl SnapshotCache for MemorySnapshotCache {
  fn get(&self) -> Result<Option<MetricsSnapshot>, CacheError> {
    Ok(self.slot.lock().map_err(|e| CacheError::Corrupt(e.to_string()))?.clone())
  }

  fn set(&self, snapshot: &MetricsSnapshot) -> Result<(), CacheError> {
    *self.slot.lock().map_err(|e| CacheError::Corrupt(e.to_string()))? = Some(snapshot.clone());
    Ok(())
  }
}
