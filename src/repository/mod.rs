//! Remote repository seams
//!
//! Both repositories are append-only from this client: insert and
//! most-recent-first reads, optionally scoped to an owner (signed-in user id).
//! `None` as owner means single-tenant mode and no filtering.

pub mod postgrest;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{FoodLogEntry, NewFoodLog, NewVitalsRecord, VitalsRecord};

pub use postgrest::PostgrestClient;
pub use sqlite::SqliteStore;

/// Capacity of both history windows
pub const HISTORY_LIMIT: usize = 10;

pub const VITALS_TABLE: &str = "vitals";
pub const FOOD_LOGS_TABLE: &str = "food_logs";

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
  #[error("Remote store unavailable: {0}")]
  Unavailable(String),

  #[error("Table not found: {0}")]
  MissingTable(String),

  #[error("Not authorized: {0}")]
  Unauthorized(String),

  #[error("Unexpected response: {0}")]
  Decode(String),
}

impl RepositoryError {
  /// The backing table/schema does not exist (fresh project, wrong database)
  pub fn is_missing_store(&self) -> bool {
    matches!(self, RepositoryError::MissingTable(_))
  }
}

impl From<reqwest::Error> for RepositoryError {
  fn from(e: reqwest::Error) -> Self {
    RepositoryError::Unavailable(e.to_string())
  }
}

/// ---------------------------------------------------------------------------
/// Repository traits
/// ---------------------------------------------------------------------------

#[async_trait]
pub trait VitalsRepository: Send + Sync {
  async fn insert(&self, record: &NewVitalsRecord) -> Result<(), RepositoryError>;

  /// Up to `limit` readings, newest first
  async fn recent(&self, owner: Option<&str>, limit: usize) -> Result<Vec<VitalsRecord>, RepositoryError>;

  async fn latest(&self, owner: Option<&str>) -> Result<Option<VitalsRecord>, RepositoryError> {
    Ok(self.recent(owner, 1).await?.into_iter().next())
  }
}

#[async_trait]
pub trait MealLogRepository: Send + Sync {
  async fn insert(&self, entry: &NewFoodLog) -> Result<(), RepositoryError>;

  /// Up to `limit` entries, newest first
  async fn recent(&self, owner: Option<&str>, limit: usize) -> Result<Vec<FoodLogEntry>, RepositoryError>;
}
