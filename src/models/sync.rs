use serde::{Deserialize, Serialize};

/// Which store is authoritative for the metrics currently on display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
  /// Remote store reachable and authoritative
  #[default]
  Cloud,
  /// Remote store failing; the local snapshot is authoritative
  Local,
  /// Neither the remote store nor the local cache holds the latest save
  Error,
}

impl std::fmt::Display for SyncStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Cloud => write!(f, "cloud"),
      Self::Local => write!(f, "local"),
      Self::Error => write!(f, "error"),
    }
  }
}
