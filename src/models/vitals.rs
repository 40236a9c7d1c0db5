use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::{MetricsSnapshot, Reading};

/// A stored vitals row, as read back from the vitals repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsRecord {
  pub id: Option<String>,
  pub user_id: Option<String>,
  pub systolic: i64,
  pub diastolic: i64,
  pub blood_sugar: i64,
  pub timestamp: DateTime<Utc>,
}

impl From<VitalsRecord> for MetricsSnapshot {
  fn from(record: VitalsRecord) -> Self {
    Self {
      id: record.id,
      systolic: Reading::Value(record.systolic),
      diastolic: Reading::Value(record.diastolic),
      blood_sugar: Reading::Value(record.blood_sugar),
      timestamp: record.timestamp,
    }
  }
}

/// For inserting new vitals rows (without id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVitalsRecord {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub user_id: Option<String>,
  pub systolic: i64,
  pub diastolic: i64,
  pub blood_sugar: i64,
  pub timestamp: DateTime<Utc>,
}
