use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A logged meal evaluation, as read back from the meal-log repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodLogEntry {
  pub id: String,
  pub query: String,
  pub verdict: String,
  pub rating: f64,
  pub timestamp: DateTime<Utc>,
}

/// For appending a meal evaluation (id assigned by the store)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFoodLog {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub user_id: Option<String>,
  pub query: String,
  pub verdict: String,
  pub rating: f64,
  pub timestamp: DateTime<Utc>,
}
