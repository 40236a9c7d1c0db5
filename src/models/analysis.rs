use serde::{Deserialize, Serialize};

/// Traffic-light color for a status badge. Closed set: anything else coming back
/// from the analysis service is a contract violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeColor {
  Green,
  Yellow,
  Red,
}

impl BadgeColor {
  pub const ALL: [BadgeColor; 3] = [BadgeColor::Green, BadgeColor::Yellow, BadgeColor::Red];

  pub fn as_str(&self) -> &'static str {
    match self {
      BadgeColor::Green => "green",
      BadgeColor::Yellow => "yellow",
      BadgeColor::Red => "red",
    }
  }
}

impl std::fmt::Display for BadgeColor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusBadge {
  pub label: String,
  pub color: BadgeColor,
  pub description: String,
}

/// Meal evaluation. `rating` is always within [0, 10] once it leaves the
/// contract check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodAnalysis {
  #[serde(default)]
  pub pros: Vec<String>,
  #[serde(default)]
  pub cons: Vec<String>,
  pub verdict: String,
  pub rating: f64,
}

/// Structured coaching output for one snapshot (and optionally one meal).
/// Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
  pub overall_summary: String,
  pub bp_status: StatusBadge,
  pub sugar_status: StatusBadge,
  pub diet_recommendations: Vec<String>,
  pub lifestyle_tips: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub food_analysis: Option<FoodAnalysis>,
}
