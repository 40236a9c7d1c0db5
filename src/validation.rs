//! Required-field gate in front of Save and Analyze
//!
//! The only rule is "all three readings entered". Plausibility of the values
//! is left to the analysis service's status badges.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{MetricField, MetricsSnapshot, NewVitalsRecord, Reading};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Please enter {}", join_fields(.missing))]
pub struct ValidationError {
  pub missing: Vec<MetricField>,
}

fn join_fields(fields: &[MetricField]) -> String {
  fields
    .iter()
    .map(|f| f.as_str())
    .collect::<Vec<_>>()
    .join(", ")
}

/// Metrics that passed the gate. Only this type reaches the analysis service
/// or becomes a repository record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedMetrics {
  pub systolic: i64,
  pub diastolic: i64,
  pub blood_sugar: i64,
}

impl ValidatedMetrics {
  /// Snapshot committed at `at`
  pub fn snapshot_at(&self, at: DateTime<Utc>) -> MetricsSnapshot {
    MetricsSnapshot {
      id: None,
      systolic: Reading::Value(self.systolic),
      diastolic: Reading::Value(self.diastolic),
      blood_sugar: Reading::Value(self.blood_sugar),
      timestamp: at,
    }
  }

  pub fn to_record(&self, owner: Option<&str>, at: DateTime<Utc>) -> NewVitalsRecord {
    NewVitalsRecord {
      user_id: owner.map(String::from),
      systolic: self.systolic,
      diastolic: self.diastolic,
      blood_sugar: self.blood_sugar,
      timestamp: at,
    }
  }
}

pub fn validate(snapshot: &MetricsSnapshot) -> Result<ValidatedMetrics, ValidationError> {
  match (
    snapshot.systolic.value(),
    snapshot.diastolic.value(),
    snapshot.blood_sugar.value(),
  ) {
    (Some(systolic), Some(diastolic), Some(blood_sugar)) => Ok(ValidatedMetrics {
      systolic,
      diastolic,
      blood_sugar,
    }),
    _ => Err(ValidationError {
      missing: snapshot.missing_fields(),
    }),
  }
}
