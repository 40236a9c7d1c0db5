use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// ---------------------------------------------------------------------------
/// Reading: a single vital-sign value that may not have been entered yet
/// ---------------------------------------------------------------------------

/// `Empty` is distinct from zero. It serializes as `""`, the way an untouched
/// form field looks, and is never turned into a number before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reading {
  #[default]
  Empty,
  Value(i64),
}

impl Reading {
  pub fn value(self) -> Option<i64> {
    match self {
      Reading::Empty => None,
      Reading::Value(v) => Some(v),
    }
  }

  pub fn is_empty(self) -> bool {
    matches!(self, Reading::Empty)
  }
}

impl From<i64> for Reading {
  fn from(v: i64) -> Self {
    Reading::Value(v)
  }
}

impl From<Option<i64>> for Reading {
  fn from(v: Option<i64>) -> Self {
    v.map_or(Reading::Empty, Reading::Value)
  }
}

impl fmt::Display for Reading {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Reading::Empty => write!(f, "-"),
      Reading::Value(v) => write!(f, "{}", v),
    }
  }
}

impl Serialize for Reading {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    match self {
      Reading::Empty => serializer.serialize_str(""),
      Reading::Value(v) => serializer.serialize_i64(*v),
    }
  }
}

struct ReadingVisitor;

impl<'de> Visitor<'de> for ReadingVisitor {
  type Value = Reading;

  fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.write_str("a whole number or an empty string")
  }

  fn visit_i64<E: de::Error>(self, v: i64) -> Result<Reading, E> {
    Ok(Reading::Value(v))
  }

  fn visit_u64<E: de::Error>(self, v: u64) -> Result<Reading, E> {
    i64::try_from(v)
      .map(Reading::Value)
      .map_err(|_| E::custom(format!("reading out of range: {}", v)))
  }

  fn visit_f64<E: de::Error>(self, v: f64) -> Result<Reading, E> {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
      Ok(Reading::Value(v as i64))
    } else {
      Err(E::custom(format!("reading must be a whole number, got {}", v)))
    }
  }

  fn visit_str<E: de::Error>(self, v: &str) -> Result<Reading, E> {
    if v.is_empty() {
      Ok(Reading::Empty)
    } else {
      Err(E::invalid_value(de::Unexpected::Str(v), &self))
    }
  }

  fn visit_unit<E: de::Error>(self) -> Result<Reading, E> {
    Ok(Reading::Empty)
  }

  fn visit_none<E: de::Error>(self) -> Result<Reading, E> {
    Ok(Reading::Empty)
  }
}

impl<'de> Deserialize<'de> for Reading {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    deserializer.deserialize_any(ReadingVisitor)
  }
}

/// ---------------------------------------------------------------------------
/// Metric fields
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
  Systolic,
  Diastolic,
  BloodSugar,
}

impl MetricField {
  pub fn as_str(&self) -> &'static str {
    match self {
      MetricField::Systolic => "systolic",
      MetricField::Diastolic => "diastolic",
      MetricField::BloodSugar => "blood sugar",
    }
  }
}

impl fmt::Display for MetricField {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// ---------------------------------------------------------------------------
/// Metrics Snapshot
/// ---------------------------------------------------------------------------

pub const DEFAULT_SYSTOLIC: i64 = 120;
pub const DEFAULT_DIASTOLIC: i64 = 80;
pub const DEFAULT_BLOOD_SUGAR: i64 = 90;

/// One point-in-time vitals reading. Field names follow the cache file format
/// (`bloodSugar`), not the remote column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default)]
  pub systolic: Reading,
  #[serde(default)]
  pub diastolic: Reading,
  #[serde(default)]
  pub blood_sugar: Reading,
  pub timestamp: DateTime<Utc>,
}

impl MetricsSnapshot {
  pub fn new(
    systolic: impl Into<Reading>,
    diastolic: impl Into<Reading>,
    blood_sugar: impl Into<Reading>,
  ) -> Self {
    Self {
      id: None,
      systolic: systolic.into(),
      diastolic: diastolic.into(),
      blood_sugar: blood_sugar.into(),
      timestamp: Utc::now(),
    }
  }

  /// A snapshot with nothing entered yet
  pub fn blank() -> Self {
    Self::new(Reading::Empty, Reading::Empty, Reading::Empty)
  }

  pub fn reading(&self, field: MetricField) -> Reading {
    match field {
      MetricField::Systolic => self.systolic,
      MetricField::Diastolic => self.diastolic,
      MetricField::BloodSugar => self.blood_sugar,
    }
  }

  /// Fields still holding the empty sentinel, in display order
  pub fn missing_fields(&self) -> Vec<MetricField> {
    [MetricField::Systolic, MetricField::Diastolic, MetricField::BloodSugar]
      .into_iter()
      .filter(|field| self.reading(*field).is_empty())
      .collect()
  }
}

impl Default for MetricsSnapshot {
  fn default() -> Self {
    Self::new(DEFAULT_SYSTOLIC, DEFAULT_DIASTOLIC, DEFAULT_BLOOD_SUGAR)
  }
}
