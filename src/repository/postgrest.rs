//! Supabase (PostgREST) backend for both repositories

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use url::Url;

use super::{MealLogRepository, RepositoryError, VitalsRepository, FOOD_LOGS_TABLE, VITALS_TABLE};
use crate::models::{FoodLogEntry, NewFoodLog, NewVitalsRecord, VitalsRecord};

/// PostgreSQL "undefined_table" and PostgREST "table not in schema cache"
const MISSING_TABLE_CODES: [&str; 2] = ["42P01", "PGRST205"];

/// ---------------------------------------------------------------------------
/// PostgREST API Types
/// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
  code: Option<String>,
  message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VitalsRow {
  #[serde(default)]
  id: Option<Value>,
  #[serde(default)]
  user_id: Option<String>,
  systolic: i64,
  diastolic: i64,
  blood_sugar: i64,
  #[serde(deserialize_with = "deserialize_timestamp")]
  timestamp: DateTime<Utc>,
}

impl From<VitalsRow> for VitalsRecord {
  fn from(row: VitalsRow) -> Self {
    Self {
      id: row.id.map(id_to_string),
      user_id: row.user_id,
      systolic: row.systolic,
      diastolic: row.diastolic,
      blood_sugar: row.blood_sugar,
      timestamp: row.timestamp,
    }
  }
}

#[derive(Debug, Deserialize)]
struct FoodLogRow {
  id: Value,
  query: String,
  verdict: String,
  rating: f64,
  #[serde(deserialize_with = "deserialize_timestamp")]
  timestamp: DateTime<Utc>,
}

impl From<FoodLogRow> for FoodLogEntry {
  fn from(row: FoodLogRow) -> Self {
    Self {
      id: id_to_string(row.id),
      query: row.query,
      verdict: row.verdict,
      rating: row.rating,
      timestamp: row.timestamp,
    }
  }
}

/// `timestamptz` columns carry an offset, `timestamp` columns don't; the
/// latter are read as UTC
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Some(dt.with_timezone(&Utc));
  }
  ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
    .iter()
    .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
    .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
  D: Deserializer<'de>,
{
  let raw = String::deserialize(deserializer)?;
  parse_timestamp(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw)))
}

/// Ids may be bigint or uuid depending on how the table was created
fn id_to_string(id: Value) -> String {
  match id {
    Value::String(s) => s,
    other => other.to_string(),
  }
}

/// ---------------------------------------------------------------------------
/// PostgREST Client
/// ---------------------------------------------------------------------------

pub struct PostgrestClient {
  client: Client,
  rest_base: String,
  api_key: String,
  bearer: String,
}

impl PostgrestClient {
  /// Client authorized with the anon key only
  pub fn new(project_url: &Url, anon_key: &str) -> Self {
    Self {
      client: Client::new(),
      rest_base: format!("{}/rest/v1", project_url.as_str().trim_end_matches('/')),
      api_key: anon_key.to_string(),
      bearer: anon_key.to_string(),
    }
  }

  /// Authorize requests as a signed-in user (row-level security applies)
  pub fn with_access_token(mut self, access_token: &str) -> Self {
    self.bearer = access_token.to_string();
    self
  }

  fn table_url(&self, table: &str) -> String {
    format!("{}/{}", self.rest_base, table)
  }

  async fn select<T: DeserializeOwned>(
    &self,
    table: &str,
    owner: Option<&str>,
    limit: usize,
  ) -> Result<Vec<T>, RepositoryError> {
    let mut query = vec![
      ("select", "*".to_string()),
      ("order", "timestamp.desc".to_string()),
      ("limit", limit.to_string()),
    ];
    if let Some(owner) = owner {
      query.push(("user_id", format!("eq.{}", owner)));
    }

    let response = self
      .client
      .get(self.table_url(table))
      .header("apikey", &self.api_key)
      .bearer_auth(&self.bearer)
      .query(&query)
      .send()
      .await?;

    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
      return Err(error_from_response(table, status, &body));
    }

    serde_json::from_str(&body).map_err(|e| RepositoryError::Decode(format!("{}: {}", table, e)))
  }

  async fn insert_row<T: Serialize + Sync>(&self, table: &str, row: &T) -> Result<(), RepositoryError> {
    let response = self
      .client
      .post(self.table_url(table))
      .header("apikey", &self.api_key)
      .header("Prefer", "return=minimal")
      .bearer_auth(&self.bearer)
      .json(&[row])
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(error_from_response(table, status, &body));
    }

    Ok(())
  }
}

fn error_from_response(table: &str, status: StatusCode, body: &str) -> RepositoryError {
  let parsed = serde_json::from_str::<PostgrestErrorBody>(body).ok();
  let code = parsed.as_ref().and_then(|p| p.code.clone());
  let message = parsed
    .and_then(|p| p.message)
    .unwrap_or_else(|| body.to_string());

  if status == StatusCode::NOT_FOUND
    || code
      .as_deref()
      .is_some_and(|c| MISSING_TABLE_CODES.contains(&c))
  {
    return RepositoryError::MissingTable(table.to_string());
  }

  if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
    return RepositoryError::Unauthorized(message);
  }

  RepositoryError::Unavailable(format!("HTTP {}: {}", status, message))
}

#[async_trait]
impl VitalsRepository for PostgrestClient {
  async fn insert(&self, record: &NewVitalsRecord) -> Result<(), RepositoryError> {
    self.insert_row(VITALS_TABLE, record).await
  }

  async fn recent(&self, owner: Option<&str>, limit: usize) -> Result<Vec<VitalsRecord>, RepositoryError> {
    let rows: Vec<VitalsRow> = self.select(VITALS_TABLE, owner, limit).await?;
    Ok(rows.into_iter().map(VitalsRecord::from).collect())
  }
}

#[async_trait]
impl MealLogRepository for PostgrestClient {
  async fn insert(&self, entry: &NewFoodLog) -> Result<(), RepositoryError> {
    self.insert_row(FOOD_LOGS_TABLE, entry).await
  }

  async fn recent(&self, owner: Option<&str>, limit: usize) -> Result<Vec<FoodLogEntry>, RepositoryError> {
    let rows: Vec<FoodLogRow> = self.select(FOOD_LOGS_TABLE, owner, limit).await?;
    Ok(rows.into_iter().map(FoodLogEntry::from).collect())
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
