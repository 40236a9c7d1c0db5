//! Embedded SQLite backend for both repositories (single-device mode)

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use super::{MealLogRepository, RepositoryError, VitalsRepository, FOOD_LOGS_TABLE, VITALS_TABLE};
use crate::models::{FoodLogEntry, NewFoodLog, NewVitalsRecord, VitalsRecord};

pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }
}

#[derive(Debug, sqlx::FromRow)]
struct VitalsRow {
  id: i64,
  user_id: Option<String>,
  systolic: i64,
  diastolic: i64,
  blood_sugar: i64,
  timestamp: DateTime<Utc>,
}

impl From<VitalsRow> for VitalsRecord {
  fn from(row: VitalsRow) -> Self {
    Self {
      id: Some(row.id.to_string()),
      user_id: row.user_id,
      systolic: row.systolic,
      diastolic: row.diastolic,
      blood_sugar: row.blood_sugar,
      timestamp: row.timestamp,
    }
  }
}

#[derive(Debug, sqlx::FromRow)]
struct FoodLogRow {
  id: i64,
  query: String,
  verdict: String,
  rating: f64,
  timestamp: DateTime<Utc>,
}

impl From<FoodLogRow> for FoodLogEntry {
  fn from(row: FoodLogRow) -> Self {
    Self {
      id: row.id.to_string(),
      query: row.query,
      verdict: row.verdict,
      rating: row.rating,
      timestamp: row.timestamp,
    }
  }
}

/// Fixed-width UTC text so `ORDER BY timestamp` sorts chronologically
fn format_timestamp(at: &DateTime<Utc>) -> String {
  at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn map_sqlx_error(table: &str, e: sqlx::Error) -> RepositoryError {
  match &e {
    sqlx::Error::Database(db) if db.message().contains("no such table") => {
      RepositoryError::MissingTable(table.to_string())
    }
    sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
      RepositoryError::Decode(e.to_string())
    }
    _ => RepositoryError::Unavailable(e.to_string()),
  }
}

#[async_trait]
impl VitalsRepository for SqliteStore {
  async fn insert(&self, record: &NewVitalsRecord) -> Result<(), RepositoryError> {
    sqlx::query(
      r#"
      INSERT INTO vitals (user_id, systolic, diastolic, blood_sugar, timestamp)
      VALUES (?1, ?2, ?3, ?4, ?5)
      "#,
    )
    .bind(&record.user_id)
    .bind(record.systolic)
    .bind(record.diastolic)
    .bind(record.blood_sugar)
    .bind(format_timestamp(&record.timestamp))
    .execute(&self.pool)
    .await
    .map_err(|e| map_sqlx_error(VITALS_TABLE, e))?;

    Ok(())
  }

  async fn recent(&self, owner: Option<&str>, limit: usize) -> Result<Vec<VitalsRecord>, RepositoryError> {
    let rows: Vec<VitalsRow> = sqlx::query_as(
      r#"
      SELECT id, user_id, systolic, diastolic, blood_sugar, timestamp
      FROM vitals
      WHERE (?1 IS NULL OR user_id = ?1)
      ORDER BY timestamp DESC, id DESC
      LIMIT ?2
      "#,
    )
    .bind(owner)
    .bind(limit as i64)
    .fetch_all(&self.pool)
    .await
    .map_err(|e| map_sqlx_error(VITALS_TABLE, e))?;

    Ok(rows.into_iter().map(VitalsRecord::from).collect())
  }
}

#[async_trait]
impl MealLogRepository for SqliteStore {
  async fn insert(&self, entry: &NewFoodLog) -> Result<(), RepositoryError> {
    sqlx::query(
      r#"
      INSERT INTO food_logs (user_id, query, verdict, rating, timestamp)
      VALUES (?1, ?2, ?3, ?4, ?5)
      "#,
    )
    .bind(&entry.user_id)
    .bind(&entry.query)
    .bind(&entry.verdict)
    .bind(entry.rating)
    .bind(format_timestamp(&entry.timestamp))
    .execute(&self.pool)
    .await
    .map_err(|e| map_sqlx_error(FOOD_LOGS_TABLE, e))?;

    Ok(())
  }

  async fn recent(&self, owner: Option<&str>, limit: usize) -> Result<Vec<FoodLogEntry>, RepositoryError> {
    let rows: Vec<FoodLogRow> = sqlx::query_as(
      r#"
      SELECT id, query, verdict, CAST(rating AS REAL) AS rating, timestamp
      FROM food_logs
      WHERE (?1 IS NULL OR user_id = ?1)
      ORDER BY timestamp DESC, id DESC
      LIMIT ?2
      "#,
    )
    .bind(owner)
    .bind(limit as i64)
    .fetch_all(&self.pool)
    .await
    .map_err(|e| map_sqlx_error(FOOD_LOGS_TABLE, e))?;

    Ok(rows.into_iter().map(FoodLogEntry::from).collect())
  }
}
