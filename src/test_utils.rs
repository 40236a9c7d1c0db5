//! Test utilities and helpers for unit testing
//!
//! This module provides common test infrastructure including:
//! - Database setup/teardown
//! - Analysis payload fixtures
//! - In-memory repositories, cache, analyst, and auth provider that record
//!   what was asked of them

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Notify};
use url::Url;

use crate::auth::{AuthError, AuthProvider, AuthUser, Session, SignUpOutcome, SignUpRequest};
use crate::cache::{CacheError, MemorySnapshotCache, SnapshotCache};
use crate::config::GeminiConfig;
use crate::llm::{AnalysisError, AnalysisService};
use crate::models::{AnalysisResult, FoodLogEntry, MetricsSnapshot, NewFoodLog, NewVitalsRecord, VitalsRecord};
use crate::repository::{MealLogRepository, RepositoryError, VitalsRepository};
use crate::validation::ValidatedMetrics;

/// ---------------------------------------------------------------------------
/// Database Test Utilities
/// ---------------------------------------------------------------------------

/// Create an in-memory SQLite database for testing
/// Runs all migrations and returns a ready-to-use pool
///
/// Uses max_connections(1) to prevent multiple pool connections from creating
/// isolated in-memory databases, which would cause intermittent test failures
pub async fn setup_test_db() -> SqlitePool {
  let pool = sqlx::sqlite::SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("Failed to create in-memory database");

  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .expect("Failed to run migrations");

  pool
}

/// Close a test database pool
pub async fn teardown_test_db(pool: SqlitePool) {
  pool.close().await;
}

/// ---------------------------------------------------------------------------
/// Fixtures
/// ---------------------------------------------------------------------------

pub fn datetime_minutes_ago(minutes: i64) -> DateTime<Utc> {
  Utc::now() - Duration::minutes(minutes)
}

pub fn vitals_record(
  owner: Option<&str>,
  systolic: i64,
  diastolic: i64,
  blood_sugar: i64,
  minutes_ago: i64,
) -> VitalsRecord {
  VitalsRecord {
    id: None,
    user_id: owner.map(String::from),
    systolic,
    diastolic,
    blood_sugar,
    timestamp: datetime_minutes_ago(minutes_ago),
  }
}

/// A well-formed service payload; includes `foodAnalysis` when a rating is given
pub fn analysis_payload(food_rating: Option<f64>) -> Value {
  let mut payload = json!({
    "overallSummary": "Your readings are mostly in a healthy range.",
    "bpStatus": {
      "label": "Normal",
      "color": "green",
      "description": "Blood pressure is within the normal range."
    },
    "sugarStatus": {
      "label": "Slightly Elevated",
      "color": "yellow",
      "description": "Blood sugar is a little above the fasting target."
    },
    "dietRecommendations": ["Favor whole grains", "Add a portion of leafy greens"],
    "lifestyleTips": ["Take a 20 minute walk after meals"]
  });

  if let Some(rating) = food_rating {
    payload["foodAnalysis"] = json!({
      "pros": ["Satisfying"],
      "cons": ["High in added sugar"],
      "verdict": "Fine as an occasional treat",
      "rating": rating
    });
  }

  payload
}

pub fn analysis_result(food_rating: Option<f64>) -> AnalysisResult {
  serde_json::from_value(analysis_payload(food_rating)).expect("fixture payload decodes")
}

/// Wrap a payload the way `generateContent` returns it
pub fn gemini_envelope(payload: &Value) -> Value {
  json!({
    "candidates": [{
      "content": { "role": "model", "parts": [{ "text": payload.to_string() }] },
      "finishReason": "STOP"
    }],
    "usageMetadata": { "promptTokenCount": 210, "candidatesTokenCount": 180 }
  })
}

pub fn mock_gemini_config(api_base: &str) -> GeminiConfig {
  GeminiConfig {
    api_key: Some("test-key".to_string()),
    model: "gemini-test".to_string(),
    api_base: Url::parse(api_base).expect("valid mock server url"),
  }
}

pub fn test_session(user_id: &str) -> Session {
  Session {
    access_token: format!("token-{}", user_id),
    refresh_token: format!("refresh-{}", user_id),
    expires_at: Utc::now() + Duration::hours(1),
    user: AuthUser {
      id: user_id.to_string(),
      email: Some(format!("{}@example.com", user_id)),
      display_name: None,
    },
  }
}

/// ---------------------------------------------------------------------------
/// Event log
/// ---------------------------------------------------------------------------

/// Shared, ordered record of collaborator calls ("cache.set", "vitals.insert", ...)
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
  pub fn push(&self, event: &str) {
    self.0.lock().unwrap().push(event.to_string());
  }

  pub fn events(&self) -> Vec<String> {
    self.0.lock().unwrap().clone()
  }
}

/// ---------------------------------------------------------------------------
/// In-memory repositories
/// ---------------------------------------------------------------------------

fn owned_by(user_id: Option<&str>, owner: Option<&str>) -> bool {
  owner.is_none() || user_id == owner
}

pub struct MemoryVitals {
  records: Mutex<Vec<VitalsRecord>>,
  insert_failure: Mutex<Option<RepositoryError>>,
  read_failure: Mutex<Option<RepositoryError>>,
  insert_gate: Mutex<Option<Arc<Notify>>>,
  read_gate: Mutex<Option<Arc<Notify>>>,
  next_id: AtomicUsize,
  events: EventLog,
}

impl MemoryVitals {
  pub fn new(events: EventLog) -> Self {
    Self {
      records: Mutex::new(Vec::new()),
      insert_failure: Mutex::new(None),
      read_failure: Mutex::new(None),
      insert_gate: Mutex::new(None),
      read_gate: Mutex::new(None),
      next_id: AtomicUsize::new(1),
      events,
    }
  }

  pub fn seed(&self, records: Vec<VitalsRecord>) {
    let mut stored = self.records.lock().unwrap();
    for mut record in records {
      record.id = Some(self.next_id.fetch_add(1, Ordering::SeqCst).to_string());
      stored.push(record);
    }
  }

  pub fn fail_inserts(&self, failure: Option<RepositoryError>) {
    *self.insert_failure.lock().unwrap() = failure;
  }

  pub fn fail_reads(&self, failure: Option<RepositoryError>) {
    *self.read_failure.lock().unwrap() = failure;
  }

  pub fn records(&self) -> Vec<VitalsRecord> {
    self.records.lock().unwrap().clone()
  }

  /// The next insert parks until `gate` is notified, then applies the
  /// failure toggle as it stands at that moment
  pub fn gate_next_insert(&self, gate: Arc<Notify>) {
    *self.insert_gate.lock().unwrap() = Some(gate);
  }

  /// The next read takes its rows immediately but returns them only once
  /// `gate` is notified
  pub fn gate_next_read(&self, gate: Arc<Notify>) {
    *self.read_gate.lock().unwrap() = Some(gate);
  }
}

#[async_trait]
impl VitalsRepository for MemoryVitals {
  async fn insert(&self, record: &NewVitalsRecord) -> Result<(), RepositoryError> {
    self.events.push("vitals.insert");
    let gate = self.insert_gate.lock().unwrap().take();
    if let Some(gate) = gate {
      gate.notified().await;
    }
    if let Some(err) = self.insert_failure.lock().unwrap().clone() {
      return Err(err);
    }

    self.records.lock().unwrap().push(VitalsRecord {
      id: Some(self.next_id.fetch_add(1, Ordering::SeqCst).to_string()),
      user_id: record.user_id.clone(),
      systolic: record.systolic,
      diastolic: record.diastolic,
      blood_sugar: record.blood_sugar,
      timestamp: record.timestamp,
    });
    Ok(())
  }

  async fn recent(&self, owner: Option<&str>, limit: usize) -> Result<Vec<VitalsRecord>, RepositoryError> {
    self.events.push("vitals.recent");
    if let Some(err) = self.read_failure.lock().unwrap().clone() {
      return Err(err);
    }

    let mut records: Vec<VitalsRecord> = self
      .records
      .lock()
      .unwrap()
      .iter()
      .filter(|r| owned_by(r.user_id.as_deref(), owner))
      .cloned()
      .collect();
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    records.truncate(limit);

    let gate = self.read_gate.lock().unwrap().take();
    if let Some(gate) = gate {
      gate.notified().await;
    }
    Ok(records)
  }
}

pub struct MemoryMeals {
  entries: Mutex<Vec<(Option<String>, FoodLogEntry)>>,
  insert_failure: Mutex<Option<RepositoryError>>,
  read_failure: Mutex<Option<RepositoryError>>,
  events: EventLog,
}

impl MemoryMeals {
  pub fn new(events: EventLog) -> Self {
    Self {
      entries: Mutex::new(Vec::new()),
      insert_failure: Mutex::new(None),
      read_failure: Mutex::new(None),
      events,
    }
  }

  pub fn fail_inserts(&self, failure: Option<RepositoryError>) {
    *self.insert_failure.lock().unwrap() = failure;
  }

  pub fn fail_reads(&self, failure: Option<RepositoryError>) {
    *self.read_failure.lock().unwrap() = failure;
  }

  pub fn entries(&self) -> Vec<FoodLogEntry> {
    self.entries.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
  }
}

#[async_trait]
impl MealLogRepository for MemoryMeals {
  async fn insert(&self, entry: &NewFoodLog) -> Result<(), RepositoryError> {
    self.events.push("meals.insert");
    if let Some(err) = self.insert_failure.lock().unwrap().clone() {
      return Err(err);
    }

    let mut entries = self.entries.lock().unwrap();
    let id = (entries.len() + 1).to_string();
    entries.push((
      entry.user_id.clone(),
      FoodLogEntry {
        id,
        query: entry.query.clone(),
        verdict: entry.verdict.clone(),
        rating: entry.rating,
        timestamp: entry.timestamp,
      },
    ));
    Ok(())
  }

  async fn recent(&self, owner: Option<&str>, limit: usize) -> Result<Vec<FoodLogEntry>, RepositoryError> {
    self.events.push("meals.recent");
    if let Some(err) = self.read_failure.lock().unwrap().clone() {
      return Err(err);
    }

    let mut entries: Vec<FoodLogEntry> = self
      .entries
      .lock()
      .unwrap()
      .iter()
      .filter(|(user_id, _)| owned_by(user_id.as_deref(), owner))
      .map(|(_, e)| e.clone())
      .collect();
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries.truncate(limit);
    Ok(entries)
  }
}

/// ---------------------------------------------------------------------------
/// Recording cache
/// ---------------------------------------------------------------------------

pub struct RecordingCache {
  inner: MemorySnapshotCache,
  writes: AtomicUsize,
  fail_writes: Mutex<bool>,
  events: EventLog,
}

impl RecordingCache {
  pub fn new(events: EventLog) -> Self {
    Self {
      inner: MemorySnapshotCache::new(),
      writes: AtomicUsize::new(0),
      fail_writes: Mutex::new(false),
      events,
    }
  }

  /// Put a snapshot in place without counting it as a write
  pub fn preload(&self, snapshot: MetricsSnapshot) {
    self.inner.set(&snapshot).unwrap();
  }

  pub fn fail_writes(&self, fail: bool) {
    *self.fail_writes.lock().unwrap() = fail;
  }

  pub fn write_count(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }

  pub fn snapshot(&self) -> Option<MetricsSnapshot> {
    self.inner.get().unwrap()
  }
}

impl SnapshotCache for RecordingCache {
  fn get(&self) -> Result<Option<MetricsSnapshot>, CacheError> {
    self.events.push("cache.get");
    self.inner.get()
  }

  fn set(&self, snapshot: &MetricsSnapshot) -> Result<(), CacheError> {
    self.events.push("cache.set");
    self.writes.fetch_add(1, Ordering::SeqCst);
    if *self.fail_writes.lock().unwrap() {
      return Err(CacheError::Io {
        path: "memory".into(),
        message: "disk full".into(),
      });
    }
    self.inner.set(snapshot)
  }
}

/// ---------------------------------------------------------------------------
/// Scripted analyst
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AnalystCall {
  pub metrics: ValidatedMetrics,
  pub meal_query: Option<String>,
}

struct ScriptedReply {
  gate: Option<Arc<Notify>>,
  result: Result<AnalysisResult, AnalysisError>,
}

/// Replies in scripted order; once the script runs out, answers with
/// `analysis_result`, including a food analysis when a meal was given
pub struct ScriptedAnalyst {
  script: Mutex<VecDeque<ScriptedReply>>,
  calls: Mutex<Vec<AnalystCall>>,
  events: EventLog,
}

impl ScriptedAnalyst {
  pub fn new(events: EventLog) -> Self {
    Self {
      script: Mutex::new(VecDeque::new()),
      calls: Mutex::new(Vec::new()),
      events,
    }
  }

  pub fn push_ok(&self, result: AnalysisResult) {
    self.push(None, Ok(result));
  }

  pub fn push_err(&self, err: AnalysisError) {
    self.push(None, Err(err));
  }

  /// Reply only after `gate` is notified
  pub fn push_gated(&self, gate: Arc<Notify>, result: AnalysisResult) {
    self.push(Some(gate), Ok(result));
  }

  fn push(&self, gate: Option<Arc<Notify>>, result: Result<AnalysisResult, AnalysisError>) {
    self.script.lock().unwrap().push_back(ScriptedReply { gate, result });
  }

  pub fn calls(&self) -> Vec<AnalystCall> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl AnalysisService for ScriptedAnalyst {
  async fn analyze(
    &self,
    metrics: &ValidatedMetrics,
    meal_query: Option<&str>,
  ) -> Result<AnalysisResult, AnalysisError> {
    self.events.push("analyst.analyze");
    self.calls.lock().unwrap().push(AnalystCall {
      metrics: *metrics,
      meal_query: meal_query.map(String::from),
    });

    let reply = self.script.lock().unwrap().pop_front();
    match reply {
      Some(ScriptedReply { gate, result }) => {
        if let Some(gate) = gate {
          gate.notified().await;
        }
        result
      }
      None => Ok(analysis_result(meal_query.map(|_| 7.0))),
    }
  }
}

/// ---------------------------------------------------------------------------
/// Fake auth provider
/// ---------------------------------------------------------------------------

/// Accepts any credentials; the email's local part becomes the user id
pub struct FakeAuth {
  session: watch::Sender<Option<Session>>,
}

impl FakeAuth {
  pub fn signed_out() -> Self {
    let (session, _) = watch::channel(None);
    Self { session }
  }

  pub fn signed_in(user_id: &str) -> Self {
    let (session, _) = watch::channel(Some(test_session(user_id)));
    Self { session }
  }
}

#[async_trait]
impl AuthProvider for FakeAuth {
  async fn current_session(&self) -> Result<Option<Session>, AuthError> {
    Ok(self.session.borrow().clone())
  }

  fn subscribe(&self) -> watch::Receiver<Option<Session>> {
    self.session.subscribe()
  }

  async fn sign_in(&self, email: &str, _password: &str) -> Result<Session, AuthError> {
    let user_id = email.split('@').next().unwrap_or(email);
    let session = test_session(user_id);
    self.session.send_replace(Some(session.clone()));
    Ok(session)
  }

  async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, AuthError> {
    request.validate()?;
    Ok(SignUpOutcome::ConfirmationRequired)
  }

  async fn sign_out(&self) -> Result<(), AuthError> {
    self.session.send_replace(None);
    Ok(())
  }
}
