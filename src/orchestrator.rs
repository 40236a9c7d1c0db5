//! Sync & analysis orchestrator
//!
//! Owns the displayed metrics, sync status, analysis, and both history
//! windows. Every state change goes through one of the operations below;
//! consumers only ever see clones of `OrchestratorState` (or a `watch`
//! receiver that yields them).
//!
//! Each operation class draws a ticket when it starts. A completion whose
//! ticket is no longer the newest for its class leaves state untouched and
//! reports `OrchestratorError::Superseded`.

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::SnapshotCache;
use crate::llm::{AnalysisError, AnalysisService};
use crate::models::{AnalysisResult, FoodAnalysis, FoodLogEntry, MetricsSnapshot, NewFoodLog, SyncStatus};
use crate::repository::{MealLogRepository, VitalsRepository, HISTORY_LIMIT};
use crate::validation::{validate, ValidatedMetrics, ValidationError};

/// ---------------------------------------------------------------------------
/// Operations and errors
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
  Fetch,
  Save,
  Analyze,
  History,
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Operation::Fetch => "fetch",
      Operation::Save => "save",
      Operation::Analyze => "analyze",
      Operation::History => "history",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error("Coach error: {0}")]
  Analysis(#[from] AnalysisError),

  #[error("Superseded by a newer {0} request")]
  Superseded(Operation),
}

/// ---------------------------------------------------------------------------
/// Owned state
/// ---------------------------------------------------------------------------

/// Number of running operations per class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InFlight {
  pub fetch: usize,
  pub save: usize,
  pub analyze: usize,
  pub history: usize,
}

impl InFlight {
  pub fn is_busy(&self, op: Operation) -> bool {
    self.count(op) > 0
  }

  fn count(&self, op: Operation) -> usize {
    match op {
      Operation::Fetch => self.fetch,
      Operation::Save => self.save,
      Operation::Analyze => self.analyze,
      Operation::History => self.history,
    }
  }

  fn slot(&mut self, op: Operation) -> &mut usize {
    match op {
      Operation::Fetch => &mut self.fetch,
      Operation::Save => &mut self.save,
      Operation::Analyze => &mut self.analyze,
      Operation::History => &mut self.history,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorState {
  pub metrics: MetricsSnapshot,
  pub sync_status: SyncStatus,
  /// User-visible failure message, cleared by the next successful analysis
  pub error: Option<String>,
  pub analysis: Option<AnalysisResult>,
  pub history: Vec<MetricsSnapshot>,
  pub food_history: Vec<FoodLogEntry>,
  pub in_flight: InFlight,
}

impl Default for OrchestratorState {
  fn default() -> Self {
    Self {
      metrics: MetricsSnapshot::default(),
      sync_status: SyncStatus::Cloud,
      error: None,
      analysis: None,
      history: Vec::new(),
      food_history: Vec::new(),
      in_flight: InFlight::default(),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
  pub sync_status: SyncStatus,
  /// `None` when the follow-up analysis failed (see `OrchestratorState::error`)
  pub analysis: Option<AnalysisResult>,
}

/// ---------------------------------------------------------------------------
/// Tickets
/// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tickets {
  fetch: AtomicU64,
  save: AtomicU64,
  analyze: AtomicU64,
  history: AtomicU64,
}

impl Tickets {
  fn counter(&self, op: Operation) -> &AtomicU64 {
    match op {
      Operation::Fetch => &self.fetch,
      Operation::Save => &self.save,
      Operation::Analyze => &self.analyze,
      Operation::History => &self.history,
    }
  }

  fn issue(&self, op: Operation) -> u64 {
    self.counter(op).fetch_add(1, Ordering::SeqCst) + 1
  }

  fn is_current(&self, op: Operation, ticket: u64) -> bool {
    self.counter(op).load(Ordering::SeqCst) == ticket
  }
}

/// Counts an operation as in flight until dropped
struct InFlightGuard<'a> {
  state: &'a watch::Sender<OrchestratorState>,
  op: Operation,
}

impl<'a> InFlightGuard<'a> {
  fn start(state: &'a watch::Sender<OrchestratorState>, op: Operation) -> Self {
    state.send_modify(|s| *s.in_flight.slot(op) += 1);
    Self { state, op }
  }
}

impl Drop for InFlightGuard<'_> {
  fn drop(&mut self) {
    let op = self.op;
    self.state.send_modify(|s| {
      let slot = s.in_flight.slot(op);
      *slot = slot.saturating_sub(1);
    });
  }
}

/// ---------------------------------------------------------------------------
/// Orchestrator
/// ---------------------------------------------------------------------------

pub struct Orchestrator {
  vitals: Arc<dyn VitalsRepository>,
  meals: Arc<dyn MealLogRepository>,
  analyst: Arc<dyn AnalysisService>,
  cache: Arc<dyn SnapshotCache>,
  owner: Option<String>,
  state: watch::Sender<OrchestratorState>,
  tickets: Tickets,
}

impl Orchestrator {
  pub fn new(
    vitals: Arc<dyn VitalsRepository>,
    meals: Arc<dyn MealLogRepository>,
    analyst: Arc<dyn AnalysisService>,
    cache: Arc<dyn SnapshotCache>,
  ) -> Self {
    let (state, _) = watch::channel(OrchestratorState::default());
    Self {
      vitals,
      meals,
      analyst,
      cache,
      owner: None,
      state,
      tickets: Tickets::default(),
    }
  }

  /// Scope every repository call to `owner` (`None` = single tenant)
  pub fn with_owner(mut self, owner: Option<String>) -> Self {
    self.owner = owner;
    self
  }

  pub fn owner(&self) -> Option<&str> {
    self.owner.as_deref()
  }

  pub fn state(&self) -> OrchestratorState {
    self.state.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<OrchestratorState> {
    self.state.subscribe()
  }

  /// Replace the in-memory metrics with an unsaved draft
  pub fn set_metrics(&self, draft: MetricsSnapshot) {
    self.state.send_modify(|s| s.metrics = draft);
  }

  /// Fetch the latest remote reading, falling back to the local cache, then
  /// analyze the resulting metrics and refresh history. Analysis failures are
  /// reported through `OrchestratorState::error`, not the return value.
  pub async fn startup(&self) -> Result<(), OrchestratorError> {
    self.fetch_latest().await?;

    let metrics = self.state.borrow().metrics.clone();
    match validate(&metrics) {
      Ok(validated) => {
        if let Err(e) = self.run_analysis(&validated, None).await {
          debug!(error = %e, "startup analysis did not apply");
        }
      }
      Err(e) => debug!(error = %e, "startup metrics incomplete, skipping analysis"),
    }

    if let Err(e) = self.refresh_history().await {
      debug!(error = %e, "startup history refresh did not apply");
    }

    Ok(())
  }

  /// Load the newest remote reading into `metrics`. On any repository failure
  /// the cached snapshot is used instead and sync status drops to local.
  pub async fn fetch_latest(&self) -> Result<SyncStatus, OrchestratorError> {
    let ticket = self.tickets.issue(Operation::Fetch);
    let _guard = InFlightGuard::start(&self.state, Operation::Fetch);

    let fetched = self.vitals.latest(self.owner()).await;
    if !self.tickets.is_current(Operation::Fetch, ticket) {
      return Err(OrchestratorError::Superseded(Operation::Fetch));
    }

    match fetched {
      Ok(Some(record)) => {
        info!(timestamp = %record.timestamp, "loaded latest reading");
        self.state.send_modify(|s| {
          s.metrics = MetricsSnapshot::from(record);
          s.sync_status = SyncStatus::Cloud;
        });
        Ok(SyncStatus::Cloud)
      }
      Ok(None) => {
        debug!("no remote readings yet");
        self.state.send_modify(|s| s.sync_status = SyncStatus::Cloud);
        Ok(SyncStatus::Cloud)
      }
      Err(e) => {
        if e.is_missing_store() {
          warn!(error = %e, "vitals table missing, running from local cache");
        } else {
          warn!(error = %e, "remote fetch failed, running from local cache");
        }

        let cached = self.cache.get().unwrap_or_else(|e| {
          warn!(error = %e, "local cache unreadable");
          None
        });

        self.state.send_modify(|s| {
          if let Some(snapshot) = cached {
            s.metrics = snapshot;
          }
          s.sync_status = SyncStatus::Local;
        });
        Ok(SyncStatus::Local)
      }
    }
  }

  /// Validate, write through to the local cache, then insert remotely.
  /// The new metrics are analyzed whether or not the insert succeeded;
  /// history is refreshed only after a successful insert.
  pub async fn save(&self, candidate: MetricsSnapshot) -> Result<SaveOutcome, OrchestratorError> {
    let validated = match validate(&candidate) {
      Ok(v) => v,
      Err(e) => {
        self.state.send_modify(|s| s.error = Some(e.to_string()));
        return Err(e.into());
      }
    };

    let ticket = self.tickets.issue(Operation::Save);
    let _guard = InFlightGuard::start(&self.state, Operation::Save);

    let at = Utc::now();
    let snapshot = validated.snapshot_at(at);

    let cached = match self.cache.set(&snapshot) {
      Ok(()) => true,
      Err(e) => {
        warn!(error = %e, "local cache write failed");
        false
      }
    };

    self.state.send_modify(|s| {
      s.metrics = snapshot;
      s.error = None;
    });

    let inserted = self.vitals.insert(&validated.to_record(self.owner(), at)).await;
    if !self.tickets.is_current(Operation::Save, ticket) {
      return Err(OrchestratorError::Superseded(Operation::Save));
    }

    let sync_status = match inserted {
      Ok(()) => SyncStatus::Cloud,
      Err(e) if cached => {
        warn!(error = %e, "remote insert failed, reading kept locally");
        SyncStatus::Local
      }
      Err(e) => {
        warn!(error = %e, "remote insert failed and no local copy was written");
        SyncStatus::Error
      }
    };
    self.state.send_modify(|s| s.sync_status = sync_status);

    let analysis = match self.run_analysis(&validated, None).await {
      Ok(result) => Some(result),
      Err(OrchestratorError::Superseded(op)) => {
        debug!(operation = %op, "save analysis superseded");
        None
      }
      Err(_) => None,
    };

    if sync_status == SyncStatus::Cloud {
      if let Err(e) = self.refresh_history().await {
        debug!(error = %e, "history refresh after save did not apply");
      }
    }

    Ok(SaveOutcome {
      sync_status,
      analysis,
    })
  }

  /// Analyze the current metrics, optionally evaluating a meal. A meal
  /// evaluation is appended to the meal log on a best-effort basis.
  pub async fn analyze(&self, meal_query: Option<&str>) -> Result<AnalysisResult, OrchestratorError> {
    let meal_query = meal_query.map(str::trim).filter(|q| !q.is_empty());

    let metrics = self.state.borrow().metrics.clone();
    let validated = match validate(&metrics) {
      Ok(v) => v,
      Err(e) => {
        self.state.send_modify(|s| s.error = Some(e.to_string()));
        return Err(e.into());
      }
    };

    self.run_analysis(&validated, meal_query).await
  }

  async fn run_analysis(
    &self,
    metrics: &ValidatedMetrics,
    meal_query: Option<&str>,
  ) -> Result<AnalysisResult, OrchestratorError> {
    let ticket = self.tickets.issue(Operation::Analyze);
    let _guard = InFlightGuard::start(&self.state, Operation::Analyze);

    let outcome = self.analyst.analyze(metrics, meal_query).await;
    if !self.tickets.is_current(Operation::Analyze, ticket) {
      return Err(OrchestratorError::Superseded(Operation::Analyze));
    }

    let analysis = match outcome {
      Ok(analysis) => analysis,
      Err(e) => {
        let err = OrchestratorError::Analysis(e);
        warn!(error = %err, "analysis failed");
        self.state.send_modify(|s| s.error = Some(err.to_string()));
        return Err(err);
      }
    };

    self.state.send_modify(|s| {
      s.analysis = Some(analysis.clone());
      s.error = None;
    });

    if let (Some(query), Some(food)) = (meal_query, analysis.food_analysis.as_ref()) {
      self.log_meal(query, food).await;
    }

    Ok(analysis)
  }

  /// Best-effort append; a failure is logged and not retried
  async fn log_meal(&self, query: &str, food: &FoodAnalysis) {
    let entry = NewFoodLog {
      user_id: self.owner.clone(),
      query: query.to_string(),
      verdict: food.verdict.clone(),
      rating: food.rating,
      timestamp: Utc::now(),
    };

    match self.meals.insert(&entry).await {
      Ok(()) => {
        debug!(rating = entry.rating, "meal logged");
        if let Err(e) = self.refresh_history().await {
          debug!(error = %e, "history refresh after meal log did not apply");
        }
      }
      Err(e) => warn!(error = %e, "failed to log meal"),
    }
  }

  /// Reload both history windows. Each window that fails to load keeps its
  /// previous contents.
  pub async fn refresh_history(&self) -> Result<(), OrchestratorError> {
    let ticket = self.tickets.issue(Operation::History);
    let _guard = InFlightGuard::start(&self.state, Operation::History);

    let owner = self.owner();
    let (vitals, meals) = tokio::join!(
      self.vitals.recent(owner, HISTORY_LIMIT),
      self.meals.recent(owner, HISTORY_LIMIT)
    );

    if !self.tickets.is_current(Operation::History, ticket) {
      return Err(OrchestratorError::Superseded(Operation::History));
    }

    let history = vitals
      .map_err(|e| warn!(error = %e, "vitals history unavailable"))
      .ok()
      .map(|records| {
        records
          .into_iter()
          .take(HISTORY_LIMIT)
          .map(MetricsSnapshot::from)
          .collect::<Vec<_>>()
      });
    let food_history = meals
      .map_err(|e| warn!(error = %e, "meal history unavailable"))
      .ok()
      .map(|entries| entries.into_iter().take(HISTORY_LIMIT).collect::<Vec<_>>());

    self.state.send_modify(|s| {
      if let Some(history) = history {
        s.history = history;
      }
      if let Some(food_history) = food_history {
        s.food_history = food_history;
      }
    });

    Ok(())
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
