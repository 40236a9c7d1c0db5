//! Session gate
//!
//! Hands out an `Orchestrator` only when there is someone to act for: the
//! signed-in user in multi-user mode, or the configured owner (possibly
//! nobody) in single-tenant mode. Each session gets a fresh orchestrator
//! whose repositories carry that session's credentials.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};
use url::Url;

use crate::auth::{AuthError, AuthProvider, Session};
use crate::cache::SnapshotCache;
use crate::db::DbPool;
use crate::llm::AnalysisService;
use crate::orchestrator::Orchestrator;
use crate::repository::{MealLogRepository, PostgrestClient, SqliteStore, VitalsRepository};

/// ---------------------------------------------------------------------------
/// Store connectors
/// ---------------------------------------------------------------------------

pub struct Stores {
  pub vitals: Arc<dyn VitalsRepository>,
  pub meals: Arc<dyn MealLogRepository>,
}

/// Builds repository handles for a session (or for no session)
pub trait StoreConnector: Send + Sync {
  fn connect(&self, session: Option<&Session>) -> Stores;
}

pub struct SupabaseConnector {
  url: Url,
  anon_key: String,
}

impl SupabaseConnector {
  pub fn new(url: Url, anon_key: String) -> Self {
    Self { url, anon_key }
  }
}

impl StoreConnector for SupabaseConnector {
  fn connect(&self, session: Option<&Session>) -> Stores {
    let mut client = PostgrestClient::new(&self.url, &self.anon_key);
    if let Some(session) = session {
      client = client.with_access_token(&session.access_token);
    }
    let client = Arc::new(client);
    Stores {
      vitals: client.clone(),
      meals: client,
    }
  }
}

pub struct SqliteConnector {
  pool: DbPool,
}

impl SqliteConnector {
  pub fn new(pool: DbPool) -> Self {
    Self { pool }
  }
}

impl StoreConnector for SqliteConnector {
  fn connect(&self, _session: Option<&Session>) -> Stores {
    let store = Arc::new(SqliteStore::new(self.pool.clone()));
    Stores {
      vitals: store.clone(),
      meals: store,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Companion
/// ---------------------------------------------------------------------------

pub struct Companion {
  auth: Option<Arc<dyn AuthProvider>>,
  connector: Arc<dyn StoreConnector>,
  analyst: Arc<dyn AnalysisService>,
  cache: Arc<dyn SnapshotCache>,
  owner: Option<String>,
}

impl Companion {
  /// Multi-user mode: every orchestrator is scoped to the signed-in user
  pub fn with_auth(
    auth: Arc<dyn AuthProvider>,
    connector: Arc<dyn StoreConnector>,
    analyst: Arc<dyn AnalysisService>,
    cache: Arc<dyn SnapshotCache>,
  ) -> Self {
    Self {
      auth: Some(auth),
      connector,
      analyst,
      cache,
      owner: None,
    }
  }

  /// Single-tenant mode: no sign-in, optional fixed owner
  pub fn single_tenant(
    owner: Option<String>,
    connector: Arc<dyn StoreConnector>,
    analyst: Arc<dyn AnalysisService>,
    cache: Arc<dyn SnapshotCache>,
  ) -> Self {
    Self {
      auth: None,
      connector,
      analyst,
      cache,
      owner,
    }
  }

  /// `None` when multi-user mode has no session
  pub async fn open(&self) -> Result<Option<Orchestrator>, AuthError> {
    let Some(auth) = &self.auth else {
      return Ok(Some(self.build(None, self.owner.clone())));
    };

    match auth.current_session().await? {
      Some(session) => {
        info!(user_id = %session.user.id, "opening session");
        let owner = Some(session.user.id.clone());
        Ok(Some(self.build(Some(&session), owner)))
      }
      None => Ok(None),
    }
  }

  /// Open and run startup
  pub async fn start(&self) -> Result<Option<Orchestrator>, AuthError> {
    let Some(orchestrator) = self.open().await? else {
      return Ok(None);
    };
    if let Err(e) = orchestrator.startup().await {
      debug!(error = %e, "startup did not apply");
    }
    Ok(Some(orchestrator))
  }

  /// Auth-state changes; `None` in single-tenant mode
  pub fn session_changes(&self) -> Option<watch::Receiver<Option<Session>>> {
    self.auth.as_ref().map(|auth| auth.subscribe())
  }

  /// Wait for the next auth-state change and start an orchestrator for it.
  /// Returns `Ok(None)` after a sign-out, or once the provider goes away.
  pub async fn next_session(
    &self,
    changes: &mut watch::Receiver<Option<Session>>,
  ) -> Result<Option<Orchestrator>, AuthError> {
    if changes.changed().await.is_err() {
      return Ok(None);
    }
    self.start().await
  }

  fn build(&self, session: Option<&Session>, owner: Option<String>) -> Orchestrator {
    let stores = self.connector.connect(session);
    Orchestrator::new(stores.vitals, stores.meals, self.analyst.clone(), self.cache.clone()).with_owner(owner)
  }
}
