//! Supabase GoTrue authentication
//!
//! Sessions are kept in a `JsonFileSlot` so a restart stays signed in, and
//! broadcast through a `watch` channel so the session gate can react to
//! sign-in and sign-out.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

use crate::cache::JsonFileSlot;

/// ---------------------------------------------------------------------------
/// Configuration Constants
/// ---------------------------------------------------------------------------

const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;
const FALLBACK_GREETING: &str = "User";

/// ---------------------------------------------------------------------------
/// Session Data Structures
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
  pub id: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub display_name: Option<String>,
}

/// Stored session state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
  pub access_token: String,
  pub refresh_token: String,
  pub expires_at: DateTime<Utc>,
  pub user: AuthUser,
}

impl Session {
  pub fn needs_refresh(&self) -> bool {
    let buffer = Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES);
    Utc::now() + buffer >= self.expires_at
  }

  /// Display name, else the local part of the email, else "User"
  pub fn greeting_name(&self) -> String {
    if let Some(name) = self.user.display_name.as_deref().map(str::trim) {
      if !name.is_empty() {
        return name.to_string();
      }
    }

    self
      .user
      .email
      .as_deref()
      .and_then(|email| email.split('@').next())
      .filter(|local| !local.is_empty())
      .unwrap_or(FALLBACK_GREETING)
      .to_string()
  }
}

#[derive(Debug, Clone)]
pub struct SignUpRequest {
  pub email: String,
  pub password: String,
  pub confirm_password: String,
  pub display_name: String,
}

impl SignUpRequest {
  /// Local checks that run before the provider is contacted
  pub fn validate(&self) -> Result<(), AuthError> {
    if self.password != self.confirm_password {
      return Err(AuthError::InvalidInput("Passwords do not match.".into()));
    }
    if self.display_name.trim().is_empty() {
      return Err(AuthError::InvalidInput("Please enter your name.".into()));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
  SignedIn(Session),
  /// Account created; the provider wants the email confirmed before issuing a session
  ConfirmationRequired,
}

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
  #[error("{0}")]
  InvalidInput(String),

  #[error("HTTP request failed: {0}")]
  Request(#[from] reqwest::Error),

  #[error("Authentication failed: {0}")]
  Rejected(String),

  #[error("Session storage error: {0}")]
  Storage(String),

  #[error("Unexpected auth response: {0}")]
  Decode(String),
}

/// ---------------------------------------------------------------------------
/// Provider seam
/// ---------------------------------------------------------------------------

#[async_trait]
pub trait AuthProvider: Send + Sync {
  /// Current session, refreshed first when it is close to expiry
  async fn current_session(&self) -> Result<Option<Session>, AuthError>;

  /// Notified on every sign-in, refresh, and sign-out
  fn subscribe(&self) -> watch::Receiver<Option<Session>>;

  async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

  async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, AuthError>;

  async fn sign_out(&self) -> Result<(), AuthError>;
}

/// ---------------------------------------------------------------------------
/// GoTrue API Types
/// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
  access_token: String,
  refresh_token: String,
  #[serde(default)]
  expires_in: Option<i64>,
  #[serde(default)]
  expires_at: Option<i64>,
  user: GoTrueUser,
}

#[derive(Debug, Deserialize)]
struct GoTrueUser {
  id: String,
  #[serde(default)]
  email: Option<String>,
  #[serde(default)]
  user_metadata: Option<UserMetadata>,
}

#[derive(Debug, Deserialize)]
struct UserMetadata {
  #[serde(default)]
  display_name: Option<String>,
}

/// GoTrue has shipped a few error shapes over time
#[derive(Debug, Default, Deserialize)]
struct GoTrueErrorBody {
  #[serde(default)]
  error_description: Option<String>,
  #[serde(default)]
  msg: Option<String>,
  #[serde(default)]
  message: Option<String>,
}

impl From<TokenResponse> for Session {
  fn from(resp: TokenResponse) -> Self {
    let expires_at = resp
      .expires_at
      .and_then(|ts| DateTime::from_timestamp(ts, 0))
      .unwrap_or_else(|| Utc::now() + Duration::seconds(resp.expires_in.unwrap_or(0)));

    Self {
      access_token: resp.access_token,
      refresh_token: resp.refresh_token,
      expires_at,
      user: AuthUser {
        id: resp.user.id,
        email: resp.user.email,
        display_name: resp.user.user_metadata.and_then(|m| m.display_name),
      },
    }
  }
}

fn rejection_message(body: &str) -> String {
  let parsed: GoTrueErrorBody = serde_json::from_str(body).unwrap_or_default();
  parsed
    .error_description
    .or(parsed.msg)
    .or(parsed.message)
    .unwrap_or_else(|| body.to_string())
}

/// ---------------------------------------------------------------------------
/// Supabase Auth Client
/// ---------------------------------------------------------------------------

pub struct SupabaseAuth {
  client: Client,
  auth_base: String,
  anon_key: String,
  slot: JsonFileSlot<Session>,
  session: watch::Sender<Option<Session>>,
}

impl SupabaseAuth {
  /// Restores any session persisted in `slot`
  pub fn new(project_url: &Url, anon_key: &str, slot: JsonFileSlot<Session>) -> Self {
    let restored = slot.load().unwrap_or_else(|e| {
      warn!(error = %e, path = %slot.path().display(), "discarding unreadable session");
      None
    });
    let (session, _) = watch::channel(restored);

    Self {
      client: Client::new(),
      auth_base: format!("{}/auth/v1", project_url.as_str().trim_end_matches('/')),
      anon_key: anon_key.to_string(),
      slot,
      session,
    }
  }

  async fn token_request(&self, grant_type: &str, body: Value) -> Result<Session, AuthError> {
    let response = self
      .client
      .post(format!("{}/token", self.auth_base))
      .header("apikey", &self.anon_key)
      .query(&[("grant_type", grant_type)])
      .json(&body)
      .send()
      .await?;

    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
      return Err(AuthError::Rejected(rejection_message(&text)));
    }

    let token: TokenResponse = serde_json::from_str(&text).map_err(|e| AuthError::Decode(e.to_string()))?;
    Ok(Session::from(token))
  }

  async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
    self
      .token_request("refresh_token", json!({ "refresh_token": refresh_token }))
      .await
  }

  fn persist(&self, session: Option<Session>) -> Result<(), AuthError> {
    match &session {
      Some(s) => self.slot.store(s),
      None => self.slot.clear(),
    }
    .map_err(|e| AuthError::Storage(e.to_string()))?;

    self.session.send_replace(session);
    Ok(())
  }
}

#[async_trait]
impl AuthProvider for SupabaseAuth {
  async fn current_session(&self) -> Result<Option<Session>, AuthError> {
    let current = self.session.borrow().clone();
    let Some(session) = current else {
      return Ok(None);
    };

    if !session.needs_refresh() {
      return Ok(Some(session));
    }

    match self.refresh(&session.refresh_token).await {
      Ok(refreshed) => {
        self.persist(Some(refreshed.clone()))?;
        Ok(Some(refreshed))
      }
      Err(AuthError::Rejected(reason)) => {
        info!(reason = %reason, "refresh token rejected, signing out");
        self.persist(None)?;
        Ok(None)
      }
      Err(e) => {
        // Offline: keep the stale session so the orchestrator can fall back locally
        warn!(error = %e, "session refresh failed");
        Ok(Some(session))
      }
    }
  }

  fn subscribe(&self) -> watch::Receiver<Option<Session>> {
    self.session.subscribe()
  }

  async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
    let session = self
      .token_request("password", json!({ "email": email, "password": password }))
      .await?;

    info!(user_id = %session.user.id, "signed in");
    self.persist(Some(session.clone()))?;
    Ok(session)
  }

  async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, AuthError> {
    request.validate()?;

    let response = self
      .client
      .post(format!("{}/signup", self.auth_base))
      .header("apikey", &self.anon_key)
      .json(&json!({
        "email": request.email,
        "password": request.password,
        "data": { "display_name": request.display_name.trim() },
      }))
      .send()
      .await?;

    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
      return Err(AuthError::Rejected(rejection_message(&text)));
    }

    let body: Value = serde_json::from_str(&text).map_err(|e| AuthError::Decode(e.to_string()))?;
    if body.get("access_token").is_none() {
      return Ok(SignUpOutcome::ConfirmationRequired);
    }

    let token: TokenResponse = serde_json::from_value(body).map_err(|e| AuthError::Decode(e.to_string()))?;
    let session = Session::from(token);
    self.persist(Some(session.clone()))?;
    Ok(SignUpOutcome::SignedIn(session))
  }

  async fn sign_out(&self) -> Result<(), AuthError> {
    let access_token = self.session.borrow().as_ref().map(|s| s.access_token.clone());

    if let Some(token) = access_token {
      let result = self
        .client
        .post(format!("{}/logout", self.auth_base))
        .header("apikey", &self.anon_key)
        .bearer_auth(token)
        .send()
        .await;

      match result {
        Ok(resp) if !resp.status().is_success() => {
          warn!(status = %resp.status(), "remote sign-out failed");
        }
        Err(e) => warn!(error = %e, "remote sign-out failed"),
        Ok(_) => {}
      }
    }

    self.persist(None)
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use mockito::Matcher;

  fn token_body(access_token: &str, expires_in: i64) -> String {
    json!({
      "access_token": access_token,
      "token_type": "bearer",
      "expires_in": expires_in,
      "refresh_token": "refresh-1",
      "user": {
        "id": "user-42",
        "email": "sam@example.com",
        "user_metadata": { "display_name": "Sam" }
      }
    })
    .to_string()
  }

  fn stored_session(expires_in_minutes: i64) -> Session {
    Session {
      access_token: "old-token".into(),
      refresh_token: "refresh-0".into(),
      expires_at: Utc::now() + Duration::minutes(expires_in_minutes),
      user: AuthUser {
        id: "user-42".into(),
        email: Some("sam@example.com".into()),
        display_name: None,
      },
    }
  }

  fn auth_with(server: &mockito::ServerGuard, dir: &tempfile::TempDir) -> SupabaseAuth {
    let url = Url::parse(&server.url()).unwrap();
    SupabaseAuth::new(&url, "anon-key", JsonFileSlot::new(dir.path().join("session.json")))
  }

  fn sign_up_request() -> SignUpRequest {
    SignUpRequest {
      email: "sam@example.com".into(),
      password: "hunter22".into(),
      confirm_password: "hunter22".into(),
      display_name: "Sam".into(),
    }
  }

  #[test]
  fn test_needs_refresh() {
    assert!(stored_session(2).needs_refresh());
    assert!(!stored_session(60).needs_refresh());
  }

  #[test]
  fn test_greeting_name_fallbacks() {
    let mut session = stored_session(60);
    session.user.display_name = Some("  Dana ".into());
    assert_eq!(session.greeting_name(), "Dana");

    session.user.display_name = None;
    assert_eq!(session.greeting_name(), "sam");

    session.user.email = None;
    assert_eq!(session.greeting_name(), "User");
  }

  #[test]
  fn test_sign_up_validation_messages() {
    let mut request = sign_up_request();
    request.confirm_password = "different".into();
    assert_eq!(request.validate().unwrap_err().to_string(), "Passwords do not match.");

    let mut request = sign_up_request();
    request.display_name = "   ".into();
    assert_eq!(request.validate().unwrap_err().to_string(), "Please enter your name.");

    assert!(sign_up_request().validate().is_ok());
  }

  #[tokio::test]
  async fn test_sign_in_persists_and_notifies() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/auth/v1/token")
      .match_query(Matcher::UrlEncoded("grant_type".into(), "password".into()))
      .match_header("apikey", "anon-key")
      .match_body(Matcher::PartialJson(json!({ "email": "sam@example.com" })))
      .with_status(200)
      .with_body(token_body("new-token", 3600))
      .create_async()
      .await;

    let dir = tempfile::tempdir().unwrap();
    let auth = auth_with(&server, &dir);
    let mut rx = auth.subscribe();

    let session = auth.sign_in("sam@example.com", "hunter22").await.unwrap();
    assert_eq!(session.user.display_name.as_deref(), Some("Sam"));
    assert!(!session.needs_refresh());

    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().as_ref().map(|s| s.access_token.clone()), Some("new-token".into()));

    // A fresh client restores the persisted session
    let restored = auth_with(&server, &dir);
    assert_eq!(restored.current_session().await.unwrap(), Some(session));
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_bad_credentials_are_rejected() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
      .mock("POST", "/auth/v1/token")
      .match_query(Matcher::Any)
      .with_status(400)
      .with_body(r#"{"error": "invalid_grant", "error_description": "Invalid login credentials"}"#)
      .create_async()
      .await;

    let dir = tempfile::tempdir().unwrap();
    let auth = auth_with(&server, &dir);

    let err = auth.sign_in("sam@example.com", "wrong").await.unwrap_err();
    assert!(matches!(err, AuthError::Rejected(ref m) if m == "Invalid login credentials"));
    assert!(auth.current_session().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_sign_up_mismatch_makes_no_request() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("POST", "/auth/v1/signup").expect(0).create_async().await;

    let dir = tempfile::tempdir().unwrap();
    let auth = auth_with(&server, &dir);
    let mut request = sign_up_request();
    request.confirm_password = "nope".into();

    assert!(matches!(auth.sign_up(&request).await, Err(AuthError::InvalidInput(_))));
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_sign_up_sends_display_name_and_handles_confirmation() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/auth/v1/signup")
      .match_body(Matcher::PartialJson(json!({ "data": { "display_name": "Sam" } })))
      .with_status(200)
      .with_body(r#"{"id": "user-42", "email": "sam@example.com", "confirmation_sent_at": "2026-03-01T10:00:00Z"}"#)
      .create_async()
      .await;

    let dir = tempfile::tempdir().unwrap();
    let auth = auth_with(&server, &dir);

    let outcome = auth.sign_up(&sign_up_request()).await.unwrap();
    assert_eq!(outcome, SignUpOutcome::ConfirmationRequired);
    assert!(auth.current_session().await.unwrap().is_none());
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_sign_up_with_autoconfirm_signs_in() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
      .mock("POST", "/auth/v1/signup")
      .with_status(200)
      .with_body(token_body("signup-token", 3600))
      .create_async()
      .await;

    let dir = tempfile::tempdir().unwrap();
    let auth = auth_with(&server, &dir);

    match auth.sign_up(&sign_up_request()).await.unwrap() {
      SignUpOutcome::SignedIn(session) => assert_eq!(session.access_token, "signup-token"),
      other => panic!("expected a session, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_expiring_session_is_refreshed() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/auth/v1/token")
      .match_query(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
      .match_body(Matcher::PartialJson(json!({ "refresh_token": "refresh-0" })))
      .with_status(200)
      .with_body(token_body("refreshed-token", 3600))
      .create_async()
      .await;

    let dir = tempfile::tempdir().unwrap();
    let slot: JsonFileSlot<Session> = JsonFileSlot::new(dir.path().join("session.json"));
    slot.store(&stored_session(1)).unwrap();

    let auth = auth_with(&server, &dir);
    let session = auth.current_session().await.unwrap().unwrap();
    assert_eq!(session.access_token, "refreshed-token");
    assert_eq!(slot.load().unwrap().unwrap().access_token, "refreshed-token");
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_rejected_refresh_signs_out() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
      .mock("POST", "/auth/v1/token")
      .match_query(Matcher::Any)
      .with_status(400)
      .with_body(r#"{"code": 400, "error_code": "refresh_token_not_found", "msg": "Invalid Refresh Token"}"#)
      .create_async()
      .await;

    let dir = tempfile::tempdir().unwrap();
    let slot: JsonFileSlot<Session> = JsonFileSlot::new(dir.path().join("session.json"));
    slot.store(&stored_session(-10)).unwrap();

    let auth = auth_with(&server, &dir);
    assert!(auth.current_session().await.unwrap().is_none());
    assert!(slot.load().unwrap().is_none());
  }

  #[tokio::test]
  async fn test_sign_out_clears_even_when_remote_fails() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/auth/v1/logout")
      .match_header("authorization", "Bearer old-token")
      .with_status(500)
      .create_async()
      .await;

    let dir = tempfile::tempdir().unwrap();
    let slot: JsonFileSlot<Session> = JsonFileSlot::new(dir.path().join("session.json"));
    slot.store(&stored_session(60)).unwrap();

    let auth = auth_with(&server, &dir);
    let rx = auth.subscribe();
    auth.sign_out().await.unwrap();

    assert!(rx.borrow().is_none());
    assert!(slot.load().unwrap().is_none());
    mock.assert_async().await;
  }
}
