//! Environment-driven configuration
//!
//! Values come from the process environment (after `.env` is loaded by the
//! binary). Nothing here touches the network or the filesystem.

use std::env;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

/// ---------------------------------------------------------------------------
/// Configuration Constants
/// ---------------------------------------------------------------------------

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_MODEL: &str = "gemini-3-flash-preview";
const DATA_DIR_NAME: &str = ".vitals-companion";
const DATABASE_FILE: &str = "vitals.db";
const SNAPSHOT_FILE: &str = "health_metrics_fallback.json";
const SESSION_FILE: &str = "session.json";
const DEFAULT_LOG_FILTER: &str = "warn";

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("Missing configuration: {0}")]
  MissingConfig(String),

  #[error("Invalid configuration for {name}: {reason}")]
  Invalid { name: String, reason: String },
}

/// ---------------------------------------------------------------------------
/// Configuration Data Structures
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
  /// Hosted Supabase project: PostgREST tables + GoTrue auth
  Supabase { url: Url, anon_key: String },
  /// Embedded SQLite file, single tenant unless an owner id is configured
  Sqlite { database_path: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiConfig {
  pub api_key: Option<String>,
  pub model: String,
  pub api_base: Url,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
  pub backend: BackendConfig,
  pub gemini: GeminiConfig,
  pub data_dir: PathBuf,
  /// Scopes repository calls when no auth provider is in play
  pub owner_id: Option<String>,
  pub log_filter: String,
}

impl AppConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    let data_dir = optional("VITALS_DATA_DIR")
      .map(PathBuf::from)
      .unwrap_or_else(default_data_dir);

    let backend = match optional("VITALS_BACKEND").as_deref() {
      Some("supabase") => supabase_from_env()?,
      Some("sqlite") => sqlite_from_env(&data_dir),
      Some(other) => {
        return Err(ConfigError::Invalid {
          name: "VITALS_BACKEND".into(),
          reason: format!("expected 'supabase' or 'sqlite', got '{}'", other),
        })
      }
      None if optional("SUPABASE_URL").is_some() => supabase_from_env()?,
      None => sqlite_from_env(&data_dir),
    };

    let gemini = GeminiConfig {
      api_key: optional("GEMINI_API_KEY").or_else(|| optional("API_KEY")),
      model: optional("GEMINI_MODEL").unwrap_or_else(|| GEMINI_MODEL.to_string()),
      api_base: parse_url(
        "GEMINI_API_BASE",
        &optional("GEMINI_API_BASE").unwrap_or_else(|| GEMINI_API_BASE.to_string()),
      )?,
    };

    let log_filter = optional("VITALS_LOG")
      .or_else(|| optional("RUST_LOG"))
      .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    Ok(Self {
      backend,
      gemini,
      data_dir,
      owner_id: optional("VITALS_OWNER_ID"),
      log_filter,
    })
  }

  pub fn snapshot_path(&self) -> PathBuf {
    self.data_dir.join(SNAPSHOT_FILE)
  }

  pub fn session_path(&self) -> PathBuf {
    self.data_dir.join(SESSION_FILE)
  }
}

fn supabase_from_env() -> Result<BackendConfig, ConfigError> {
  let url = optional("SUPABASE_URL").ok_or_else(|| ConfigError::MissingConfig("SUPABASE_URL".into()))?;
  let anon_key =
    optional("SUPABASE_ANON_KEY").ok_or_else(|| ConfigError::MissingConfig("SUPABASE_ANON_KEY".into()))?;

  Ok(BackendConfig::Supabase {
    url: parse_url("SUPABASE_URL", &url)?,
    anon_key,
  })
}

fn sqlite_from_env(data_dir: &std::path::Path) -> BackendConfig {
  let database_path = optional("VITALS_DATABASE_PATH")
    .map(PathBuf::from)
    .unwrap_or_else(|| data_dir.join(DATABASE_FILE));
  BackendConfig::Sqlite { database_path }
}

/// Unset and blank are treated the same
fn optional(name: &str) -> Option<String> {
  env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_url(name: &str, value: &str) -> Result<Url, ConfigError> {
  Url::parse(value).map_err(|e| ConfigError::Invalid {
    name: name.to_string(),
    reason: e.to_string(),
  })
}

fn default_data_dir() -> PathBuf {
  env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."))
    .join(DATA_DIR_NAME)
}
