pub mod auth;
pub mod cache;
pub mod cli;
pub mod companion;
pub mod config;
pub mod contract;
pub mod db;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod repository;
pub mod validation;

#[cfg(test)]
mod test_utils;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::AppConfig;

/// Install the stderr subscriber. `filter` uses `EnvFilter` directive syntax.
pub fn init_tracing(filter: &str) {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(std::io::stderr)
    .try_init();
}

pub async fn run() -> anyhow::Result<()> {
  // Load environment variables from .env file
  dotenvy::dotenv().ok();

  let cli = cli::Cli::parse();
  let config = AppConfig::from_env()?;
  init_tracing(&config.log_filter);

  cli::execute(cli, config).await
}
