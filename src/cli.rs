//! Command-line front end
//!
//! Plain-text stand-in for the companion's screens. All behavior lives in the
//! orchestrator; this module only wires collaborators from `AppConfig` and
//! prints state.

use anyhow::{anyhow, bail};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use crate::auth::{AuthProvider, Session, SignUpOutcome, SignUpRequest, SupabaseAuth};
use crate::cache::{JsonFileSlot, MemorySnapshotCache, SnapshotCache};
use crate::companion::{Companion, SqliteConnector, StoreConnector, SupabaseConnector};
use crate::config::{AppConfig, BackendConfig};
use crate::db;
use crate::llm::{analyst_from_config, AnalysisError};
use crate::models::{AnalysisResult, MetricsSnapshot, Reading, StatusBadge};
use crate::orchestrator::{Orchestrator, OrchestratorError, OrchestratorState};

#[derive(Debug, Parser)]
#[command(name = "vitals-companion", version, about = "Blood pressure and blood sugar companion")]
pub struct Cli {
  /// Keep the fallback snapshot in memory instead of on disk
  #[arg(long, global = true)]
  pub ephemeral: bool,

  /// Print orchestrator state as JSON
  #[arg(long, global = true)]
  pub json: bool,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
  /// Show the latest metrics, sync status, and coach analysis
  Status,
  /// Record a reading
  Save {
    #[arg(long)]
    systolic: Option<i64>,
    #[arg(long)]
    diastolic: Option<i64>,
    /// Blood sugar in mg/dL
    #[arg(long = "sugar")]
    blood_sugar: Option<i64>,
  },
  /// Ask the coach about a meal
  Ask {
    #[arg(required = true, num_args = 1..)]
    meal: Vec<String>,
  },
  /// Recent readings and meal evaluations
  History,
  SignIn {
    #[arg(long)]
    email: String,
    #[arg(long, env = "VITALS_PASSWORD", hide_env_values = true)]
    password: String,
  },
  SignUp {
    #[arg(long)]
    email: String,
    #[arg(long)]
    name: String,
    #[arg(long, env = "VITALS_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long)]
    confirm_password: String,
  },
  SignOut,
  /// Show the signed-in account
  Whoami,
}

/// ---------------------------------------------------------------------------
/// Wiring
/// ---------------------------------------------------------------------------

struct App {
  config: AppConfig,
  auth: Option<Arc<SupabaseAuth>>,
  connector: Arc<dyn StoreConnector>,
  cache: Arc<dyn SnapshotCache>,
}

impl App {
  async fn build(config: AppConfig, ephemeral: bool) -> anyhow::Result<Self> {
    let cache: Arc<dyn SnapshotCache> = if ephemeral {
      Arc::new(MemorySnapshotCache::new())
    } else {
      Arc::new(JsonFileSlot::<MetricsSnapshot>::new(config.snapshot_path()))
    };

    let (auth, connector) = match &config.backend {
      BackendConfig::Supabase { url, anon_key } => {
        let slot = JsonFileSlot::<Session>::new(config.session_path());
        let auth = Arc::new(SupabaseAuth::new(url, anon_key, slot));
        let connector: Arc<dyn StoreConnector> = Arc::new(SupabaseConnector::new(url.clone(), anon_key.clone()));
        (Some(auth), connector)
      }
      BackendConfig::Sqlite { database_path } => {
        let pool = db::initialize_db(database_path)
          .await
          .map_err(|e| anyhow!("failed to open {}: {}", database_path.display(), e))?;
        let connector: Arc<dyn StoreConnector> = Arc::new(SqliteConnector::new(pool));
        (None, connector)
      }
    };

    Ok(Self {
      config,
      auth,
      connector,
      cache,
    })
  }

  fn companion(&self) -> Companion {
    let analyst = analyst_from_config(&self.config.gemini);

    match &self.auth {
      Some(auth) => Companion::with_auth(auth.clone(), self.connector.clone(), analyst, self.cache.clone()),
      None => Companion::single_tenant(
        self.config.owner_id.clone(),
        self.connector.clone(),
        analyst,
        self.cache.clone(),
      ),
    }
  }

  fn auth(&self) -> anyhow::Result<&SupabaseAuth> {
    self
      .auth
      .as_deref()
      .ok_or_else(|| anyhow!("accounts need the Supabase backend (set SUPABASE_URL and SUPABASE_ANON_KEY)"))
  }
}

async fn open(companion: &Companion) -> anyhow::Result<Orchestrator> {
  companion
    .open()
    .await?
    .ok_or_else(|| anyhow!("not signed in; run `vitals-companion sign-in`"))
}

/// ---------------------------------------------------------------------------
/// Commands
/// ---------------------------------------------------------------------------

pub async fn execute(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
  let app = App::build(config, cli.ephemeral).await?;
  let json = cli.json;

  match cli.command {
    Command::Status => {
      let companion = app.companion();
      let Some(orchestrator) = companion.start().await? else {
        println!("Not signed in. Run `vitals-companion sign-in` first.");
        return Ok(());
      };
      if json {
        print_json(&orchestrator.state())?;
      } else {
        print_state(&orchestrator.state());
      }
    }

    Command::Save {
      systolic,
      diastolic,
      blood_sugar,
    } => {
      let orchestrator = open(&app.companion()).await?;
      let candidate = MetricsSnapshot::new(
        Reading::from(systolic),
        Reading::from(diastolic),
        Reading::from(blood_sugar),
      );

      let outcome = orchestrator.save(candidate).await?;
      if json {
        print_json(&orchestrator.state())?;
      } else {
        println!("Saved ({}).", outcome.sync_status);
        print_state(&orchestrator.state());
      }
    }

    Command::Ask { meal } => {
      let orchestrator = open(&app.companion()).await?;
      orchestrator.fetch_latest().await?;

      let query = meal.join(" ");
      let result = orchestrator.analyze(Some(&query)).await.map_err(|e| match e {
        OrchestratorError::Analysis(AnalysisError::MissingApiKey) => {
          anyhow!("set GEMINI_API_KEY (or API_KEY) to talk to the coach")
        }
        other => other.into(),
      })?;
      if json {
        print_json(&orchestrator.state())?;
      } else {
        print_analysis(&result);
      }
    }

    Command::History => {
      let orchestrator = open(&app.companion()).await?;
      orchestrator.refresh_history().await?;
      if json {
        print_json(&orchestrator.state())?;
      } else {
        print_history(&orchestrator.state());
      }
    }

    Command::SignIn { email, password } => {
      let session = app.auth()?.sign_in(&email, &password).await?;
      println!("Welcome back, {}.", session.greeting_name());
    }

    Command::SignUp {
      email,
      name,
      password,
      confirm_password,
    } => {
      let request = SignUpRequest {
        email,
        password,
        confirm_password,
        display_name: name,
      };
      match app.auth()?.sign_up(&request).await? {
        SignUpOutcome::SignedIn(session) => println!("Welcome, {}.", session.greeting_name()),
        SignUpOutcome::ConfirmationRequired => {
          println!("Account created. Check your email to confirm it, then sign in.")
        }
      }
    }

    Command::SignOut => {
      app.auth()?.sign_out().await?;
      println!("Signed out.");
    }

    Command::Whoami => match app.auth()?.current_session().await? {
      Some(session) => println!(
        "{} <{}>",
        session.greeting_name(),
        session.user.email.as_deref().unwrap_or("no email")
      ),
      None => bail!("not signed in"),
    },
  }

  Ok(())
}

/// ---------------------------------------------------------------------------
/// Output
/// ---------------------------------------------------------------------------

fn print_json(state: &OrchestratorState) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(state)?);
  Ok(())
}

fn print_state(state: &OrchestratorState) {
  let m = &state.metrics;
  println!(
    "Blood pressure {}/{} mmHg, blood sugar {} mg/dL ({})",
    m.systolic, m.diastolic, m.blood_sugar, state.sync_status
  );

  if let Some(error) = &state.error {
    println!("! {}", error);
  }

  match &state.analysis {
    Some(analysis) => print_analysis(analysis),
    None => println!("No analysis yet."),
  }
}

fn print_badge(name: &str, badge: &StatusBadge) {
  println!("{}: {} [{}] {}", name, badge.label, badge.color, badge.description);
}

fn print_analysis(analysis: &AnalysisResult) {
  println!();
  println!("{}", analysis.overall_summary);
  print_badge("Blood pressure", &analysis.bp_status);
  print_badge("Blood sugar", &analysis.sugar_status);

  if let Some(food) = &analysis.food_analysis {
    println!();
    println!("Meal rating {:.1}/10: {}", food.rating, food.verdict);
    for pro in &food.pros {
      println!("  + {}", pro);
    }
    for con in &food.cons {
      println!("  - {}", con);
    }
  }

  println!();
  println!("Diet:");
  for tip in &analysis.diet_recommendations {
    println!("  * {}", tip);
  }
  println!("Lifestyle:");
  for tip in &analysis.lifestyle_tips {
    println!("  * {}", tip);
  }
}

fn print_history(state: &OrchestratorState) {
  println!("Readings:");
  if state.history.is_empty() {
    println!("  (none)");
  }
  for s in &state.history {
    println!(
      "  {}  {}/{} mmHg  {} mg/dL",
      s.timestamp.format("%Y-%m-%d %H:%M"),
      s.systolic,
      s.diastolic,
      s.blood_sugar
    );
  }

  println!("Meals:");
  if state.food_history.is_empty() {
    println!("  (none)");
  }
  for entry in &state.food_history {
    println!(
      "  {}  {:.1}/10  {}: {}",
      entry.timestamp.format("%Y-%m-%d %H:%M"),
      entry.rating,
      entry.query,
      entry.verdict
    );
  }
}
