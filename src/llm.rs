//! LLM integration for vitals analysis
//!
//! This module handles communication with the Gemini API for generating
//! status badges, diet recommendations, and meal evaluations.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GeminiConfig;
use crate::contract::{response_schema, validate_response};
use crate::models::AnalysisResult;
use crate::validation::ValidatedMetrics;

/// ---------------------------------------------------------------------------
/// Error Types
/// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone)]
pub enum AnalysisError {
  #[error("API key not configured")]
  MissingApiKey,

  #[error("Request failed: {0}")]
  Request(String),

  #[error("API error: {0}")]
  Api(String),

  #[error("Parse error: {0}")]
  Parse(String),

  #[error("Response did not match the analysis contract: {0}")]
  Contract(String),
}

/// ---------------------------------------------------------------------------
/// Service seam
/// ---------------------------------------------------------------------------

/// Anything that can turn validated metrics (and an optional meal) into a
/// contract-checked analysis
#[async_trait]
pub trait AnalysisService: Send + Sync {
  async fn analyze(
    &self,
    metrics: &ValidatedMetrics,
    meal_query: Option<&str>,
  ) -> Result<AnalysisResult, AnalysisError>;
}

/// Without an API key every analysis fails with `MissingApiKey`, while
/// storage and history keep working
pub struct UnconfiguredAnalyst;

#[async_trait]
impl AnalysisService for UnconfiguredAnalyst {
  async fn analyze(
    &self,
    _metrics: &ValidatedMetrics,
    _meal_query: Option<&str>,
  ) -> Result<AnalysisResult, AnalysisError> {
    Err(AnalysisError::MissingApiKey)
  }
}

pub fn analyst_from_config(config: &GeminiConfig) -> Arc<dyn AnalysisService> {
  match GeminiClient::new(config) {
    Ok(client) => Arc::new(client),
    Err(e) => {
      warn!(error = %e, "coach disabled");
      Arc::new(UnconfiguredAnalyst)
    }
  }
}

/// ---------------------------------------------------------------------------
/// Gemini API Types
/// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
  system_instruction: Content,
  contents: Vec<Content>,
  generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
  #[serde(skip_serializing_if = "Option::is_none")]
  role: Option<String>,
  #[serde(default)]
  parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
  #[serde(default)]
  text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
  response_mime_type: String,
  response_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
  #[serde(default)]
  candidates: Vec<Candidate>,
  #[serde(default)]
  usage_metadata: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
  content: Option<Content>,
  #[allow(dead_code)]
  finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
  #[serde(default)]
  pub prompt_token_count: u32,
  #[serde(default)]
  pub candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
  error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
  message: String,
}

/// ---------------------------------------------------------------------------
/// Gemini Client
/// ---------------------------------------------------------------------------

pub struct GeminiClient {
  client: Client,
  api_key: String,
  model: String,
  api_base: String,
}

impl GeminiClient {
  pub fn new(config: &GeminiConfig) -> Result<Self, AnalysisError> {
    let api_key = config
      .api_key
      .clone()
      .filter(|k| !k.trim().is_empty())
      .ok_or(AnalysisError::MissingApiKey)?;

    Ok(Self {
      client: Client::new(),
      api_key,
      model: config.model.clone(),
      api_base: config.api_base.as_str().trim_end_matches('/').to_string(),
    })
  }

  fn endpoint(&self) -> String {
    format!("{}/models/{}:generateContent", self.api_base, self.model)
  }

  /// Call Gemini with a system instruction and one user turn, constrained to
  /// JSON matching `schema`
  pub async fn complete(
    &self,
    system_prompt: &str,
    user_message: &str,
    schema: serde_json::Value,
  ) -> Result<(String, Usage), AnalysisError> {
    let request = GenerateRequest {
      system_instruction: Content {
        role: None,
        parts: vec![Part {
          text: Some(system_prompt.to_string()),
        }],
      },
      contents: vec![Content {
        role: Some("user".to_string()),
        parts: vec![Part {
          text: Some(user_message.to_string()),
        }],
      }],
      generation_config: GenerationConfig {
        response_mime_type: "application/json".to_string(),
        response_schema: schema,
      },
    };

    let response = self
      .client
      .post(self.endpoint())
      .header("x-goog-api-key", &self.api_key)
      .header("content-type", "application/json")
      .json(&request)
      .send()
      .await
      .map_err(|e| AnalysisError::Request(e.to_string()))?;

    let status = response.status();
    let body = response
      .text()
      .await
      .map_err(|e| AnalysisError::Request(e.to_string()))?;

    if !status.is_success() {
      if let Ok(error_resp) = serde_json::from_str::<GeminiErrorResponse>(&body) {
        return Err(AnalysisError::Api(error_resp.error.message));
      }
      return Err(AnalysisError::Api(format!("HTTP {}: {}", status, body)));
    }

    let gemini_response: GenerateResponse =
      serde_json::from_str(&body).map_err(|e| AnalysisError::Parse(e.to_string()))?;

    let text = gemini_response
      .candidates
      .iter()
      .filter_map(|c| c.content.as_ref())
      .flat_map(|c| c.parts.iter())
      .find_map(|p| p.text.clone())
      .ok_or_else(|| AnalysisError::Parse("No text content in response".to_string()))?;

    Ok((text, gemini_response.usage_metadata.unwrap_or_default()))
  }
}

#[async_trait]
impl AnalysisService for GeminiClient {
  async fn analyze(
    &self,
    metrics: &ValidatedMetrics,
    meal_query: Option<&str>,
  ) -> Result<AnalysisResult, AnalysisError> {
    let system_prompt = include_str!("prompts/coach_system.txt");
    let user_message = build_prompt(metrics, meal_query);

    let (response_text, usage) = self
      .complete(system_prompt.trim(), &user_message, response_schema())
      .await?;

    debug!(
      input_tokens = usage.prompt_token_count,
      output_tokens = usage.candidates_token_count,
      "analysis response received"
    );

    let json_str = extract_json(&response_text)?;
    let value: serde_json::Value = serde_json::from_str(&json_str)
      .map_err(|e| AnalysisError::Parse(format!("{}: {}", e, json_str)))?;

    validate_response(value, meal_query.is_some())
  }
}

/// Render metrics (and the meal, when given) as the user turn
pub fn build_prompt(metrics: &ValidatedMetrics, meal_query: Option<&str>) -> String {
  let meal_line = meal_query
    .map(|q| format!("The user also mentioned eating/planning to eat: \"{}\"\n", q))
    .unwrap_or_default();

  format!(
    r#"Analyze the following health metrics:
Blood Pressure: {}/{} mmHg
Blood Sugar: {} mg/dL
{}
Act as a supportive, professional wellness coach. Provide a detailed analysis including status labels for BP and sugar (green/yellow/red based on standard medical ranges), specific diet recommendations, and lifestyle tips.
If food was mentioned, evaluate its impact specifically on these current metrics and rate it from 0 to 10."#,
    metrics.systolic, metrics.diastolic, metrics.blood_sugar, meal_line
  )
}

/// Extract JSON from the model's response (handles markdown code blocks)
fn extract_json(text: &str) -> Result<String, AnalysisError> {
  // Try direct parse first
  if text.trim().starts_with('{') {
    return Ok(text.trim().to_string());
  }

  // Look for JSON in code blocks
  if let Some(start) = text.find("```json") {
    let start = start + 7;
    if let Some(end) = text[start..].find("```") {
      return Ok(text[start..start + end].trim().to_string());
    }
  }

  // Look for plain code blocks
  if let Some(start) = text.find("```") {
    let start = start + 3;
    // Skip language identifier if present
    let content_start = text[start..]
      .find('\n')
      .map(|i| start + i + 1)
      .unwrap_or(start);
    if let Some(end) = text[content_start..].find("```") {
      return Ok(text[content_start..content_start + end].trim().to_string());
    }
  }

  // Last resort: find first { to last }
  if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
    if start < end {
      return Ok(text[start..=end].to_string());
    }
  }

  Err(AnalysisError::Parse("Could not extract JSON from response".to_string()))
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
