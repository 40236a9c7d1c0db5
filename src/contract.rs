//! Response contract for the analysis service
//!
//! Service output is untrusted. It is checked against a JSON Schema first
//! (required fields, types, badge color enum), then decoded into the typed
//! model, and finally the meal rating is brought into range.

use serde_json::{json, Value};
use tracing::warn;

use crate::llm::AnalysisError;
use crate::models::{AnalysisResult, BadgeColor};

pub const RATING_MIN: f64 = 0.0;
pub const RATING_MAX: f64 = 10.0;

const REQUIRED_FIELDS: [&str; 5] = [
  "overallSummary",
  "bpStatus",
  "sugarStatus",
  "dietRecommendations",
  "lifestyleTips",
];

fn color_values() -> Vec<&'static str> {
  BadgeColor::ALL.iter().map(|c| c.as_str()).collect()
}

/// ---------------------------------------------------------------------------
/// Schema sent with the request (Gemini structured-output dialect)
/// ---------------------------------------------------------------------------

pub fn response_schema() -> Value {
  let badge = json!({
    "type": "OBJECT",
    "properties": {
      "label": { "type": "STRING" },
      "color": { "type": "STRING", "enum": color_values() },
      "description": { "type": "STRING" }
    },
    "required": ["label", "color", "description"]
  });

  json!({
    "type": "OBJECT",
    "properties": {
      "overallSummary": { "type": "STRING" },
      "bpStatus": badge,
      "sugarStatus": badge,
      "dietRecommendations": { "type": "ARRAY", "items": { "type": "STRING" } },
      "lifestyleTips": { "type": "ARRAY", "items": { "type": "STRING" } },
      "foodAnalysis": {
        "type": "OBJECT",
        "properties": {
          "pros": { "type": "ARRAY", "items": { "type": "STRING" } },
          "cons": { "type": "ARRAY", "items": { "type": "STRING" } },
          "verdict": { "type": "STRING" },
          "rating": { "type": "NUMBER" }
        },
        "required": ["verdict", "rating"]
      }
    },
    "required": REQUIRED_FIELDS
  })
}

/// ---------------------------------------------------------------------------
/// Schema the response is validated against (plain JSON Schema)
/// ---------------------------------------------------------------------------

pub fn validation_schema() -> Value {
  let badge = json!({
    "type": "object",
    "properties": {
      "label": { "type": "string" },
      "color": { "type": "string", "enum": color_values() },
      "description": { "type": "string" }
    },
    "required": ["label", "color", "description"]
  });
  let strings = json!({ "type": "array", "items": { "type": "string" } });

  json!({
    "type": "object",
    "properties": {
      "overallSummary": { "type": "string" },
      "bpStatus": badge,
      "sugarStatus": badge,
      "dietRecommendations": strings,
      "lifestyleTips": strings,
      "foodAnalysis": {
        "type": "object",
        "properties": {
          "pros": strings,
          "cons": strings,
          "verdict": { "type": "string" },
          "rating": { "type": "number" }
        },
        "required": ["verdict", "rating"]
      }
    },
    "required": REQUIRED_FIELDS
  })
}

/// Collect schema violations as `path: message` strings
fn schema_errors(value: &Value) -> Result<Vec<String>, AnalysisError> {
  let schema = validation_schema();
  let compiled = jsonschema::JSONSchema::compile(&schema)
    .map_err(|e| AnalysisError::Contract(format!("Failed to compile response schema: {}", e)))?;

  let errors = compiled
    .validate(value)
    .err()
    .map(|errors| {
      errors
        .map(|error| {
          let path = error.instance_path.to_string();
          if path.is_empty() {
            error.to_string()
          } else {
            format!("{}: {}", path, error)
          }
        })
        .collect::<Vec<_>>()
    })
    .unwrap_or_default();

  Ok(errors)
}

/// Turn a raw service payload into an `AnalysisResult`, or fail closed.
///
/// `meal_query_given` controls whether a returned `foodAnalysis` is kept.
pub fn validate_response(mut value: Value, meal_query_given: bool) -> Result<AnalysisResult, AnalysisError> {
  if !meal_query_given {
    if let Some(object) = value.as_object_mut() {
      object.remove("foodAnalysis");
    }
  }

  let errors = schema_errors(&value)?;
  if !errors.is_empty() {
    return Err(AnalysisError::Contract(errors.join("; ")));
  }

  let mut result: AnalysisResult =
    serde_json::from_value(value).map_err(|e| AnalysisError::Contract(e.to_string()))?;

  if let Some(food) = result.food_analysis.as_mut() {
    food.rating = normalize_rating(food.rating)?;
  }

  Ok(result)
}

/// Out-of-range ratings are clamped (with a warning); non-finite ones rejected
pub fn normalize_rating(rating: f64) -> Result<f64, AnalysisError> {
  if !rating.is_finite() {
    return Err(AnalysisError::Contract(format!("rating is not a finite number: {}", rating)));
  }
  if rating < RATING_MIN || rating > RATING_MAX {
    let clamped = rating.clamp(RATING_MIN, RATING_MAX);
    warn!(rating, clamped, "meal rating outside 0-10, clamping");
    return Ok(clamped);
  }
  Ok(rating)
}
