//! Question provider contract, prompt building, and the response validation boundary.
//!
//! Model output is never trusted: `parse_questions` turns raw response text into
//! validated `Question`s or a typed `GenerationError`. Providers do not retry.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::config::Prompts;
use crate::domain::{GradeLevel, Question};
use crate::util::fill_template;

/// Questions requested per quiz.
pub const QUESTIONS_PER_QUIZ: usize = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
  #[error("model returned no content")]
  Empty,
  #[error("model response did not match the question schema: {0}")]
  Malformed(String),
  #[error("model call failed: {0}")]
  Transport(String),
  #[error("no question provider configured")]
  NotConfigured,
}

impl GenerationError {
  /// Short tag kept for diagnostics.
  pub fn kind(&self) -> &'static str {
    match self {
      GenerationError::Empty => "empty",
      GenerationError::Malformed(_) => "malformed",
      GenerationError::Transport(_) => "transport",
      GenerationError::NotConfigured => "not_configured",
    }
  }
}

impl From<reqwest::Error> for GenerationError {
  fn from(e: reqwest::Error) -> Self {
    GenerationError::Transport(e.to_string())
  }
}

#[async_trait]
pub trait QuestionProvider: Send + Sync {
  /// Provider name plus model, for logs and the health endpoint.
  fn describe(&self) -> String;

  async fn generate_questions(&self, grade: GradeLevel) -> Result<Vec<Question>, GenerationError>;
}

/// System + user messages for one request.
pub fn build_prompts(prompts: &Prompts, grade: GradeLevel) -> (String, String) {
  let count = QUESTIONS_PER_QUIZ.to_string();
  let pairs = [
    ("grade", grade.label()),
    ("count", count.as_str()),
    ("guidelines", prompts.guidelines.as_str()),
    ("focus", prompts.focus(grade.band())),
  ];
  (
    fill_template(&prompts.system_template, &pairs),
    fill_template(&prompts.user_template, &pairs),
  )
}

/// JSON schema of a single question object; shared by both providers.
pub fn question_item_schema() -> Value {
  json!({
    "type": "object",
    "properties": {
      "id": { "type": "string" },
      "questionText": { "type": "string" },
      "hebrewTranslation": { "type": "string" },
      "options": { "type": "array", "items": { "type": "string" } },
      "correctAnswer": { "type": "string" },
      "emoji": { "type": "string" }
    },
    "required": ["id", "questionText", "options", "correctAnswer", "hebrewTranslation"]
  })
}

/// Raw shape the model is asked for. Everything optional so that a missing field
/// is reported as `Malformed` with a useful message rather than a serde error dump.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuestion {
  #[serde(default)]
  id: Option<String>,
  #[serde(default)]
  question_text: Option<String>,
  #[serde(default)]
  options: Option<Vec<String>>,
  #[serde(default)]
  correct_answer: Option<String>,
  #[serde(default)]
  hebrew_translation: Option<String>,
  #[serde(default)]
  emoji: Option<String>,
}

/// Parse model output: a bare JSON array, or an object wrapping it under `questions`.
pub fn parse_questions(text: &str) -> Result<Vec<Question>, GenerationError> {
  let text = strip_code_fence(text.trim());
  if text.is_empty() {
    return Err(GenerationError::Empty);
  }

  let value: Value =
    serde_json::from_str(text).map_err(|e| GenerationError::Malformed(format!("not JSON: {e}")))?;
  let items = match value {
    Value::Array(items) => items,
    Value::Object(mut map) => match map.remove("questions") {
      Some(Value::Array(items)) => items,
      _ => return Err(GenerationError::Malformed("object without a `questions` array".into())),
    },
    other => {
      return Err(GenerationError::Malformed(format!("expected an array, got {}", json_kind(&other))))
    }
  };

  let raw = items
    .into_iter()
    .map(serde_json::from_value::<RawQuestion>)
    .collect::<Result<Vec<_>, _>>()
    .map_err(|e| GenerationError::Malformed(format!("question entry: {e}")))?;

  validate_questions(raw)
}

fn validate_questions(raw: Vec<RawQuestion>) -> Result<Vec<Question>, GenerationError> {
  if raw.is_empty() {
    return Err(GenerationError::Empty);
  }

  let mut raw = raw;
  if raw.len() > QUESTIONS_PER_QUIZ {
    warn!(target: "kefenglish", received = raw.len(), kept = QUESTIONS_PER_QUIZ, "Model returned extra questions; truncating");
    raw.truncate(QUESTIONS_PER_QUIZ);
  } else if raw.len() < QUESTIONS_PER_QUIZ {
    warn!(target: "kefenglish", received = raw.len(), expected = QUESTIONS_PER_QUIZ, "Model returned fewer questions than requested");
  }

  let mut seen_ids = HashSet::new();
  let mut out = Vec::with_capacity(raw.len());
  for (pos, r) in raw.into_iter().enumerate() {
    let id = required(r.id, "id", pos)?;
    if !seen_ids.insert(id.clone()) {
      return Err(GenerationError::Malformed(format!("duplicate id `{id}`")));
    }
    let question_text = required(r.question_text, "questionText", pos)?;
    let hebrew_translation = required(r.hebrew_translation, "hebrewTranslation", pos)?;
    let correct_answer = required(r.correct_answer, "correctAnswer", pos)?;

    let options: Vec<String> = r
      .options
      .unwrap_or_default()
      .into_iter()
      .map(|o| o.trim().to_string())
      .collect();
    if options.len() < 2 {
      return Err(GenerationError::Malformed(format!("question {pos} has fewer than 2 options")));
    }
    if options.iter().any(|o| o.is_empty()) {
      return Err(GenerationError::Malformed(format!("question {pos} has a blank option")));
    }
    let distinct: HashSet<&str> = options.iter().map(String::as_str).collect();
    if distinct.len() != options.len() {
      return Err(GenerationError::Malformed(format!("question {pos} repeats an option")));
    }
    if !options.contains(&correct_answer) {
      return Err(GenerationError::Malformed(format!(
        "question {pos}: correctAnswer `{correct_answer}` is not one of the options"
      )));
    }

    let emoji = r.emoji.map(|e| e.trim().to_string()).filter(|e| !e.is_empty());

    out.push(Question { id, question_text, options, correct_answer, hebrew_translation, emoji });
  }
  Ok(out)
}

fn required(v: Option<String>, field: &str, pos: usize) -> Result<String, GenerationError> {
  match v.map(|s| s.trim().to_string()) {
    Some(s) if !s.is_empty() => Ok(s),
    _ => Err(GenerationError::Malformed(format!("question {pos} is missing `{field}`"))),
  }
}

/// Some models wrap JSON in ```json fences even in JSON mode.
fn strip_code_fence(s: &str) -> &str {
  let Some(rest) = s.strip_prefix("```") else { return s };
  let rest = rest.strip_prefix("json").unwrap_or(rest);
  rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn json_kind(v: &Value) -> &'static str {
  match v {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}
