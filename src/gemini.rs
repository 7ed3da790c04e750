//! Google Gemini client (generateContent with a response schema).
//!
//! Gemini accepts an array at the top level of `responseSchema`, so the model
//! returns the question list directly.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument};

use crate::config::Prompts;
use crate::domain::{GradeLevel, Question};
use crate::provider::{build_prompts, parse_questions, GenerationError, QuestionProvider};
use crate::util::trunc_for_log;

#[derive(Clone)]
pub struct Gemini {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  pub prompts: Prompts,
}

impl Gemini {
  /// Construct the client if GEMINI_API_KEY (or API_KEY) is set; otherwise None.
  pub fn from_env(prompts: Prompts, timeout: Duration) -> Option<Self> {
    let api_key = std::env::var("GEMINI_API_KEY")
      .or_else(|_| std::env::var("API_KEY"))
      .ok()?;
    let base_url = std::env::var("GEMINI_BASE_URL")
      .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into());
    let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".into());

    let client = match reqwest::Client::builder().timeout(timeout).build() {
      Ok(c) => c,
      Err(e) => {
        error!(target: "kefenglish", error = %e, "Failed to build Gemini HTTP client; provider disabled");
        return None;
      }
    };

    Some(Self { client, api_key, base_url, model, prompts })
  }

  fn request_body(&self, system: &str, user: &str) -> GenerateContentRequest {
    GenerateContentRequest {
      system_instruction: Content { role: None, parts: vec![Part { text: system.into() }] },
      contents: vec![Content { role: Some("user".into()), parts: vec![Part { text: user.into() }] }],
      generation_config: GenerationConfig {
        response_mime_type: "application/json".into(),
        response_schema: gemini_schema(),
      },
    }
  }

  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model))]
  async fn generate_text(&self, system: &str, user: &str) -> Result<String, GenerationError> {
    let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
    let res = self.client.post(&url)
      .header(USER_AGENT, "kefenglish-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header("x-goog-api-key", &self.api_key)
      .json(&self.request_body(system, user)).send().await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_gemini_error(&body).unwrap_or_else(|| trunc_for_log(&body, 300));
      return Err(GenerationError::Transport(format!("Gemini HTTP {}: {}", status, msg)));
    }

    let body: GenerateContentResponse = res
      .json()
      .await
      .map_err(|e| GenerationError::Malformed(format!("generateContent envelope: {e}")))?;
    if let Some(usage) = &body.usage_metadata {
      info!(prompt_tokens = ?usage.prompt_token_count, completion_tokens = ?usage.candidates_token_count, total_tokens = ?usage.total_token_count, "Gemini usage");
    }
    Ok(body.text())
  }
}

/// Gemini's OpenAPI-subset schema uses upper-case type names.
fn gemini_schema() -> Value {
  json!({
    "type": "ARRAY",
    "items": {
      "type": "OBJECT",
      "properties": {
        "id": { "type": "STRING" },
        "questionText": { "type": "STRING" },
        "options": { "type": "ARRAY", "items": { "type": "STRING" } },
        "correctAnswer": { "type": "STRING" },
        "hebrewTranslation": { "type": "STRING" },
        "emoji": { "type": "STRING" }
      },
      "required": ["id", "questionText", "options", "correctAnswer", "hebrewTranslation"],
      "propertyOrdering": ["id", "questionText", "hebrewTranslation", "options", "correctAnswer", "emoji"]
    }
  })
}

#[async_trait]
impl QuestionProvider for Gemini {
  fn describe(&self) -> String {
    format!("gemini:{}", self.model)
  }

  #[instrument(level = "info", skip(self, grade), fields(%grade, model = %self.model))]
  async fn generate_questions(&self, grade: GradeLevel) -> Result<Vec<Question>, GenerationError> {
    let (system, user) = build_prompts(&self.prompts, grade);
    let start = Instant::now();
    let result = self.generate_text(&system, &user).await;
    let elapsed = start.elapsed();

    let text = match result {
      Ok(t) => {
        info!(?elapsed, bytes = t.len(), "Model response received");
        t
      }
      Err(e) => {
        error!(?elapsed, kind = e.kind(), error = %e, "Model call failed during question generation");
        return Err(e);
      }
    };
    debug!(preview = %trunc_for_log(&text, 200), "Model response preview");
    parse_questions(&text)
  }
}

// --- generateContent DTOs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
  system_instruction: Content,
  contents: Vec<Content>,
  generation_config: GenerationConfig,
}
#[derive(Serialize, Deserialize)]
struct Content {
  #[serde(default, skip_serializing_if = "Option::is_none")] role: Option<String>,
  #[serde(default)] parts: Vec<Part>,
}
#[derive(Serialize, Deserialize)]
struct Part {
  #[serde(default)] text: String,
}
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
  response_mime_type: String,
  response_schema: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
  #[serde(default)] candidates: Vec<Candidate>,
  #[serde(default)] usage_metadata: Option<UsageMetadata>,
}
#[derive(Deserialize)]
struct Candidate {
  #[serde(default)] content: Option<Content>,
}
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
  #[serde(default)] prompt_token_count: Option<u32>,
  #[serde(default)] candidates_token_count: Option<u32>,
  #[serde(default)] total_token_count: Option<u32>,
}

impl GenerateContentResponse {
  /// Concatenated text parts of the first candidate; empty if there is none.
  fn text(self) -> String {
    self.candidates
      .into_iter()
      .next()
      .and_then(|c| c.content)
      .map(|c| c.parts.into_iter().map(|p| p.text).collect::<String>())
      .unwrap_or_default()
  }
}

fn extract_gemini_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn response_text_joins_parts_of_first_candidate() {
    let body = r#"{
      "candidates": [{"content": {"role": "model", "parts": [{"text": "[{\"id\":"}, {"text": "\"q1\"}]"}]}}],
      "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 800, "totalTokenCount": 920}
    }"#;
    let resp: GenerateContentResponse = serde_json::from_str(body).expect("parse");
    assert_eq!(resp.text(), r#"[{"id":"q1"}]"#);
  }

  #[test]
  fn missing_candidates_yield_empty_text() {
    let resp: GenerateContentResponse = serde_json::from_str(r#"{"promptFeedback": {}}"#).expect("parse");
    let text = resp.text();
    assert!(text.is_empty());
    assert_eq!(parse_questions(&text), Err(GenerationError::Empty));
  }

  #[test]
  fn request_body_uses_camel_case_and_schema() {
    let g = Gemini {
      client: reqwest::Client::new(),
      api_key: "k".into(),
      base_url: "http://localhost".into(),
      model: "gemini-2.5-flash".into(),
      prompts: Prompts::default(),
    };
    let v = serde_json::to_value(g.request_body("sys", "usr")).expect("json");
    assert_eq!(v["systemInstruction"]["parts"][0]["text"], "sys");
    assert!(v["systemInstruction"].get("role").is_none());
    assert_eq!(v["contents"][0]["role"], "user");
    assert_eq!(v["generationConfig"]["responseMimeType"], "application/json");
    assert_eq!(v["generationConfig"]["responseSchema"]["type"], "ARRAY");
  }
}
