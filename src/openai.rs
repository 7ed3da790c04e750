//! Minimal OpenAI client for question generation.
//!
//! We only call chat.completions with a `json_schema` response format.
//! Calls are instrumented and log model names, latencies, and token usage (not contents).
//!
//! NOTE: We never log the API key and we keep payload truncations short.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument};

use crate::config::Prompts;
use crate::domain::{GradeLevel, Question};
use crate::provider::{build_prompts, parse_questions, question_item_schema, GenerationError, QuestionProvider};
use crate::util::trunc_for_log;

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  pub prompts: Prompts,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env(prompts: Prompts, timeout: Duration) -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok()?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());

    let client = match reqwest::Client::builder().timeout(timeout).build() {
      Ok(c) => c,
      Err(e) => {
        error!(target: "kefenglish", error = %e, "Failed to build OpenAI HTTP client; provider disabled");
        return None;
      }
    };

    Some(Self { client, api_key, base_url, model, prompts })
  }

  /// Chat completion constrained to `schema`; returns the raw message text.
  #[instrument(level = "info", skip(self, system, user, schema), fields(model = %self.model))]
  async fn chat_structured(
    &self,
    system: &str,
    user: &str,
    schema: Value,
    temperature: f32,
  ) -> Result<String, GenerationError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat {
        r#type: "json_schema".into(),
        json_schema: Some(JsonSchemaFormat { name: "quiz_questions".into(), strict: false, schema }),
      }),
      max_tokens: None,
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "kefenglish-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or_else(|| trunc_for_log(&body, 300));
      return Err(GenerationError::Transport(format!("OpenAI HTTP {}: {}", status, msg)));
    }

    let body: ChatCompletionResponse = res
      .json()
      .await
      .map_err(|e| GenerationError::Malformed(format!("chat completion envelope: {e}")))?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.into_iter().next()
      .and_then(|c| c.message.content)
      .unwrap_or_default();
    Ok(text)
  }
}

/// Structured-output schema. OpenAI wants an object at the top level, so the
/// question array is wrapped under `questions`.
fn questions_schema() -> Value {
  json!({
    "type": "object",
    "properties": {
      "questions": { "type": "array", "items": question_item_schema() }
    },
    "required": ["questions"]
  })
}

#[async_trait]
impl QuestionProvider for OpenAI {
  fn describe(&self) -> String {
    format!("openai:{}", self.model)
  }

  #[instrument(level = "info", skip(self, grade), fields(%grade, model = %self.model))]
  async fn generate_questions(&self, grade: GradeLevel) -> Result<Vec<Question>, GenerationError> {
    let (system, user) = build_prompts(&self.prompts, grade);
    let start = Instant::now();
    let result = self.chat_structured(&system, &user, questions_schema(), 0.9).await;
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

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat {
  #[serde(rename = "type")] r#type: String,
  #[serde(skip_serializing_if = "Option::is_none")] json_schema: Option<JsonSchemaFormat>,
}
#[derive(Serialize)]
struct JsonSchemaFormat { name: String, strict: bool, schema: Value }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}
