//! Runtime settings (environment) and prompt templates (optional TOML).
//!
//! Environment is read once at startup. `QUIZ_CONFIG_PATH` may point to a TOML
//! file with a `[prompts]` table overriding any of the `Prompts` fields.

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::domain::DifficultyBand;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct QuizConfig {
  #[serde(default)]
  pub prompts: Prompts,
}

/// Prompt templates sent to the question model.
/// Placeholders: `{grade}`, `{count}`, `{guidelines}`, `{focus}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub system_template: String,
  pub user_template: String,
  pub guidelines: String,
  pub beginner_focus: String,
  pub elementary_focus: String,
  pub intermediate_focus: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      system_template: "You are an expert English teacher for Hebrew-speaking children.\n\
Generate {count} multiple-choice English questions suitable for a student in {grade}.\n\n\
Difficulty Guidelines:\n{guidelines}\n\n\
Focus for this student: {focus}\n\n\
Ensure the \"hebrewTranslation\" is accurate and helpful.\n\
Ensure \"correctAnswer\" matches exactly one of the \"options\".\n\
Give every question a unique \"id\".\n\
Add a relevant emoji to the \"emoji\" field for visual appeal.".into(),
      user_template: "Generate {count} questions now.".into(),
      guidelines: "- Grade 1-2: Basic vocabulary (colors, animals, numbers, family), simple present 'to be'.\n\
- Grade 3-4: Simple sentences, present simple, basic prepositions, clothing, food.\n\
- Grade 5-6: Past simple, future, comparatives, reading comprehension (short sentence), more complex vocabulary.".into(),
      beginner_focus: "basic vocabulary and simple 'to be' sentences".into(),
      elementary_focus: "simple present tense, prepositions and everyday nouns".into(),
      intermediate_focus: "past and future tense, comparatives and short reading comprehension".into(),
    }
  }
}

impl Prompts {
  pub fn focus(&self, band: DifficultyBand) -> &str {
    match band {
      DifficultyBand::Beginner => &self.beginner_focus,
      DifficultyBand::Elementary => &self.elementary_focus,
      DifficultyBand::Intermediate => &self.intermediate_focus,
    }
  }
}

/// Which hosted model family answers question requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
  OpenAi,
  Gemini,
}

/// Process settings captured at startup.
#[derive(Clone, Debug)]
pub struct Settings {
  pub port: u16,
  pub static_dir: String,
  pub provider: Option<ProviderKind>,
  pub provider_timeout: Duration,
  pub advance_delay: Duration,
  /// Sessions untouched for this long, with no socket attached, are evicted.
  pub session_ttl: Duration,
  pub sweep_interval: Duration,
}

impl Settings {
  pub fn from_env() -> Self {
    let port = env_parse("PORT").unwrap_or(3000);
    let static_dir = std::env::var("STATIC_DIR").unwrap_or_else(|_| "./static".into());
    let provider_timeout = Duration::from_secs(env_parse("PROVIDER_TIMEOUT_SECS").unwrap_or(30));
    let advance_delay = Duration::from_millis(env_parse("ADVANCE_DELAY_MS").unwrap_or(2000));
    let session_ttl = Duration::from_secs(env_parse("SESSION_TTL_SECS").unwrap_or(1800));
    let sweep_interval = Duration::from_secs(env_parse::<u64>("SESSION_SWEEP_SECS").unwrap_or(60).max(1));

    let has_openai = std::env::var("OPENAI_API_KEY").is_ok();
    let has_gemini = std::env::var("GEMINI_API_KEY").is_ok() || std::env::var("API_KEY").is_ok();
    let provider = match std::env::var("QUESTION_PROVIDER").ok().as_deref() {
      Some("openai") => Some(ProviderKind::OpenAi),
      Some("gemini") => Some(ProviderKind::Gemini),
      Some(other) => {
        warn!(target: "kefenglish", provider = %other, "Unknown QUESTION_PROVIDER; picking by available key");
        pick_provider(has_openai, has_gemini)
      }
      None => pick_provider(has_openai, has_gemini),
    };

    Self { port, static_dir, provider, provider_timeout, advance_delay, session_ttl, sweep_interval }
  }
}

fn pick_provider(has_openai: bool, has_gemini: bool) -> Option<ProviderKind> {
  if has_openai {
    Some(ProviderKind::OpenAi)
  } else if has_gemini {
    Some(ProviderKind::Gemini)
  } else {
    None
  }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
  std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

/// Load `QuizConfig` from QUIZ_CONFIG_PATH. On any IO/parse error, returns None.
pub fn load_quiz_config_from_env() -> Option<QuizConfig> {
  let path = std::env::var("QUIZ_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<QuizConfig>(&s) {
      Ok(cfg) => {
        info!(target: "kefenglish", %path, "Loaded quiz config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "kefenglish", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "kefenglish", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
