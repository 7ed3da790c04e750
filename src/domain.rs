//! Domain models: grade levels, validated questions, and the screen tag.

use serde::{Deserialize, Serialize};

/// School grade the learner picks on the welcome screen.
/// Wire ids are `grade1`..`grade6`; the Hebrew label is accepted too.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GradeLevel {
  #[serde(rename = "grade1", alias = "כיתה א׳")]
  Grade1,
  #[serde(rename = "grade2", alias = "כיתה ב׳")]
  Grade2,
  #[serde(rename = "grade3", alias = "כיתה ג׳")]
  Grade3,
  #[serde(rename = "grade4", alias = "כיתה ד׳")]
  Grade4,
  #[serde(rename = "grade5", alias = "כיתה ה׳")]
  Grade5,
  #[serde(rename = "grade6", alias = "כיתה ו׳")]
  Grade6,
}

impl GradeLevel {
  pub const ALL: [GradeLevel; 6] = [
    GradeLevel::Grade1,
    GradeLevel::Grade2,
    GradeLevel::Grade3,
    GradeLevel::Grade4,
    GradeLevel::Grade5,
    GradeLevel::Grade6,
  ];

  /// Stable wire id (matches the serde rename).
  pub fn id(self) -> &'static str {
    match self {
      GradeLevel::Grade1 => "grade1",
      GradeLevel::Grade2 => "grade2",
      GradeLevel::Grade3 => "grade3",
      GradeLevel::Grade4 => "grade4",
      GradeLevel::Grade5 => "grade5",
      GradeLevel::Grade6 => "grade6",
    }
  }

  /// Hebrew label shown to kids and interpolated into the model prompt.
  pub fn label(self) -> &'static str {
    match self {
      GradeLevel::Grade1 => "כיתה א׳",
      GradeLevel::Grade2 => "כיתה ב׳",
      GradeLevel::Grade3 => "כיתה ג׳",
      GradeLevel::Grade4 => "כיתה ד׳",
      GradeLevel::Grade5 => "כיתה ה׳",
      GradeLevel::Grade6 => "כיתה ו׳",
    }
  }

  pub fn band(self) -> DifficultyBand {
    match self {
      GradeLevel::Grade1 | GradeLevel::Grade2 => DifficultyBand::Beginner,
      GradeLevel::Grade3 | GradeLevel::Grade4 => DifficultyBand::Elementary,
      GradeLevel::Grade5 | GradeLevel::Grade6 => DifficultyBand::Intermediate,
    }
  }
}

impl std::fmt::Display for GradeLevel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.label())
  }
}

/// Fixed grade-to-difficulty mapping used when building prompts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyBand {
  /// Grades 1-2.
  Beginner,
  /// Grades 3-4.
  Elementary,
  /// Grades 5-6.
  Intermediate,
}

/// A validated multiple-choice question.
/// `correct_answer` is guaranteed to be one of `options` (see `provider::validate_questions`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
  pub id: String,
  pub question_text: String,
  pub options: Vec<String>,
  pub correct_answer: String,
  pub hebrew_translation: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub emoji: Option<String>,
}

impl Question {
  pub fn is_correct(&self, option: &str) -> bool {
    self.correct_answer == option
  }

  pub fn has_option(&self, option: &str) -> bool {
    self.options.iter().any(|o| o == option)
  }
}

/// Which screen is mounted. Exactly one is active per session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Screen {
  #[default]
  Welcome,
  Loading,
  Quiz,
  Results,
  Error,
}

impl std::fmt::Display for Screen {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Screen::Welcome => "WELCOME",
      Screen::Loading => "LOADING",
      Screen::Quiz => "QUIZ",
      Screen::Results => "RESULTS",
      Screen::Error => "ERROR",
    };
    f.write_str(s)
  }
}
