//! Points, percentage and the results message tiers.

use serde::Serialize;

pub const POINTS_PER_QUESTION: u32 = 10;

/// `score / (question_count * 10) * 100`. Zero questions yields 0.
pub fn percentage(score: u32, question_count: usize) -> f64 {
  if question_count == 0 {
    return 0.0;
  }
  let max = question_count as f64 * POINTS_PER_QUESTION as f64;
  score as f64 / max * 100.0
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultTier {
  Perfect,
  Great,
  Good,
  KeepTrying,
}

impl ResultTier {
  /// 100 → perfect, >= 80 → great, >= 50 → good, else keep trying.
  pub fn from_percentage(pct: f64) -> Self {
    if pct >= 100.0 {
      ResultTier::Perfect
    } else if pct >= 80.0 {
      ResultTier::Great
    } else if pct >= 50.0 {
      ResultTier::Good
    } else {
      ResultTier::KeepTrying
    }
  }

  pub fn message(self) -> &'static str {
    match self {
      ResultTier::Perfect => "מושלם! את/ה אלוף/ה!",
      ResultTier::Great => "כל הכבוד! עבודה מעולה!",
      ResultTier::Good => "יפה מאוד! בפעם הבאה נצליח יותר!",
      ResultTier::KeepTrying => "לא נורא, העיקר שלמדנו משהו חדש!",
    }
  }

  pub fn emoji(self) -> &'static str {
    match self {
      ResultTier::Perfect => "🏆",
      ResultTier::Great => "🌟",
      ResultTier::Good => "💪",
      ResultTier::KeepTrying => "🌱",
    }
  }
}
