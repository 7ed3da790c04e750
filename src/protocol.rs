//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{DifficultyBand, GradeLevel, Question, Screen};
use crate::scoring::{percentage, ResultTier};
use crate::session::{Reveal, Session};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    CreateSession,
    Attach {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Start {
        grade: GradeLevel,
    },
    Answer {
        #[serde(rename = "questionIndex")]
        question_index: usize,
        option: String,
    },
    Home,
    Restart,
    Dismiss,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Session { session: SessionView },
    Revealed(RevealOut),
    Error { message: String },
}

/// Question as shown while unanswered: no `correctAnswer`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOut {
    pub id: String,
    pub question_text: String,
    pub options: Vec<String>,
    pub hebrew_translation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

impl From<&Question> for QuestionOut {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id.clone(),
            question_text: q.question_text.clone(),
            options: q.options.clone(),
            hebrew_translation: q.hebrew_translation.clone(),
            emoji: q.emoji.clone(),
        }
    }
}

/// Feedback for the answer currently on screen.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealOut {
    pub question_index: usize,
    pub selected: String,
    pub correct: bool,
    pub correct_answer: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsOut {
    pub score: u32,
    pub total_questions: usize,
    pub correct_count: usize,
    pub percentage: f64,
    pub tier: ResultTier,
    pub message: &'static str,
    pub emoji: &'static str,
}

/// Snapshot of one session; everything a client needs to render the current screen.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub screen: Screen,
    pub grade: Option<GradeLevel>,
    pub grade_label: Option<&'static str>,
    pub total_questions: usize,
    pub current_question_index: usize,
    pub score: u32,
    pub streak: u32,
    pub answers: Vec<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revealed: Option<RevealOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Diagnostic failure kind (`empty`, `malformed`, `transport`, `not_configured`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<ResultsOut>,
}

/// Build the public snapshot from the owned session.
pub fn to_view(id: &str, s: &Session) -> SessionView {
    let quiz = s.quiz();
    let current = s.current_question();
    let revealed = match (s.pending(), current) {
        (Some(p), Some(q)) => Some(RevealOut {
            question_index: p.question_index,
            selected: p.option.clone(),
            correct: p.is_correct,
            correct_answer: q.correct_answer.clone(),
        }),
        _ => None,
    };
    let results = (s.screen() == Screen::Results).then(|| results_out(quiz.score, quiz.answers.as_slice(), s.questions().len()));

    SessionView {
        id: id.to_string(),
        screen: s.screen(),
        grade: s.grade(),
        grade_label: s.grade().map(GradeLevel::label),
        total_questions: s.questions().len(),
        current_question_index: quiz.current_question_index,
        score: quiz.score,
        streak: quiz.streak,
        answers: quiz.answers.clone(),
        question: current.map(QuestionOut::from),
        revealed,
        error_message: s.error_message().map(str::to_string),
        error_kind: s.error_kind(),
        results,
    }
}

fn results_out(score: u32, answers: &[bool], total: usize) -> ResultsOut {
    let pct = percentage(score, total);
    let tier = ResultTier::from_percentage(pct);
    ResultsOut {
        score,
        total_questions: total,
        correct_count: answers.iter().filter(|a| **a).count(),
        percentage: pct,
        tier,
        message: tier.message(),
        emoji: tier.emoji(),
    }
}

pub fn reveal_out(r: &Reveal, selected: &str) -> RevealOut {
    RevealOut {
        question_index: r.question_index,
        selected: selected.to_string(),
        correct: r.correct,
        correct_answer: r.correct_answer.clone(),
    }
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct StartIn {
    pub grade: GradeLevel,
}

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
    #[serde(rename = "questionIndex")]
    pub question_index: usize,
    pub option: String,
}

#[derive(Serialize)]
pub struct GradeOut {
    pub id: &'static str,
    pub label: &'static str,
    pub band: DifficultyBand,
}

pub fn grades_out() -> Vec<GradeOut> {
    GradeLevel::ALL
        .into_iter()
        .map(|g| GradeOut { id: g.id(), label: g.label(), band: g.band() })
        .collect()
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub provider: Option<String>,
}

#[derive(Serialize)]
pub struct ErrorOut {
    pub error: String,
}
