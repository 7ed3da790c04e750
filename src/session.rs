//! Quiz session state machine.
//!
//! A `Session` is a single owned value; every transition is a `&mut self` method
//! that either applies fully or returns a `TransitionError` and leaves state untouched.
//!
//! Screens and edges:
//!   WELCOME  --start(grade)-------------> LOADING
//!   LOADING  --questions_received-------> QUIZ
//!   LOADING  --provider_failed----------> ERROR
//!   QUIZ     --submit_answer------------> QUIZ (next) | RESULTS (index held at last)
//!   QUIZ/ERROR/RESULTS --go_home--------> WELCOME
//!   RESULTS/ERROR --restart-------------> LOADING (same grade) | WELCOME (no grade)
//!   ERROR    --dismiss------------------> WELCOME
//!
//! Every edge that leaves a screen bumps `epoch`. Async work (generation requests,
//! the feedback-delay timer) carries the epoch it was issued under and is discarded
//! if the session moved on in the meantime.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{GradeLevel, Question, Screen};
use crate::provider::GenerationError;
use crate::scoring::POINTS_PER_QUESTION;

/// User-facing message for every generation failure.
pub const GENERATION_ERROR_MESSAGE: &str = "אופס! משהו השתבש ביצירת השאלות. נסה שוב מאוחר יותר.";

/// Progress through the current question list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizState {
    pub current_question_index: usize,
    pub score: u32,
    pub answers: Vec<bool>,
    pub streak: u32,
}

/// Issued by `start`/`restart`; hand it back with the provider's result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestTicket {
    pub epoch: u64,
    pub grade: GradeLevel,
}

/// Identifies one scheduled advance: the session epoch plus the question it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdvanceToken {
    pub epoch: u64,
    pub question_index: usize,
}

/// An answer that has been revealed to the learner but not yet applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingAnswer {
    pub question_index: usize,
    pub option: String,
    pub is_correct: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reveal {
    pub question_index: usize,
    pub correct: bool,
    pub correct_answer: String,
    pub token: AdvanceToken,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// Moved on to the question at this index.
    Next(usize),
    /// Last question answered; the session is on RESULTS.
    Finished,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("`{op}` is not allowed on the {screen} screen")]
    InvalidScreen { op: &'static str, screen: Screen },
    #[error("question {got} is not the current question (expected {expected})")]
    WrongQuestion { expected: usize, got: usize },
    #[error("question {0} was already answered")]
    AlreadyAnswered(usize),
    #[error("option is not one of the choices for question {0}")]
    UnknownOption(usize),
    #[error("ticket or token belongs to an earlier session state")]
    Stale,
}

#[derive(Clone, Debug, Default)]
pub struct Session {
    screen: Screen,
    grade: Option<GradeLevel>,
    questions: Vec<Question>,
    quiz: QuizState,
    error_message: Option<String>,
    error_kind: Option<&'static str>,
    pending: Option<PendingAnswer>,
    epoch: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn grade(&self) -> Option<GradeLevel> {
        self.grade
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn quiz(&self) -> &QuizState {
        &self.quiz
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Diagnostic kind of the last generation failure (`empty`, `malformed`, ...).
    pub fn error_kind(&self) -> Option<&'static str> {
        self.error_kind
    }

    pub fn pending(&self) -> Option<&PendingAnswer> {
        self.pending.as_ref()
    }

    /// Question under the cursor while on QUIZ (also the last one while its feedback shows).
    pub fn current_question(&self) -> Option<&Question> {
        match self.screen {
            Screen::Quiz => self.questions.get(self.quiz.current_question_index),
            _ => None,
        }
    }

    /// WELCOME -> LOADING. The caller runs the provider and reports back with the ticket.
    pub fn start(&mut self, grade: GradeLevel) -> Result<RequestTicket, TransitionError> {
        self.require("start", &[Screen::Welcome])?;
        Ok(self.begin_loading(grade))
    }

    /// LOADING -> QUIZ. Empty or inconsistent lists are turned into a failure instead.
    pub fn questions_received(
        &mut self,
        ticket: RequestTicket,
        questions: Vec<Question>,
    ) -> Result<(), TransitionError> {
        self.check_ticket(ticket)?;

        if questions.is_empty() {
            return self.provider_failed(ticket, &GenerationError::Empty);
        }
        if let Some(bad) = questions.iter().find(|q| !q.has_option(&q.correct_answer)) {
            let err = GenerationError::Malformed(format!(
                "question {} has a correct answer outside its options",
                bad.id
            ));
            return self.provider_failed(ticket, &err);
        }

        info!(target: "quiz", epoch = self.epoch, grade = %ticket.grade, count = questions.len(), "Questions received; quiz begins");
        self.questions = questions;
        self.quiz = QuizState::default();
        self.pending = None;
        self.screen = Screen::Quiz;
        Ok(())
    }

    /// LOADING -> ERROR. The cause is logged; the learner sees one fixed message.
    pub fn provider_failed(
        &mut self,
        ticket: RequestTicket,
        err: &GenerationError,
    ) -> Result<(), TransitionError> {
        self.check_ticket(ticket)?;
        warn!(target: "quiz", epoch = self.epoch, grade = %ticket.grade, kind = err.kind(), error = %err, "Question generation failed");
        self.questions.clear();
        self.quiz = QuizState::default();
        self.error_message = Some(GENERATION_ERROR_MESSAGE.to_string());
        self.error_kind = Some(err.kind());
        self.screen = Screen::Error;
        Ok(())
    }

    /// Show feedback for `option` on the current question and park it as pending.
    /// The returned token is applied with `apply_advance` once the feedback delay ends.
    pub fn reveal(&mut self, question_index: usize, option: &str) -> Result<Reveal, TransitionError> {
        self.require("reveal", &[Screen::Quiz])?;
        self.check_answerable(question_index)?;

        let question = &self.questions[question_index];
        if !question.has_option(option) {
            return Err(TransitionError::UnknownOption(question_index));
        }
        let correct = question.is_correct(option);
        let correct_answer = question.correct_answer.clone();

        self.pending = Some(PendingAnswer {
            question_index,
            option: option.to_string(),
            is_correct: correct,
        });
        debug!(target: "quiz", epoch = self.epoch, question_index, correct, "Answer revealed");

        Ok(Reveal {
            question_index,
            correct,
            correct_answer,
            token: AdvanceToken { epoch: self.epoch, question_index },
        })
    }

    /// Apply a revealed answer if the token still refers to this session state.
    pub fn apply_advance(&mut self, token: AdvanceToken) -> Result<AnswerOutcome, TransitionError> {
        if token.epoch != self.epoch || self.screen != Screen::Quiz {
            return Err(TransitionError::Stale);
        }
        let pending = match &self.pending {
            Some(p) if p.question_index == token.question_index => p.is_correct,
            _ => return Err(TransitionError::Stale),
        };
        self.pending = None;
        self.submit_answer(token.question_index, pending)
    }

    /// Record the answer for the current question and move on.
    /// Rejected outside QUIZ, for any index but the current one, or if that index was answered.
    pub fn submit_answer(
        &mut self,
        question_index: usize,
        is_correct: bool,
    ) -> Result<AnswerOutcome, TransitionError> {
        self.require("submit_answer", &[Screen::Quiz])?;
        self.check_answerable(question_index)?;

        let q = &mut self.quiz;
        q.answers.push(is_correct);
        if is_correct {
            q.score += POINTS_PER_QUESTION;
            q.streak += 1;
        } else {
            q.streak = 0;
        }

        let next = question_index + 1;
        if next < self.questions.len() {
            q.current_question_index = next;
            debug!(target: "quiz", epoch = self.epoch, next, score = q.score, streak = q.streak, "Advanced");
            Ok(AnswerOutcome::Next(next))
        } else {
            // Index stays on the last question so its feedback can finish rendering.
            self.screen = Screen::Results;
            info!(target: "quiz", epoch = self.epoch, score = self.quiz.score, total = self.questions.len(), "Quiz finished");
            Ok(AnswerOutcome::Finished)
        }
    }

    /// QUIZ/ERROR/RESULTS -> WELCOME, dropping questions and grade.
    pub fn go_home(&mut self) -> Result<(), TransitionError> {
        self.require("go_home", &[Screen::Quiz, Screen::Error, Screen::Results])?;
        self.epoch += 1;
        self.grade = None;
        self.questions.clear();
        self.quiz = QuizState::default();
        self.pending = None;
        self.clear_error();
        self.screen = Screen::Welcome;
        Ok(())
    }

    /// Replay the same grade. `None` means there was no grade and the session is on WELCOME.
    pub fn restart(&mut self) -> Result<Option<RequestTicket>, TransitionError> {
        self.require("restart", &[Screen::Results, Screen::Error])?;
        match self.grade {
            Some(grade) => Ok(Some(self.begin_loading(grade))),
            None => {
                self.epoch += 1;
                self.questions.clear();
                self.quiz = QuizState::default();
                self.pending = None;
                self.clear_error();
                self.screen = Screen::Welcome;
                Ok(None)
            }
        }
    }

    /// ERROR -> WELCOME.
    pub fn dismiss(&mut self) -> Result<(), TransitionError> {
        self.require("dismiss", &[Screen::Error])?;
        self.epoch += 1;
        self.clear_error();
        self.screen = Screen::Welcome;
        Ok(())
    }

    fn begin_loading(&mut self, grade: GradeLevel) -> RequestTicket {
        self.epoch += 1;
        self.grade = Some(grade);
        self.questions.clear();
        self.quiz = QuizState::default();
        self.pending = None;
        self.clear_error();
        self.screen = Screen::Loading;
        info!(target: "quiz", epoch = self.epoch, %grade, "Loading questions");
        RequestTicket { epoch: self.epoch, grade }
    }

    fn clear_error(&mut self) {
        self.error_message = None;
        self.error_kind = None;
    }

    fn require(&self, op: &'static str, allowed: &[Screen]) -> Result<(), TransitionError> {
        if allowed.contains(&self.screen) {
            Ok(())
        } else {
            Err(TransitionError::InvalidScreen { op, screen: self.screen })
        }
    }

    fn check_ticket(&self, ticket: RequestTicket) -> Result<(), TransitionError> {
        if ticket.epoch == self.epoch && self.screen == Screen::Loading {
            Ok(())
        } else {
            Err(TransitionError::Stale)
        }
    }

    fn check_answerable(&self, question_index: usize) -> Result<(), TransitionError> {
        let expected = self.quiz.current_question_index;
        if question_index != expected {
            return Err(TransitionError::WrongQuestion { expected, got: question_index });
        }
        if self.quiz.answers.len() > question_index || self.pending.is_some() {
            return Err(TransitionError::AlreadyAnswered(question_index));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_questions(n: usize) -> Vec<Question> {
        (0..n)
            .map(|i| Question {
                id: format!("q{}", i + 1),
                question_text: format!("What color is thing {}?", i + 1),
                options: vec!["red".into(), "blue".into(), "green".into(), "yellow".into()],
                correct_answer: "blue".into(),
                hebrew_translation: format!("איזה צבע הוא דבר {}?", i + 1),
                emoji: Some("🎨".into()),
            })
            .collect()
    }

    fn quiz_with(n: usize) -> Session {
        let mut s = Session::new();
        let t = s.start(GradeLevel::Grade1).expect("start");
        s.questions_received(t, sample_questions(n)).expect("received");
        s
    }

    fn trailing_true(answers: &[bool]) -> u32 {
        answers.iter().rev().take_while(|a| **a).count() as u32
    }

    fn assert_invariants(s: &Session) {
        let q = s.quiz();
        assert!(q.answers.len() <= s.questions().len());
        assert_eq!(q.score, POINTS_PER_QUESTION * q.answers.iter().filter(|a| **a).count() as u32);
        assert_eq!(q.streak, trailing_true(&q.answers));
        if s.screen() == Screen::Results {
            assert_eq!(q.current_question_index + 1, s.questions().len());
        } else {
            assert_eq!(q.answers.len(), q.current_question_index);
        }
    }

    #[test]
    fn perfect_run_reaches_results_with_top_tier() {
        let mut s = quiz_with(10);
        assert_eq!(s.grade().map(|g| g.label()), Some("כיתה א׳"));
        for i in 0..10 {
            let out = s.submit_answer(i, true).expect("answer");
            assert_invariants(&s);
            if i < 9 {
                assert_eq!(out, AnswerOutcome::Next(i + 1));
            } else {
                assert_eq!(out, AnswerOutcome::Finished);
            }
        }
        assert_eq!(s.screen(), Screen::Results);
        assert_eq!(s.quiz().score, 100);
        assert_eq!(s.quiz().current_question_index, 9);
        let pct = crate::scoring::percentage(s.quiz().score, s.questions().len());
        assert_eq!(pct, 100.0);
        assert_eq!(crate::scoring::ResultTier::from_percentage(pct), crate::scoring::ResultTier::Perfect);
    }

    #[test]
    fn scattered_answers_score_and_streak() {
        let mut s = quiz_with(10);
        let pattern = [true, false, true, true, false, false, true, false, true, true];
        for (i, ok) in pattern.iter().enumerate() {
            s.submit_answer(i, *ok).expect("answer");
            assert_invariants(&s);
        }
        assert_eq!(s.quiz().score, 60);
        assert_eq!(s.quiz().streak, 2);
        assert_eq!(s.quiz().answers.len(), 10);
        assert_eq!(s.screen(), Screen::Results);
    }

    #[test]
    fn streak_resets_on_final_wrong_answer() {
        let mut s = quiz_with(2);
        s.submit_answer(0, true).expect("first");
        s.submit_answer(1, false).expect("last");
        assert_eq!(s.quiz().streak, 0);
    }

    #[test]
    fn double_submission_is_rejected() {
        let mut s = quiz_with(3);
        s.submit_answer(0, true).expect("first");
        let before = s.quiz().clone();
        assert_eq!(
            s.submit_answer(0, true),
            Err(TransitionError::WrongQuestion { expected: 1, got: 0 })
        );
        assert_eq!(s.quiz(), &before);

        s.submit_answer(1, true).expect("second");
        s.submit_answer(2, false).expect("final");
        // Index is held at 2 on RESULTS; a replay of that index must not count.
        assert!(matches!(s.submit_answer(2, true), Err(TransitionError::InvalidScreen { .. })));
        assert_eq!(s.quiz().answers, vec![true, true, false]);
    }

    #[test]
    fn submit_outside_quiz_has_no_effect() {
        let mut s = Session::new();
        assert!(s.submit_answer(0, true).is_err());
        let t = s.start(GradeLevel::Grade2).expect("start");
        assert!(s.submit_answer(0, true).is_err());
        assert_eq!(s.quiz(), &QuizState::default());
        s.provider_failed(t, &GenerationError::Empty).expect("fail");
        assert!(s.submit_answer(0, true).is_err());
        assert_eq!(s.quiz(), &QuizState::default());
    }

    #[test]
    fn empty_list_lands_on_error() {
        let mut s = Session::new();
        let t = s.start(GradeLevel::Grade1).expect("start");
        s.questions_received(t, vec![]).expect("handled");
        assert_eq!(s.screen(), Screen::Error);
        assert_eq!(s.quiz().score, 0);
        assert!(s.questions().is_empty());
        assert_eq!(s.error_kind(), Some("empty"));
        assert_eq!(s.error_message(), Some(GENERATION_ERROR_MESSAGE));
    }

    #[test]
    fn inconsistent_question_never_reaches_quiz() {
        let mut s = Session::new();
        let t = s.start(GradeLevel::Grade4).expect("start");
        let mut qs = sample_questions(10);
        qs[3].correct_answer = "purple".into();
        s.questions_received(t, qs).expect("handled");
        assert_eq!(s.screen(), Screen::Error);
        assert_eq!(s.error_kind(), Some("malformed"));
        assert!(s.questions().is_empty());
    }

    #[test]
    fn restart_reuses_grade_and_resets_progress() {
        let mut s = quiz_with(2);
        s.submit_answer(0, true).expect("a");
        s.submit_answer(1, true).expect("b");
        let ticket = s.restart().expect("restart").expect("grade kept");
        assert_eq!(ticket.grade, GradeLevel::Grade1);
        assert_eq!(s.screen(), Screen::Loading);
        assert_eq!(s.quiz(), &QuizState::default());
        assert!(s.questions().is_empty());
    }

    #[test]
    fn stale_ticket_does_not_overwrite_new_session() {
        let mut s = Session::new();
        let old = s.start(GradeLevel::Grade1).expect("start");
        s.provider_failed(old, &GenerationError::Transport("timeout".into())).expect("fail");
        let new = s.restart().expect("restart").expect("ticket");

        assert_eq!(s.questions_received(old, sample_questions(10)), Err(TransitionError::Stale));
        assert_eq!(s.screen(), Screen::Loading);
        s.questions_received(new, sample_questions(3)).expect("fresh");
        assert_eq!(s.questions().len(), 3);
    }

    #[test]
    fn loading_blocks_other_operations() {
        let mut s = Session::new();
        s.start(GradeLevel::Grade5).expect("start");
        assert!(s.start(GradeLevel::Grade6).is_err());
        assert!(s.go_home().is_err());
        assert!(s.restart().is_err());
        assert!(s.dismiss().is_err());
        assert_eq!(s.grade(), Some(GradeLevel::Grade5));
    }

    #[test]
    fn reveal_then_advance_applies_once() {
        let mut s = quiz_with(3);
        let r = s.reveal(0, "red").expect("reveal");
        assert!(!r.correct);
        assert_eq!(r.correct_answer, "blue");
        assert_eq!(s.reveal(0, "blue"), Err(TransitionError::AlreadyAnswered(0)));
        assert_eq!(s.submit_answer(0, true), Err(TransitionError::AlreadyAnswered(0)));

        assert_eq!(s.apply_advance(r.token), Ok(AnswerOutcome::Next(1)));
        assert_eq!(s.apply_advance(r.token), Err(TransitionError::Stale));
        assert_eq!(s.quiz().answers, vec![false]);
        assert!(s.pending().is_none());
    }

    #[test]
    fn reveal_rejects_unknown_option() {
        let mut s = quiz_with(1);
        assert_eq!(s.reveal(0, "violet"), Err(TransitionError::UnknownOption(0)));
        assert!(s.pending().is_none());
    }

    #[test]
    fn advance_after_going_home_is_dropped() {
        let mut s = quiz_with(3);
        let r = s.reveal(0, "blue").expect("reveal");
        s.go_home().expect("home");
        assert_eq!(s.apply_advance(r.token), Err(TransitionError::Stale));
        assert_eq!(s.screen(), Screen::Welcome);
        assert!(s.grade().is_none());

        // Same index in a brand-new quiz still refuses the old token.
        let t = s.start(GradeLevel::Grade3).expect("start");
        s.questions_received(t, sample_questions(3)).expect("received");
        assert_eq!(s.apply_advance(r.token), Err(TransitionError::Stale));
        assert_eq!(s.quiz().answers.len(), 0);
    }

    #[test]
    fn dismiss_returns_to_welcome() {
        let mut s = Session::new();
        let t = s.start(GradeLevel::Grade1).expect("start");
        s.provider_failed(t, &GenerationError::Malformed("bad".into())).expect("fail");
        s.dismiss().expect("dismiss");
        assert_eq!(s.screen(), Screen::Welcome);
        assert!(s.error_message().is_none());
        assert!(s.start(GradeLevel::Grade2).is_ok());
    }
}
