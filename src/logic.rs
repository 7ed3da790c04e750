//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Session lookup and transition dispatch (start, answer, home, restart, dismiss)
//!   - Running the question provider for a request ticket
//!   - The delayed advance after an answer is revealed

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::domain::GradeLevel;
use crate::protocol::{reveal_out, to_view, RevealOut, SessionView};
use crate::provider::GenerationError;
use crate::session::{AdvanceToken, RequestTicket, Session, TransitionError};
use crate::state::{AppState, SessionHandle};

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("unknown session `{0}`")]
  UnknownSession(String),
  #[error(transparent)]
  Transition(#[from] TransitionError),
}

#[instrument(level = "info", skip(state))]
pub async fn create_session(state: &AppState) -> SessionView {
  let handle = state.create_session().await;
  info!(target: "quiz", id = %handle.id, "Session created");
  let s = handle.session.lock().await;
  handle.publish(&s)
}

pub async fn lookup(state: &AppState, id: &str) -> Result<Arc<SessionHandle>, ApiError> {
  state.get_session(id).await.ok_or_else(|| ApiError::UnknownSession(id.to_string()))
}

#[instrument(level = "debug", skip(state), fields(%id))]
pub async fn session_view(state: &AppState, id: &str) -> Result<SessionView, ApiError> {
  let handle = lookup(state, id).await?;
  let s = handle.session.lock().await;
  Ok(to_view(&handle.id, &s))
}

/// Apply one synchronous transition and publish the resulting snapshot.
async fn transition<T>(
  handle: &SessionHandle,
  f: impl FnOnce(&mut Session) -> Result<T, TransitionError>,
) -> Result<(T, SessionView), ApiError> {
  let mut s = handle.session.lock().await;
  let out = f(&mut s)?;
  Ok((out, handle.publish(&s)))
}

#[instrument(level = "info", skip(state), fields(%id, %grade))]
pub async fn start_quiz(state: &Arc<AppState>, id: &str, grade: GradeLevel) -> Result<SessionView, ApiError> {
  let handle = lookup(state, id).await?;
  let (ticket, view) = transition(&handle, |s| s.start(grade)).await?;
  spawn_generation(state.clone(), handle, ticket);
  Ok(view)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn restart(state: &Arc<AppState>, id: &str) -> Result<SessionView, ApiError> {
  let handle = lookup(state, id).await?;
  let (ticket, view) = transition(&handle, Session::restart).await?;
  if let Some(ticket) = ticket {
    spawn_generation(state.clone(), handle, ticket);
  }
  Ok(view)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn go_home(state: &AppState, id: &str) -> Result<SessionView, ApiError> {
  let handle = lookup(state, id).await?;
  let ((), view) = transition(&handle, Session::go_home).await?;
  Ok(view)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn dismiss(state: &AppState, id: &str) -> Result<SessionView, ApiError> {
  let handle = lookup(state, id).await?;
  let ((), view) = transition(&handle, Session::dismiss).await?;
  Ok(view)
}

/// Reveal the chosen option now; the answer is applied after `advance_delay`.
#[instrument(level = "info", skip(state, option), fields(%id))]
pub async fn answer(
  state: &AppState,
  id: &str,
  question_index: usize,
  option: &str,
) -> Result<RevealOut, ApiError> {
  let handle = lookup(state, id).await?;
  let (reveal, _view) = transition(&handle, |s| s.reveal(question_index, option)).await?;
  info!(target: "quiz", %id, question_index, correct = reveal.correct, "Answer revealed");
  spawn_advance(handle, reveal.token, state.advance_delay);
  Ok(reveal_out(&reveal, option))
}

fn spawn_generation(state: Arc<AppState>, handle: Arc<SessionHandle>, ticket: RequestTicket) {
  tokio::spawn(async move { run_generation(&state, &handle, ticket).await });
}

/// Call the provider for `ticket` and feed the outcome back into the session.
/// A result for a ticket the session no longer expects is dropped.
#[instrument(level = "info", skip(state, handle, ticket), fields(id = %handle.id, grade = %ticket.grade, epoch = ticket.epoch))]
pub async fn run_generation(state: &AppState, handle: &SessionHandle, ticket: RequestTicket) {
  let result = match &state.provider {
    Some(p) => p.generate_questions(ticket.grade).await,
    None => Err(GenerationError::NotConfigured),
  };

  let mut s = handle.session.lock().await;
  let applied = match result {
    Ok(questions) => s.questions_received(ticket, questions),
    Err(e) => s.provider_failed(ticket, &e),
  };
  match applied {
    Ok(()) => {
      handle.publish(&s);
    }
    Err(e) => debug!(target: "quiz", id = %handle.id, error = %e, "Discarding stale generation result"),
  }
}

fn spawn_advance(handle: Arc<SessionHandle>, token: AdvanceToken, delay: Duration) {
  tokio::spawn(async move {
    tokio::time::sleep(delay).await;
    let mut s = handle.session.lock().await;
    match s.apply_advance(token) {
      Ok(outcome) => {
        debug!(target: "quiz", id = %handle.id, ?outcome, "Advance applied");
        handle.publish(&s);
      }
      Err(e) => debug!(target: "quiz", id = %handle.id, error = %e, "Advance dropped"),
    }
  });
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use std::sync::Mutex as StdMutex;

  use async_trait::async_trait;

  use crate::domain::{Question, Screen};
  use crate::provider::QuestionProvider;
  use crate::session::tests::sample_questions;

  pub(crate) struct FakeProvider {
    calls: StdMutex<Vec<GradeLevel>>,
    result: Result<Vec<Question>, GenerationError>,
    latency: Duration,
  }

  impl FakeProvider {
    pub(crate) fn ok(n: usize) -> Arc<Self> {
      Self::with(Ok(sample_questions(n)))
    }

    fn with(result: Result<Vec<Question>, GenerationError>) -> Arc<Self> {
      Arc::new(Self { calls: StdMutex::new(vec![]), result, latency: Duration::from_millis(300) })
    }

    fn calls(&self) -> Vec<GradeLevel> {
      self.calls.lock().expect("poisoned").clone()
    }
  }

  #[async_trait]
  impl QuestionProvider for FakeProvider {
    fn describe(&self) -> String {
      "fake".into()
    }

    async fn generate_questions(&self, grade: GradeLevel) -> Result<Vec<Question>, GenerationError> {
      self.calls.lock().expect("poisoned").push(grade);
      tokio::time::sleep(self.latency).await;
      self.result.clone()
    }
  }

  fn app(provider: Option<Arc<FakeProvider>>) -> Arc<AppState> {
    let provider = provider.map(|p| p as Arc<dyn QuestionProvider>);
    Arc::new(AppState::with_provider(provider, Duration::from_secs(2)))
  }

  async fn wait_for(handle: &SessionHandle, screen: Screen) -> SessionView {
    let mut rx = handle.subscribe();
    loop {
      {
        let v = rx.borrow_and_update();
        if v.screen == screen {
          return (*v).clone();
        }
      }
      rx.changed().await.expect("sender alive");
    }
  }

  async fn started(state: &Arc<AppState>, grade: GradeLevel) -> Arc<SessionHandle> {
    let id = create_session(state).await.id;
    let view = start_quiz(state, &id, grade).await.expect("start");
    assert_eq!(view.screen, Screen::Loading);
    let handle = lookup(state, &id).await.expect("session");
    wait_for(&handle, Screen::Quiz).await;
    handle
  }

  #[tokio::test(start_paused = true)]
  async fn full_quiz_through_delayed_advance() {
    let provider = FakeProvider::ok(10);
    let state = app(Some(provider.clone()));
    let handle = started(&state, GradeLevel::Grade1).await;
    assert_eq!(provider.calls(), vec![GradeLevel::Grade1]);

    for i in 0..10 {
      let r = answer(&state, &handle.id, i, "blue").await.expect("answer");
      assert!(r.correct);
      let view = session_view(&state, &handle.id).await.expect("view");
      assert_eq!(view.current_question_index, i);
      assert!(view.revealed.is_some());
      tokio::time::sleep(Duration::from_millis(2100)).await;
    }

    let view = session_view(&state, &handle.id).await.expect("view");
    assert_eq!(view.screen, Screen::Results);
    assert_eq!(view.score, 100);
    assert_eq!(view.current_question_index, 9);
    assert_eq!(view.results.expect("results").percentage, 100.0);
  }

  #[tokio::test(start_paused = true)]
  async fn second_answer_during_feedback_is_rejected() {
    let state = app(Some(FakeProvider::ok(3)));
    let handle = started(&state, GradeLevel::Grade3).await;

    answer(&state, &handle.id, 0, "red").await.expect("first");
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let err = answer(&state, &handle.id, 0, "blue").await.expect_err("duplicate");
    assert!(matches!(err, ApiError::Transition(TransitionError::AlreadyAnswered(0))));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let view = session_view(&state, &handle.id).await.expect("view");
    assert_eq!(view.answers, vec![false]);
    assert_eq!(view.current_question_index, 1);
    assert_eq!(view.streak, 0);
  }

  #[tokio::test(start_paused = true)]
  async fn going_home_abandons_pending_advance() {
    let state = app(Some(FakeProvider::ok(3)));
    let handle = started(&state, GradeLevel::Grade2).await;

    answer(&state, &handle.id, 0, "blue").await.expect("answer");
    let view = go_home(&state, &handle.id).await.expect("home");
    assert_eq!(view.screen, Screen::Welcome);

    tokio::time::sleep(Duration::from_secs(3)).await;
    let view = session_view(&state, &handle.id).await.expect("view");
    assert_eq!(view.screen, Screen::Welcome);
    assert!(view.answers.is_empty());
    assert_eq!(view.score, 0);
    assert!(view.grade.is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn provider_failure_shows_error_then_dismiss() {
    let state = app(Some(FakeProvider::with(Err(GenerationError::Malformed("bad json".into())))));
    let id = create_session(&state).await.id;
    start_quiz(&state, &id, GradeLevel::Grade5).await.expect("start");
    let handle = lookup(&state, &id).await.expect("session");

    let view = wait_for(&handle, Screen::Error).await;
    assert_eq!(view.error_message.as_deref(), Some(crate::session::GENERATION_ERROR_MESSAGE));
    assert_eq!(view.score, 0);
    assert_eq!(handle.session.lock().await.error_kind(), Some("malformed"));

    let view = dismiss(&state, &id).await.expect("dismiss");
    assert_eq!(view.screen, Screen::Welcome);
  }

  #[tokio::test(start_paused = true)]
  async fn missing_provider_lands_on_error() {
    let state = app(None);
    let id = create_session(&state).await.id;
    start_quiz(&state, &id, GradeLevel::Grade1).await.expect("start");
    let handle = lookup(&state, &id).await.expect("session");
    wait_for(&handle, Screen::Error).await;
    assert_eq!(handle.session.lock().await.error_kind(), Some("not_configured"));
  }

  #[tokio::test(start_paused = true)]
  async fn restart_requests_same_grade_and_resets() {
    let provider = FakeProvider::ok(1);
    let state = app(Some(provider.clone()));
    let handle = started(&state, GradeLevel::Grade4).await;

    answer(&state, &handle.id, 0, "blue").await.expect("answer");
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(session_view(&state, &handle.id).await.expect("view").screen, Screen::Results);

    let view = restart(&state, &handle.id).await.expect("restart");
    assert_eq!(view.screen, Screen::Loading);
    assert_eq!(view.score, 0);
    assert_eq!(view.streak, 0);
    assert!(view.answers.is_empty());
    assert_eq!(view.current_question_index, 0);

    wait_for(&handle, Screen::Quiz).await;
    assert_eq!(provider.calls(), vec![GradeLevel::Grade4, GradeLevel::Grade4]);
  }

  #[tokio::test(start_paused = true)]
  async fn loading_rejects_navigation() {
    let state = app(Some(FakeProvider::ok(2)));
    let id = create_session(&state).await.id;
    start_quiz(&state, &id, GradeLevel::Grade1).await.expect("start");
    assert!(go_home(&state, &id).await.is_err());
    assert!(start_quiz(&state, &id, GradeLevel::Grade2).await.is_err());
    assert!(answer(&state, &id, 0, "blue").await.is_err());
  }

  #[tokio::test]
  async fn unknown_session_is_reported() {
    let state = app(None);
    let err = session_view(&state, "nope").await.expect_err("unknown");
    assert!(matches!(err, ApiError::UnknownSession(_)));
  }
}
