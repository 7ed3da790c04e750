//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented; errors map to 400/404/409 JSON bodies.

use std::sync::Arc;
use axum::{
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use tracing::{info, instrument, warn};

use crate::logic::{self, ApiError};
use crate::protocol::*;
use crate::session::TransitionError;
use crate::state::AppState;

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self {
      ApiError::UnknownSession(_) => StatusCode::NOT_FOUND,
      ApiError::Transition(TransitionError::UnknownOption(_)) => StatusCode::BAD_REQUEST,
      ApiError::Transition(_) => StatusCode::CONFLICT,
    };
    warn!(target: "quiz", %status, error = %self, "Request rejected");
    (status, Json(ErrorOut { error: self.to_string() })).into_response()
  }
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let provider = state.provider.as_ref().map(|p| p.describe());
  Json(HealthOut { ok: true, provider })
}

#[instrument(level = "info")]
pub async fn http_grades() -> impl IntoResponse {
  Json(grades_out())
}

#[instrument(level = "info", skip(state))]
pub async fn http_create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let view = logic::create_session(&state).await;
  (StatusCode::CREATED, Json(view))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
  Ok(Json(logic::session_view(&state, &id).await?))
}

#[instrument(level = "info", skip(state, body), fields(grade = %body.grade))]
pub async fn http_start(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<StartIn>,
) -> Result<Json<SessionView>, ApiError> {
  let view = logic::start_quiz(&state, &id, body.grade).await?;
  info!(target: "quiz", %id, grade = %body.grade, "HTTP start accepted");
  Ok(Json(view))
}

#[instrument(level = "info", skip(state, body), fields(question_index = body.question_index, option_len = body.option.len()))]
pub async fn http_answer(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<AnswerIn>,
) -> Result<Json<RevealOut>, ApiError> {
  let out = logic::answer(&state, &id, body.question_index, &body.option).await?;
  Ok(Json(out))
}

#[instrument(level = "info", skip(state))]
pub async fn http_home(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
  Ok(Json(logic::go_home(&state, &id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_restart(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
  Ok(Json(logic::restart(&state, &id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_dismiss(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
  Ok(Json(logic::dismiss(&state, &id).await?))
}
