//! KefEnglish · English quiz backend for Hebrew-speaking kids
//!
//! - Axum HTTP + WebSocket API driving one quiz session state machine per client
//! - Question generation via OpenAI or Gemini structured output
//! - Static SPA fallback (STATIC_DIR/index.html)
//!
//! Important env variables:
//!   PORT                  : u16 (default 3000)
//!   STATIC_DIR            : front-end bundle directory (default ./static)
//!   QUESTION_PROVIDER     : "openai" | "gemini" (default: whichever key is set)
//!   OPENAI_API_KEY        : enables the OpenAI provider
//!   OPENAI_BASE_URL       : default "https://api.openai.com/v1"
//!   OPENAI_MODEL          : default "gpt-4o-mini"
//!   GEMINI_API_KEY        : enables the Gemini provider (API_KEY also accepted)
//!   GEMINI_BASE_URL       : default "https://generativelanguage.googleapis.com/v1beta"
//!   GEMINI_MODEL          : default "gemini-2.5-flash"
//!   PROVIDER_TIMEOUT_SECS : model request timeout (default 30)
//!   ADVANCE_DELAY_MS      : answer feedback delay before the next question (default 2000)
//!   SESSION_TTL_SECS      : idle sessions without a socket are dropped after this (default 1800)
//!   SESSION_SWEEP_SECS    : how often idle sessions are swept (default 60)
//!   QUIZ_CONFIG_PATH      : path to TOML prompt overrides
//!   LOG_LEVEL             : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT            : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod scoring;
mod config;
mod session;
mod provider;
mod openai;
mod gemini;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Settings;
use crate::routes::build_router;
use crate::state::{spawn_session_sweeper, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let settings = Settings::from_env();
  let state = Arc::new(AppState::new(&settings));
  spawn_session_sweeper(state.clone(), settings.sweep_interval);
  let app = build_router(state.clone(), &settings.static_dir);

  let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
  let listener = TcpListener::bind(addr).await?;
  info!(target: "kefenglish", %addr, advance_delay_ms = settings.advance_delay.as_millis() as u64, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "kefenglish", error = %e, "Failed to listen for ctrl-c");
    std::future::pending::<()>().await;
  }
  info!(target: "kefenglish", "Shutdown signal received");
}
