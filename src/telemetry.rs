//! Tracing setup for the quiz server.
//!
//! - `LOG_LEVEL` (or `RUST_LOG`) holds the filter, e.g. "debug" or
//!   "info,quiz=debug,kefenglish=debug,tower_http=info,axum=info".
//! - `LOG_FORMAT=json` switches to one JSON object per line; anything else is human readable.
//!
//! Targets: `quiz` for session transitions, `kefenglish` for the server and providers.
//! Per-request spans come from tower-http's `TraceLayer`.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,quiz=debug,kefenglish=debug,tower_http=info,axum=info";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_env_value(v: Option<&str>) -> Self {
        match v.map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

pub fn init_tracing() {
    let format = LogFormat::from_env_value(std::env::var("LOG_FORMAT").ok().as_deref());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    // The two builders have different types; each arm installs its own.
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
    tracing::debug!(target: "kefenglish", ?format, "Tracing initialized");
}
