//! Application state: in-memory session store, question provider, and settings.
//!
//! Each session lives behind its own mutex together with a `watch` channel carrying
//! the latest snapshot, so WebSocket clients see async transitions (questions
//! arriving, the advance timer firing) without polling.

use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{load_quiz_config_from_env, ProviderKind, Settings};
use crate::gemini::Gemini;
use crate::openai::OpenAI;
use crate::protocol::{to_view, SessionView};
use crate::provider::QuestionProvider;
use crate::session::Session;

/// Idle sessions are dropped after this long unless a socket is attached.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

pub struct SessionHandle {
    pub id: String,
    pub session: Mutex<Session>,
    updates: watch::Sender<SessionView>,
    touched: std::sync::Mutex<Instant>,
}

impl SessionHandle {
    fn new(id: String) -> Self {
        let session = Session::new();
        let (updates, _) = watch::channel(to_view(&id, &session));
        Self { id, session: Mutex::new(session), updates, touched: std::sync::Mutex::new(Instant::now()) }
    }

    /// Push the current snapshot to subscribers and return it.
    pub fn publish(&self, session: &Session) -> SessionView {
        self.touch();
        let view = to_view(&self.id, session);
        self.updates.send_replace(view.clone());
        view
    }

    pub fn touch(&self) {
        *self.touched.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let touched = *self.touched.lock().unwrap_or_else(|e| e.into_inner());
        now.saturating_duration_since(touched)
    }

    /// True while at least one WebSocket is attached.
    fn has_subscribers(&self) -> bool {
        self.updates.receiver_count() > 0
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.updates.subscribe()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<RwLock<HashMap<String, Arc<SessionHandle>>>>,
    pub provider: Option<Arc<dyn QuestionProvider>>,
    pub advance_delay: Duration,
    pub session_ttl: Duration,
}

impl AppState {
    /// Build state from env: load prompt config, init the configured provider.
    #[instrument(level = "info", skip_all)]
    pub fn new(settings: &Settings) -> Self {
        let prompts = load_quiz_config_from_env()
            .map(|c| c.prompts)
            .unwrap_or_default();

        let provider: Option<Arc<dyn QuestionProvider>> = match settings.provider {
            Some(ProviderKind::OpenAi) => OpenAI::from_env(prompts, settings.provider_timeout)
                .map(|p| Arc::new(p) as Arc<dyn QuestionProvider>),
            Some(ProviderKind::Gemini) => Gemini::from_env(prompts, settings.provider_timeout)
                .map(|p| Arc::new(p) as Arc<dyn QuestionProvider>),
            None => None,
        };

        match (&provider, settings.provider) {
            (Some(p), _) => info!(target: "kefenglish", provider = %p.describe(), "Question provider enabled."),
            (None, Some(kind)) => warn!(target: "kefenglish", ?kind, "Question provider could not be initialized. Every quiz start will fail."),
            (None, None) => warn!(target: "kefenglish", "No question provider (set OPENAI_API_KEY or GEMINI_API_KEY). Every quiz start will fail."),
        }

        Self::with_provider(provider, settings.advance_delay).with_session_ttl(settings.session_ttl)
    }

    pub fn with_provider(provider: Option<Arc<dyn QuestionProvider>>, advance_delay: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            provider,
            advance_delay,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn create_session(&self) -> Arc<SessionHandle> {
        let id = Uuid::new_v4().to_string();
        let handle = Arc::new(SessionHandle::new(id.clone()));
        self.sessions.write().await.insert(id, handle.clone());
        handle
    }

    #[instrument(level = "debug", skip(self), fields(%id))]
    pub async fn get_session(&self, id: &str) -> Option<Arc<SessionHandle>> {
        let handle = self.sessions.read().await.get(id).cloned()?;
        handle.touch();
        Some(handle)
    }

    /// Drop sessions idle longer than `session_ttl` that no socket is watching.
    /// Returns how many were removed.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let ttl = self.session_ttl;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, h| h.has_subscribers() || h.idle_for(now) < ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(target: "kefenglish", evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }
}

/// Periodically evict idle sessions for the lifetime of the process.
pub fn spawn_session_sweeper(state: Arc<AppState>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let evicted = state.evict_idle().await;
            debug!(target: "kefenglish", evicted, "Session sweep");
        }
    })
}
