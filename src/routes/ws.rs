//! WebSocket upgrade + message loop. Each client command is parsed as JSON and
//! forwarded to core logic; once a socket is attached to a session it also
//! receives a `session` push on every state change.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::logic::{self, ApiError};
use crate::protocol::{ClientWsMessage, ServerWsMessage, SessionView};
use crate::state::AppState;

#[instrument(level = "info", skip(state, ws))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "kefenglish", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

enum Event {
  Incoming(Option<Result<Message, axum::Error>>),
  Update(SessionView),
}

/// Per-connection state: which session this socket drives and its update feed.
#[derive(Default)]
struct Conn {
  session_id: Option<String>,
  updates: Option<watch::Receiver<SessionView>>,
  last_sent: Option<SessionView>,
}

impl Conn {
  /// Frame for a pushed snapshot, or None when the client already has it
  /// (a command reply carries the same snapshot the watch channel then repeats).
  fn push(&self, view: SessionView) -> Option<ServerWsMessage> {
    if self.last_sent.as_ref() == Some(&view) {
      return None;
    }
    Some(ServerWsMessage::Session { session: view })
  }

  fn sent(&mut self, msg: &ServerWsMessage) {
    if let ServerWsMessage::Session { session } = msg {
      self.last_sent = Some(session.clone());
    }
  }
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "kefenglish", "WebSocket connected");
  let mut conn = Conn::default();

  loop {
    let event = tokio::select! {
      incoming = socket.recv() => Event::Incoming(incoming),
      Some(view) = next_update(&mut conn.updates) => Event::Update(view),
    };

    let outgoing = match event {
      Event::Incoming(Some(Ok(Message::Text(txt)))) => {
        let reply = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(msg) => {
            debug!(target: "kefenglish", "WS received: {:?}", &msg);
            handle_client_ws(msg, &state, &mut conn).await
          }
          Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
        };
        Some(reply)
      }
      Event::Incoming(Some(Ok(Message::Ping(payload)))) => {
        let _ = socket.send(Message::Pong(payload)).await;
        None
      }
      Event::Incoming(Some(Ok(Message::Close(_)))) | Event::Incoming(None) => break,
      Event::Incoming(Some(Ok(_))) => None,
      Event::Incoming(Some(Err(e))) => {
        error!(target: "kefenglish", error = %e, "WS receive error");
        break;
      }
      Event::Update(view) => conn.push(view),
    };

    if let Some(msg) = outgoing {
      if !send_json(&mut socket, &msg).await {
        break;
      }
      conn.sent(&msg);
    }
  }
  info!(target: "kefenglish", session = ?conn.session_id, "WebSocket disconnected");
}

/// Resolves with the next snapshot, or never if the socket is not attached.
async fn next_update(updates: &mut Option<watch::Receiver<SessionView>>) -> Option<SessionView> {
  match updates {
    Some(rx) => match rx.changed().await {
      Ok(()) => Some(rx.borrow_and_update().clone()),
      Err(_) => {
        *updates = None;
        None
      }
    },
    None => std::future::pending().await,
  }
}

async fn send_json(socket: &mut WebSocket, msg: &ServerWsMessage) -> bool {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  });
  if let Err(e) = socket.send(Message::Text(out)).await {
    error!(target: "kefenglish", error = %e, "WS send error");
    return false;
  }
  true
}

#[instrument(level = "info", skip(state, conn))]
async fn handle_client_ws(msg: ClientWsMessage, state: &Arc<AppState>, conn: &mut Conn) -> ServerWsMessage {
  let result = match msg {
    ClientWsMessage::Ping => return ServerWsMessage::Pong,

    ClientWsMessage::CreateSession => {
      let view = logic::create_session(state).await;
      attach(state, conn, &view.id).await.map(|()| view)
    }

    ClientWsMessage::Attach { session_id } => match attach(state, conn, &session_id).await {
      Ok(()) => logic::session_view(state, &session_id).await,
      Err(e) => Err(e),
    },

    ClientWsMessage::Start { grade } => match &conn.session_id {
      Some(id) => logic::start_quiz(state, id, grade).await,
      None => return not_attached(),
    },

    ClientWsMessage::Answer { question_index, option } => match &conn.session_id {
      Some(id) => {
        return match logic::answer(state, id, question_index, &option).await {
          Ok(out) => ServerWsMessage::Revealed(out),
          Err(e) => ServerWsMessage::Error { message: e.to_string() },
        }
      }
      None => return not_attached(),
    },

    ClientWsMessage::Home => match &conn.session_id {
      Some(id) => logic::go_home(state, id).await,
      None => return not_attached(),
    },

    ClientWsMessage::Restart => match &conn.session_id {
      Some(id) => logic::restart(state, id).await,
      None => return not_attached(),
    },

    ClientWsMessage::Dismiss => match &conn.session_id {
      Some(id) => logic::dismiss(state, id).await,
      None => return not_attached(),
    },
  };

  match result {
    Ok(session) => ServerWsMessage::Session { session },
    Err(e) => ServerWsMessage::Error { message: e.to_string() },
  }
}

async fn attach(state: &AppState, conn: &mut Conn, id: &str) -> Result<(), ApiError> {
  let handle = logic::lookup(state, id).await?;
  let mut rx = handle.subscribe();
  // The reply to this command already carries the current snapshot.
  rx.borrow_and_update();
  conn.session_id = Some(id.to_string());
  conn.updates = Some(rx);
  info!(target: "quiz", %id, "WebSocket attached to session");
  Ok(())
}

fn not_attached() -> ServerWsMessage {
  ServerWsMessage::Error { message: "Not attached to a session; send create_session or attach first.".into() }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use futures_util::{SinkExt, StreamExt};
  use serde_json::{json, Value};
  use tokio::net::{TcpListener, TcpStream};
  use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

  use super::*;
  use crate::logic::tests::FakeProvider;
  use crate::protocol::to_view;
  use crate::provider::QuestionProvider;
  use crate::routes::api_router;
  use crate::session::Session;

  type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

  async fn connect(state: Arc<AppState>) -> Client {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move { axum::serve(listener, api_router(state)).await.expect("serve") });
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.expect("connect");
    ws
  }

  async fn send(ws: &mut Client, v: Value) {
    ws.send(WsMessage::text(v.to_string())).await.expect("send");
  }

  async fn recv(ws: &mut Client) -> Value {
    loop {
      let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("socket closed")
        .expect("frame");
      if let WsMessage::Text(txt) = frame {
        return serde_json::from_str(txt.as_str()).expect("json");
      }
    }
  }

  async fn assert_quiet(ws: &mut Client) {
    let extra = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(extra.is_err(), "unexpected frame: {:?}", extra);
  }

  #[test]
  fn snapshot_already_sent_is_not_pushed_again() {
    let mut conn = Conn::default();
    let view = to_view("abc", &Session::new());
    assert!(conn.push(view.clone()).is_some());

    conn.sent(&ServerWsMessage::Session { session: view.clone() });
    assert!(conn.push(view.clone()).is_none());

    let mut changed = view;
    changed.score = 10;
    assert!(conn.push(changed).is_some());
  }

  #[tokio::test]
  async fn socket_gets_one_frame_per_state_change() {
    let provider = FakeProvider::ok(3) as Arc<dyn QuestionProvider>;
    let state = Arc::new(AppState::with_provider(Some(provider), Duration::from_millis(100)));
    let mut ws = connect(state).await;

    send(&mut ws, json!({"type": "create_session"})).await;
    let v = recv(&mut ws).await;
    assert_eq!(v["type"], "session");
    assert_eq!(v["session"]["screen"], "WELCOME");

    send(&mut ws, json!({"type": "start", "grade": "grade1"})).await;
    let v = recv(&mut ws).await;
    assert_eq!(v["session"]["screen"], "LOADING");
    // Questions arrive asynchronously and are pushed without polling.
    let v = recv(&mut ws).await;
    assert_eq!(v["session"]["screen"], "QUIZ");
    assert_eq!(v["session"]["currentQuestionIndex"], 0);
    assert!(v["session"]["question"].get("correctAnswer").is_none());

    send(&mut ws, json!({"type": "answer", "questionIndex": 0, "option": "blue"})).await;
    let v = recv(&mut ws).await;
    assert_eq!(v["type"], "revealed");
    assert_eq!(v["correct"], true);
    let v = recv(&mut ws).await;
    assert_eq!(v["session"]["revealed"]["correctAnswer"], "blue");
    // The advance timer moves the quiz on by itself.
    let v = recv(&mut ws).await;
    assert_eq!(v["session"]["currentQuestionIndex"], 1);
    assert_eq!(v["session"]["score"], 10);
    assert!(v["session"].get("revealed").is_none());

    assert_quiet(&mut ws).await;
  }

  #[tokio::test]
  async fn commands_need_an_attached_session() {
    let state = Arc::new(AppState::with_provider(None, Duration::from_millis(100)));
    let mut ws = connect(state).await;

    send(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut ws).await["type"], "pong");

    send(&mut ws, json!({"type": "home"})).await;
    let v = recv(&mut ws).await;
    assert_eq!(v["type"], "error");
    assert!(v["message"].as_str().expect("message").contains("attach"));

    send(&mut ws, json!({"type": "attach", "sessionId": "missing"})).await;
    assert_eq!(recv(&mut ws).await["type"], "error");

    send(&mut ws, json!({"type": "bogus"})).await;
    let v = recv(&mut ws).await;
    assert!(v["message"].as_str().expect("message").starts_with("Invalid JSON"));
  }
}
