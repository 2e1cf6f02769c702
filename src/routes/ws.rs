//! WebSocket upgrade + message loop. Each connection owns one game session.
//! Client messages are parsed as JSON and forwarded to the session handlers;
//! server messages (including the teaching sequencer's asynchronous state
//! updates, narration, and sound cues) flow back through an unbounded channel.

use std::sync::Arc;

use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument};

use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::session::{self, Session, SessionCtx};
use crate::state::AppState;
use crate::util::trunc_for_log;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "suanbao_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
  info!(target: "suanbao_backend", "WebSocket connected");
  let (mut ws_tx, mut ws_rx) = socket.split();
  let (tx, mut rx) = mpsc::unbounded_channel::<ServerWsMessage>();

  // Writer task: serialize and forward everything the session pushes.
  let writer = tokio::spawn(async move {
    while let Some(msg) = rx.recv().await {
      let out = serde_json::to_string(&msg).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
      });
      if let Err(e) = ws_tx.send(Message::Text(out)).await {
        error!(target: "suanbao_backend", error = %e, "WS send error");
        break;
      }
    }
  });

  let ctx = SessionCtx {
    state,
    session: Arc::new(Mutex::new(Session::new())),
    tx,
  };

  // Every session opens on a practice problem.
  session::new_problem(&ctx).await;

  while let Some(Ok(msg)) = ws_rx.next().await {
    match msg {
      Message::Text(txt) => match serde_json::from_str::<ClientWsMessage>(&txt) {
        Ok(incoming) => {
          debug!(target: "suanbao_backend", "WS received: {:?}", &incoming);
          session::handle_message(&ctx, incoming).await;
        }
        Err(e) => {
          debug!(target: "suanbao_backend", payload = %trunc_for_log(&txt, 120), "WS invalid JSON");
          session::send(&ctx.tx, ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) });
        }
      },
      Message::Close(_) => break,
      _ => {}
    }
  }

  // Stop any live teaching run so it quits mutating immediately.
  {
    let s = ctx.session.lock().await;
    s.runs.cancel_all();
  }
  drop(ctx);
  let _ = writer.await;
  info!(target: "suanbao_backend", "WebSocket disconnected");
}
