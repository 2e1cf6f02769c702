//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Unlike the WebSocket path there is no session here, so the problem payload
//! includes its answer.

use std::sync::Arc;
use axum::{extract::{Query, State}, response::IntoResponse, Json};
use tracing::{info, instrument};

use crate::domain::GameMode;
use crate::logic;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state), fields(mode = ?q.mode))]
pub async fn http_get_problem(
  State(state): State<Arc<AppState>>,
  Query(q): Query<ProblemQuery>,
) -> impl IntoResponse {
  let mode = q.mode.unwrap_or(GameMode::Practice);
  let (p, fell_back) = logic::make_problem(&state, mode, None).await;
  info!(target: "problem", id = %p.id, ?mode, fell_back, "HTTP problem served");
  let answer = p.answer;
  Json(ProblemWithAnswerOut { problem: to_out(&p), answer })
}

#[instrument(level = "info", skip(state, body), fields(correct = body.correct))]
pub async fn http_post_feedback(
  State(state): State<Arc<AppState>>,
  Json(body): Json<FeedbackIn>,
) -> impl IntoResponse {
  let text = logic::feedback_text(&state, body.correct, body.num_a, body.num_b, body.operator).await;
  Json(FeedbackOut { text })
}
