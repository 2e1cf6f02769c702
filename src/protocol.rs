//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{AnswerStatus, GameMode, Operator, Problem, ProblemSource, SoundCue, TeachingState};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
  Ping,
  NewProblem,
  PushDigit { digit: u8 },
  ClearInput,
  SubmitAnswer,
  Replay,
  NextProblem,
  SwitchMode { mode: GameMode },
  SetSound { enabled: bool },
}

/// Messages the server pushes over WebSocket. Teaching runs emit
/// `Teaching`/`Speak`/`Sound` asynchronously, so the stream is not
/// one-reply-per-request.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
  Pong,
  Problem {
    problem: ProblemOut,
    mode: GameMode,
    score: u32,
  },
  Input {
    value: String,
  },
  AnswerResult {
    status: AnswerStatus,
    score: u32,
  },
  Feedback {
    text: String,
  },
  StatusReset,
  Teaching {
    #[serde(flatten)]
    state: TeachingState,
  },
  TeachingDone,
  /// Narration request; the client cancels any in-flight utterance first.
  Speak {
    text: String,
  },
  Sound {
    cue: SoundCue,
  },
  Loading {
    active: bool,
    message: String,
  },
  Error {
    message: String,
  },
}

/// DTO used by both WS and HTTP for problem delivery. The answer is withheld
/// on the WS path (the server evaluates submissions).
#[derive(Debug, Serialize, PartialEq)]
pub struct ProblemOut {
  pub id: String,
  pub num_a: u8,
  pub num_b: u8,
  pub operator: Operator,
  pub emoji: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub story: Option<String>,
  pub source: ProblemSource,
}

/// Convert full `Problem` (internal) to the public DTO.
pub fn to_out(p: &Problem) -> ProblemOut {
  ProblemOut {
    id: p.id.clone(),
    num_a: p.num_a,
    num_b: p.num_b,
    operator: p.operator,
    emoji: p.emoji.clone(),
    story: p.story.clone(),
    source: p.source,
  }
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct ProblemQuery {
  pub mode: Option<GameMode>,
}

/// Stateless HTTP variant: includes the answer so a client without a session
/// can check locally.
#[derive(Serialize)]
pub struct ProblemWithAnswerOut {
  #[serde(flatten)]
  pub problem: ProblemOut,
  pub answer: u8,
}

#[derive(Deserialize)]
pub struct FeedbackIn {
  pub correct: bool,
  pub num_a: u8,
  pub num_b: u8,
  pub operator: Operator,
}
#[derive(Serialize)]
pub struct FeedbackOut {
  pub text: String,
}

#[derive(Serialize)]
pub struct HealthOut {
  pub ok: bool,
}
