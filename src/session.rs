//! Per-connection session: problem lifecycle, input accumulation, scoring,
//! and wiring user actions to the teaching sequencer.
//!
//! Exactly one mutator is active at any time: either a message handler here
//! or the currently-live teaching run. A new problem request first invalidates
//! every run token, so a stale run stops mutating before the new problem's
//! state is installed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use crate::domain::{AnswerStatus, GameMode, Problem, ProblemSource, SoundCue, TeachingState};
use crate::logic;
use crate::protocol::{to_out, ClientWsMessage, ServerWsMessage};
use crate::state::AppState;
use crate::teaching::{RunRegistry, TeachingRun, TeachingSink};

const MAX_INPUT_DIGITS: usize = 2;
const SCORE_PER_CORRECT: u32 = 10;
/// Wrong answers auto-return to IDLE after this long.
const WRONG_RESET_DELAY: Duration = Duration::from_secs(2);
/// Short settle before a fresh problem is read aloud.
const ANNOUNCE_DELAY: Duration = Duration::from_millis(500);

const LOADING_MSG: &str = "AI正在思考题目...";
const THINKING_LINE: &str = "让我想一个有趣的故事...";
const FALLBACK_MSG: &str = "网络开小差了，试试普通模式吧！";

pub struct Session {
  pub mode: GameMode,
  pub problem: Option<Problem>,
  pub input: String,
  pub status: AnswerStatus,
  pub score: u32,
  pub last_signature: Option<String>,
  pub teaching: Arc<RwLock<TeachingState>>,
  pub runs: RunRegistry,
  pub animating: Arc<AtomicBool>,
  pub sound_enabled: Arc<AtomicBool>,
  pub show_next: Arc<AtomicBool>,
}

impl Session {
  pub fn new() -> Self {
    Self {
      mode: GameMode::Practice,
      problem: None,
      input: String::new(),
      status: AnswerStatus::Idle,
      score: 0,
      last_signature: None,
      teaching: Arc::new(RwLock::new(TeachingState::default())),
      runs: RunRegistry::new(),
      animating: Arc::new(AtomicBool::new(false)),
      sound_enabled: Arc::new(AtomicBool::new(true)),
      show_next: Arc::new(AtomicBool::new(false)),
    }
  }
}

/// Everything a handler needs: shared app state, the session, and the
/// outbound message channel.
#[derive(Clone)]
pub struct SessionCtx {
  pub state: Arc<AppState>,
  pub session: Arc<Mutex<Session>>,
  pub tx: UnboundedSender<ServerWsMessage>,
}

/// Best-effort send; the writer task may already be gone on disconnect.
pub fn send(tx: &UnboundedSender<ServerWsMessage>, msg: ServerWsMessage) {
  if tx.send(msg).is_err() {
    debug!(target: "suanbao_backend", "WS client gone; dropping message");
  }
}

fn cue(tx: &UnboundedSender<ServerWsMessage>, sound_on: bool, cue: SoundCue) {
  if sound_on {
    send(tx, ServerWsMessage::Sound { cue });
  }
}

/// Teaching sink backed by the connection's outbound channel. Send failures
/// are logged and suppressed; they never block the sequencer's timing.
struct WsSink {
  tx: UnboundedSender<ServerWsMessage>,
  show_next: Arc<AtomicBool>,
}

impl TeachingSink for WsSink {
  fn state_changed(&self, state: TeachingState) {
    send(&self.tx, ServerWsMessage::Teaching { state });
  }
  fn speak(&self, text: &str) {
    send(&self.tx, ServerWsMessage::Speak { text: text.into() });
  }
  fn play(&self, cue: SoundCue) {
    send(&self.tx, ServerWsMessage::Sound { cue });
  }
  fn completed(&self) {
    self.show_next.store(true, Ordering::Relaxed);
    send(&self.tx, ServerWsMessage::TeachingDone);
  }
}

#[instrument(level = "debug", skip(ctx, msg))]
pub async fn handle_message(ctx: &SessionCtx, msg: ClientWsMessage) {
  match msg {
    ClientWsMessage::Ping => send(&ctx.tx, ServerWsMessage::Pong),

    ClientWsMessage::NewProblem => new_problem(ctx).await,

    ClientWsMessage::PushDigit { digit } => push_digit(ctx, digit).await,

    ClientWsMessage::ClearInput => {
      let mut s = ctx.session.lock().await;
      cue(&ctx.tx, s.sound_enabled.load(Ordering::Relaxed), SoundCue::Click);
      s.input.clear();
      send(&ctx.tx, ServerWsMessage::Input { value: String::new() });
    }

    ClientWsMessage::SubmitAnswer => submit(ctx).await,

    ClientWsMessage::Replay => replay(ctx).await,

    ClientWsMessage::NextProblem => {
      {
        let s = ctx.session.lock().await;
        cue(&ctx.tx, s.sound_enabled.load(Ordering::Relaxed), SoundCue::Click);
      }
      new_problem(ctx).await;
    }

    ClientWsMessage::SwitchMode { mode } => {
      {
        let mut s = ctx.session.lock().await;
        cue(&ctx.tx, s.sound_enabled.load(Ordering::Relaxed), SoundCue::Click);
        s.mode = mode;
      }
      info!(target: "suanbao_backend", ?mode, "Mode switched");
      new_problem(ctx).await;
    }

    ClientWsMessage::SetSound { enabled } => {
      let s = ctx.session.lock().await;
      s.sound_enabled.store(enabled, Ordering::Relaxed);
      // Click only when turning sound on; staying silent otherwise.
      cue(&ctx.tx, enabled, SoundCue::Click);
    }
  }
}

async fn push_digit(ctx: &SessionCtx, digit: u8) {
  if digit > 9 {
    send(&ctx.tx, ServerWsMessage::Error { message: format!("Not a digit: {}", digit) });
    return;
  }
  let mut s = ctx.session.lock().await;
  // The pad only accepts digits while the answer is still open; after a
  // correct answer input stays frozen until the next problem.
  if s.status != AnswerStatus::Idle {
    return;
  }
  cue(&ctx.tx, s.sound_enabled.load(Ordering::Relaxed), SoundCue::Click);
  if s.input.len() < MAX_INPUT_DIGITS {
    s.input.push((b'0' + digit) as char);
  }
  send(&ctx.tx, ServerWsMessage::Input { value: s.input.clone() });
}

/// Create and install a fresh problem for the session's current mode.
/// Cancels any live teaching run before touching state.
#[instrument(level = "info", skip(ctx))]
pub async fn new_problem(ctx: &SessionCtx) {
  let (mode, last_sig, sound_on) = {
    let mut s = ctx.session.lock().await;
    s.runs.cancel_all();
    s.animating.store(false, Ordering::Relaxed);
    s.show_next.store(false, Ordering::Relaxed);
    s.problem = None;
    s.input.clear();
    s.status = AnswerStatus::Idle;

    let mut t = s.teaching.write().await;
    *t = TeachingState::default();
    send(&ctx.tx, ServerWsMessage::Teaching { state: *t });
    drop(t);

    (s.mode, s.last_signature.clone(), s.sound_enabled.load(Ordering::Relaxed))
  };

  if mode == GameMode::Story {
    send(&ctx.tx, ServerWsMessage::Loading { active: true, message: LOADING_MSG.into() });
    if sound_on {
      send(&ctx.tx, ServerWsMessage::Speak { text: THINKING_LINE.into() });
    }
  }

  let (problem, fell_back) = logic::make_problem(&ctx.state, mode, last_sig.as_deref()).await;

  let (narration, announce_token) = {
    let mut s = ctx.session.lock().await;
    if problem.source == ProblemSource::Local {
      s.last_signature = Some(Problem::signature(problem.operator, problem.num_a, problem.num_b));
    }
    s.problem = Some(problem.clone());

    if mode == GameMode::Story {
      send(&ctx.tx, ServerWsMessage::Loading { active: false, message: String::new() });
    }
    if fell_back {
      send(&ctx.tx, ServerWsMessage::Feedback { text: FALLBACK_MSG.into() });
    }
    send(&ctx.tx, ServerWsMessage::Problem {
      problem: to_out(&problem),
      mode,
      score: s.score,
    });
    info!(target: "problem", id = %problem.id, ?mode, source = ?problem.source, "Problem served");

    (logic::problem_narration(&problem, mode), s.runs.begin())
  };

  // Read the problem aloud after a short settle; a newer problem or teaching
  // run supersedes this via the token.
  let tx = ctx.tx.clone();
  let sound_enabled = { ctx.session.lock().await.sound_enabled.clone() };
  tokio::spawn(async move {
    tokio::time::sleep(ANNOUNCE_DELAY).await;
    if announce_token.is_live() && sound_enabled.load(Ordering::Relaxed) {
      send(&tx, ServerWsMessage::Speak { text: narration });
    }
  });
}

#[instrument(level = "info", skip(ctx))]
async fn submit(ctx: &SessionCtx) {
  let mut s = ctx.session.lock().await;
  let Some(problem) = s.problem.clone() else {
    return;
  };
  // Idempotent while status != IDLE: further submits are ignored.
  if s.status != AnswerStatus::Idle {
    return;
  }
  let sound_on = s.sound_enabled.load(Ordering::Relaxed);
  let correct = s.input.parse::<u8>().ok() == Some(problem.answer);

  if correct {
    s.status = AnswerStatus::Correct;
    s.score += SCORE_PER_CORRECT;
    let score = s.score;
    drop(s);

    cue(&ctx.tx, sound_on, SoundCue::Correct);
    send(&ctx.tx, ServerWsMessage::AnswerResult { status: AnswerStatus::Correct, score });
    info!(target: "problem", id = %problem.id, score, "Answer correct");

    // Praise text arrives whenever it arrives; teaching starts right away.
    spawn_feedback(ctx, true, &problem, false);
    start_teaching(ctx, problem).await;
  } else {
    s.status = AnswerStatus::Wrong;
    s.input.clear();
    let score = s.score;
    drop(s);

    cue(&ctx.tx, sound_on, SoundCue::Wrong);
    send(&ctx.tx, ServerWsMessage::Input { value: String::new() });
    send(&ctx.tx, ServerWsMessage::AnswerResult { status: AnswerStatus::Wrong, score });
    info!(target: "problem", id = %problem.id, "Answer wrong");

    spawn_feedback(ctx, false, &problem, sound_on);
    spawn_wrong_reset(ctx, problem.id.clone());
  }
}

/// Fetch praise/hint in the background and push it; hints are also spoken.
fn spawn_feedback(ctx: &SessionCtx, correct: bool, problem: &Problem, speak: bool) {
  let state = ctx.state.clone();
  let tx = ctx.tx.clone();
  let (a, b, op) = (problem.num_a, problem.num_b, problem.operator);
  tokio::spawn(async move {
    let text = logic::feedback_text(&state, correct, a, b, op).await;
    if speak {
      send(&tx, ServerWsMessage::Speak { text: text.clone() });
    }
    send(&tx, ServerWsMessage::Feedback { text });
  });
}

/// Return WRONG -> IDLE after a fixed delay, unless a newer problem (or a
/// correct answer) got there first.
fn spawn_wrong_reset(ctx: &SessionCtx, problem_id: String) {
  let session = ctx.session.clone();
  let tx = ctx.tx.clone();
  tokio::spawn(async move {
    tokio::time::sleep(WRONG_RESET_DELAY).await;
    let mut s = session.lock().await;
    let same_problem = s.problem.as_ref().map(|p| p.id.as_str()) == Some(problem_id.as_str());
    if same_problem && s.status == AnswerStatus::Wrong {
      s.status = AnswerStatus::Idle;
      send(&tx, ServerWsMessage::StatusReset);
    }
  });
}

async fn replay(ctx: &SessionCtx) {
  let problem = {
    let s = ctx.session.lock().await;
    cue(&ctx.tx, s.sound_enabled.load(Ordering::Relaxed), SoundCue::Click);
    if s.status != AnswerStatus::Correct {
      return;
    }
    s.problem.clone()
  };
  if let Some(p) = problem {
    start_teaching(ctx, p).await;
  }
}

/// Spawn a teaching run for `problem`. No-op if a run is already live.
async fn start_teaching(ctx: &SessionCtx, problem: Problem) {
  let run = {
    let s = ctx.session.lock().await;
    if s
      .animating
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!(target: "teaching", "Teaching run already active; ignoring start");
      return;
    }
    s.show_next.store(false, Ordering::Relaxed);
    TeachingRun {
      token: s.runs.begin(),
      teaching: s.teaching.clone(),
      sound_enabled: s.sound_enabled.clone(),
      animating: s.animating.clone(),
      sink: Arc::new(WsSink { tx: ctx.tx.clone(), show_next: s.show_next.clone() }),
    }
  };
  tokio::spawn(async move { run.run(&problem).await });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::Operator;
  use tokio::sync::mpsc;

  fn ctx_with_problem(a: u8, b: u8, operator: Operator) -> (SessionCtx, mpsc::UnboundedReceiver<ServerWsMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut session = Session::new();
    let answer = match operator {
      Operator::Add => a + b,
      Operator::Subtract => a - b,
    };
    session.problem = Some(Problem {
      id: "p1".into(),
      num_a: a,
      num_b: b,
      operator,
      answer,
      emoji: "🍎".into(),
      story: None,
      source: ProblemSource::Local,
    });
    let ctx = SessionCtx {
      state: Arc::new(AppState::new()),
      session: Arc::new(Mutex::new(session)),
      tx,
    };
    (ctx, rx)
  }

  fn drain(rx: &mut mpsc::UnboundedReceiver<ServerWsMessage>) -> Vec<ServerWsMessage> {
    let mut out = Vec::new();
    while let Ok(m) = rx.try_recv() {
      out.push(m);
    }
    out
  }

  #[tokio::test]
  async fn input_is_capped_at_two_digits() {
    let (ctx, mut rx) = ctx_with_problem(3, 2, Operator::Add);
    for d in [1u8, 2, 3] {
      handle_message(&ctx, ClientWsMessage::PushDigit { digit: d }).await;
    }
    assert_eq!(ctx.session.lock().await.input, "12");

    handle_message(&ctx, ClientWsMessage::ClearInput).await;
    assert!(ctx.session.lock().await.input.is_empty());
    drain(&mut rx);
  }

  #[tokio::test]
  async fn push_digit_rejects_non_digit() {
    let (ctx, mut rx) = ctx_with_problem(3, 2, Operator::Add);
    handle_message(&ctx, ClientWsMessage::PushDigit { digit: 12 }).await;
    assert!(ctx.session.lock().await.input.is_empty());
    assert!(drain(&mut rx)
      .iter()
      .any(|m| matches!(m, ServerWsMessage::Error { .. })));
  }

  #[tokio::test]
  async fn push_digit_is_ignored_after_a_correct_answer() {
    let (ctx, mut rx) = ctx_with_problem(3, 2, Operator::Add);
    {
      let mut s = ctx.session.lock().await;
      s.input = "5".into();
      s.status = AnswerStatus::Correct;
    }
    handle_message(&ctx, ClientWsMessage::PushDigit { digit: 7 }).await;
    assert_eq!(ctx.session.lock().await.input, "5");
    // No click cue, no input echo.
    assert!(drain(&mut rx).is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn correct_submit_scores_once_and_is_idempotent() {
    let (ctx, mut rx) = ctx_with_problem(3, 2, Operator::Add);
    {
      let mut s = ctx.session.lock().await;
      s.input = "5".into();
    }
    handle_message(&ctx, ClientWsMessage::SubmitAnswer).await;
    {
      let s = ctx.session.lock().await;
      assert_eq!(s.status, AnswerStatus::Correct);
      assert_eq!(s.score, SCORE_PER_CORRECT);
    }

    // Further submits while non-IDLE are ignored.
    handle_message(&ctx, ClientWsMessage::SubmitAnswer).await;
    assert_eq!(ctx.session.lock().await.score, SCORE_PER_CORRECT);

    // Let the spawned teaching run and feedback task finish (virtual time).
    tokio::time::sleep(Duration::from_secs(30)).await;
    let msgs = drain(&mut rx);
    let results = msgs
      .iter()
      .filter(|m| matches!(m, ServerWsMessage::AnswerResult { .. }))
      .count();
    assert_eq!(results, 1);
    assert!(msgs.contains(&ServerWsMessage::TeachingDone));
    assert!(ctx.session.lock().await.show_next.load(Ordering::Relaxed));
  }

  #[tokio::test(start_paused = true)]
  async fn wrong_submit_clears_input_and_resets_after_delay() {
    let (ctx, mut rx) = ctx_with_problem(3, 2, Operator::Add);
    {
      let mut s = ctx.session.lock().await;
      s.input = "9".into();
    }
    handle_message(&ctx, ClientWsMessage::SubmitAnswer).await;
    {
      let s = ctx.session.lock().await;
      assert_eq!(s.status, AnswerStatus::Wrong);
      assert!(s.input.is_empty());
      assert_eq!(s.score, 0);
    }

    tokio::time::sleep(WRONG_RESET_DELAY + Duration::from_millis(100)).await;
    assert_eq!(ctx.session.lock().await.status, AnswerStatus::Idle);
    assert!(drain(&mut rx)
      .iter()
      .any(|m| matches!(m, ServerWsMessage::StatusReset)));
  }

  #[tokio::test(start_paused = true)]
  async fn empty_input_counts_as_wrong() {
    let (ctx, mut rx) = ctx_with_problem(3, 2, Operator::Add);
    handle_message(&ctx, ClientWsMessage::SubmitAnswer).await;
    assert_eq!(ctx.session.lock().await.status, AnswerStatus::Wrong);
    drain(&mut rx);
  }

  #[tokio::test(start_paused = true)]
  async fn new_problem_cancels_live_teaching_run() {
    let (ctx, mut rx) = ctx_with_problem(3, 2, Operator::Add);
    {
      let mut s = ctx.session.lock().await;
      s.input = "5".into();
    }
    handle_message(&ctx, ClientWsMessage::SubmitAnswer).await;

    // Let the run get a few steps in, then request the next problem. The
    // offset sits between step boundaries so the run is mid-suspension.
    tokio::time::sleep(Duration::from_millis(4250)).await;
    drain(&mut rx);
    handle_message(&ctx, ClientWsMessage::NextProblem).await;

    {
      let s = ctx.session.lock().await;
      assert!(!s.animating.load(Ordering::Relaxed));
      assert_eq!(*s.teaching.read().await, TeachingState::default());
    }

    // Give the cancelled run time to notice; it must emit nothing further.
    tokio::time::sleep(Duration::from_secs(30)).await;
    let msgs = drain(&mut rx);
    assert!(!msgs.contains(&ServerWsMessage::TeachingDone));
    assert!(!msgs.iter().any(|m| matches!(
      m,
      ServerWsMessage::Teaching { state } if state.active
    )));
    assert!(!ctx.session.lock().await.show_next.load(Ordering::Relaxed));
  }

  #[tokio::test(start_paused = true)]
  async fn replay_requires_correct_status() {
    let (ctx, mut rx) = ctx_with_problem(3, 2, Operator::Add);
    handle_message(&ctx, ClientWsMessage::Replay).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    let msgs = drain(&mut rx);
    assert!(!msgs.contains(&ServerWsMessage::TeachingDone));
  }
}
