//! Teaching sequencer: a scripted, cancelable choreography that walks a child
//! through counting/addition or removal/subtraction.
//!
//! The script is a plain ordered list of `Step`s ({visual updates, narration,
//! sound, delay}) consumed by one step-advancer, not a nest of ad hoc timer
//! callbacks. Each delay is a full suspension point; the UI already reflects
//! the step's mutation while it elapses.
//!
//! Cancellation is cooperative: every run owns a `RunToken` and compares it
//! against the session's current run id at the start of every step and again
//! after the final suspension. A stale token stops the run with no further
//! mutations, narration, or sound.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::domain::{Operator, Problem, SoundCue, TeachingState};

// Pacing. Counting steps are slow enough for a child to follow; framing and
// explanation lines get longer pauses. Removal is slower still to emphasize
// each taken item.
const SETTLE: Duration = Duration::from_millis(500);
const FRAMING_PAUSE: Duration = Duration::from_millis(3000);
const SILENT_COUNT_PACE: Duration = Duration::from_millis(500);
const COUNT_LEAD_IN: Duration = Duration::from_millis(2500);
const COUNT_PACE: Duration = Duration::from_millis(1000);
const TOTAL_PAUSE: Duration = Duration::from_millis(2000);
const REMOVE_INTENT_PAUSE: Duration = Duration::from_millis(1500);
const REMOVE_PACE: Duration = Duration::from_millis(1200);
const REMAINDER_PAUSE: Duration = Duration::from_millis(2000);

/// One mutation applied to `TeachingState` at the start of a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisualUpdate {
  HighlightA(Option<usize>),
  HighlightB(Option<usize>),
  CrossedOut(usize),
}

impl VisualUpdate {
  fn apply(&self, state: &mut TeachingState) {
    match *self {
      VisualUpdate::HighlightA(i) => state.highlight_a = i,
      VisualUpdate::HighlightB(i) => state.highlight_b = i,
      VisualUpdate::CrossedOut(k) => state.crossed_out = k,
    }
  }
}

/// One scripted step. Mutations apply first, then side effects fire, then the
/// sequencer suspends for `delay`.
#[derive(Clone, Debug)]
pub struct Step {
  pub updates: Vec<VisualUpdate>,
  pub narration: Option<String>,
  pub sound: Option<SoundCue>,
  pub delay: Duration,
}

impl Step {
  fn say(text: impl Into<String>, delay: Duration) -> Self {
    Step { updates: vec![], narration: Some(text.into()), sound: None, delay }
  }

  fn show(update: VisualUpdate, delay: Duration) -> Self {
    Step { updates: vec![update], narration: None, sound: None, delay }
  }

  /// A counting step: highlight/cross a token, speak the number, pop.
  fn count(update: VisualUpdate, spoken: impl Into<String>, sound: SoundCue, delay: Duration) -> Self {
    Step { updates: vec![update], narration: Some(spoken.into()), sound: Some(sound), delay }
  }
}

/// Build the full script for a problem, by operator.
pub fn build_script(p: &Problem) -> Vec<Step> {
  match p.operator {
    Operator::Add => addition_script(p),
    Operator::Subtract => subtraction_script(p),
  }
}

fn addition_script(p: &Problem) -> Vec<Step> {
  let a = p.num_a as usize;
  let b = p.num_b as usize;
  let mut steps = Vec::new();

  // Concept framing.
  steps.push(Step::say(
    format!("{} 加 {}，意思是把它们合起来。", p.num_a, p.num_b),
    FRAMING_PAUSE,
  ));

  // Silent pass over group A, then group B.
  steps.push(Step::say(format!("这边有 {} 个。", p.num_a), Duration::ZERO));
  for i in 0..a {
    steps.push(Step::show(VisualUpdate::HighlightA(Some(i)), SILENT_COUNT_PACE));
  }
  steps.push(Step::show(VisualUpdate::HighlightA(None), SILENT_COUNT_PACE));

  steps.push(Step::say(format!("那边有 {} 个。", p.num_b), Duration::ZERO));
  for i in 0..b {
    steps.push(Step::show(VisualUpdate::HighlightB(Some(i)), SILENT_COUNT_PACE));
  }
  steps.push(Step::show(VisualUpdate::HighlightB(None), SILENT_COUNT_PACE));

  // Count everything from the start: 1..A over group A, A+1..A+B over group B.
  steps.push(Step::say("让我们从头数一数，一共有多少个？", COUNT_LEAD_IN));
  for i in 0..a {
    steps.push(Step::count(
      VisualUpdate::HighlightA(Some(i)),
      (i + 1).to_string(),
      SoundCue::Pop,
      COUNT_PACE,
    ));
  }
  steps.push(Step::show(VisualUpdate::HighlightA(None), Duration::ZERO));
  for i in 0..b {
    steps.push(Step::count(
      VisualUpdate::HighlightB(Some(i)),
      (a + i + 1).to_string(),
      SoundCue::Pop,
      COUNT_PACE,
    ));
  }
  steps.push(Step::show(VisualUpdate::HighlightB(None), Duration::ZERO));

  steps.push(Step::say(format!("所以，答案就是 {}！", p.answer), Duration::ZERO));
  steps
}

fn subtraction_script(p: &Problem) -> Vec<Step> {
  let b = p.num_b as usize;
  let remaining = (p.num_a - p.num_b) as usize;
  let mut steps = Vec::new();

  steps.push(Step::say(
    format!("{} 减 {}，意思是拿走 {} 个。", p.num_a, p.num_b, p.num_b),
    FRAMING_PAUSE,
  ));
  steps.push(Step::say(format!("这里原来有 {} 个。", p.num_a), TOTAL_PAUSE));
  steps.push(Step::say(format!("我们来拿走 {} 个。", p.num_b), REMOVE_INTENT_PAUSE));

  // Cross out one token per step, always the last uncrossed index.
  for i in 1..=b {
    steps.push(Step::count(
      VisualUpdate::CrossedOut(i),
      format!("拿走 {} 个", i),
      SoundCue::Wrong,
      REMOVE_PACE,
    ));
  }

  steps.push(Step::say("现在还剩下几个呢？我们来数一数。", REMAINDER_PAUSE));

  if remaining == 0 {
    steps.push(Step::say("咦？全都被拿走了，剩下 0 个！", Duration::ZERO));
  } else {
    for i in 0..remaining {
      steps.push(Step::count(
        VisualUpdate::HighlightA(Some(i)),
        (i + 1).to_string(),
        SoundCue::Pop,
        COUNT_PACE,
      ));
    }
    steps.push(Step::show(VisualUpdate::HighlightA(None), Duration::ZERO));
    steps.push(Step::say(format!("所以，还剩下 {} 个！", remaining), Duration::ZERO));
  }
  steps
}

/// Hands out run tokens and invalidates old ones. Starting a new problem
/// calls `cancel_all`, so a stale run deterministically stops mutating state
/// before the new problem's state is installed.
#[derive(Clone, Default)]
pub struct RunRegistry {
  current: Arc<AtomicU64>,
}

impl RunRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start a new run: older tokens become stale immediately.
  pub fn begin(&self) -> RunToken {
    let id = self.current.fetch_add(1, Ordering::SeqCst) + 1;
    RunToken { current: self.current.clone(), id }
  }

  /// Invalidate every outstanding token without starting a run.
  pub fn cancel_all(&self) {
    self.current.fetch_add(1, Ordering::SeqCst);
  }
}

pub struct RunToken {
  current: Arc<AtomicU64>,
  id: u64,
}

impl RunToken {
  pub fn is_live(&self) -> bool {
    self.current.load(Ordering::SeqCst) == self.id
  }
}

/// Capability interface for the sequencer's outputs. Narration and sound are
/// best-effort; implementations must not block.
pub trait TeachingSink: Send + Sync {
  /// Snapshot pushed after every state mutation.
  fn state_changed(&self, state: TeachingState);
  fn speak(&self, text: &str);
  fn play(&self, cue: SoundCue);
  /// Natural completion only; never called for a cancelled run.
  fn completed(&self);
}

/// One sequencer invocation, keyed to a single problem.
pub struct TeachingRun {
  pub token: RunToken,
  pub teaching: Arc<RwLock<TeachingState>>,
  pub sound_enabled: Arc<AtomicBool>,
  pub animating: Arc<AtomicBool>,
  pub sink: Arc<dyn TeachingSink>,
}

impl TeachingRun {
  /// Drive the full script for `problem` to completion or cancellation.
  pub async fn run(self, problem: &Problem) {
    info!(target: "teaching", problem_id = %problem.id, operator = ?problem.operator, "Teaching run started");
    let steps = build_script(problem);

    // Reset visuals before starting. Liveness is checked while holding the
    // write lock: the controller resets `teaching` under the same lock right
    // after cancelling, so a stale run can never clobber the reset state.
    {
      let mut t = self.teaching.write().await;
      if !self.token.is_live() {
        self.abandon();
        return;
      }
      *t = TeachingState { active: true, ..TeachingState::default() };
      self.sink.state_changed(*t);
    }
    sleep(SETTLE).await;

    for step in &steps {
      {
        let mut t = self.teaching.write().await;
        if !self.token.is_live() {
          self.abandon();
          return;
        }
        if !step.updates.is_empty() {
          for u in &step.updates {
            u.apply(&mut t);
          }
          self.sink.state_changed(*t);
        }

        // Side effects stay inside the locked scope so cancellation covers
        // them too. The sound toggle suppresses side effects only; pacing
        // and visual mutations are unaffected.
        if self.sound_enabled.load(Ordering::Relaxed) {
          if let Some(text) = &step.narration {
            self.sink.speak(text);
          }
          if let Some(cue) = step.sound {
            self.sink.play(cue);
          }
        }
      }

      if !step.delay.is_zero() {
        sleep(step.delay).await;
      }
    }

    // Re-check after the last suspension: a run cancelled during its final
    // delay must not signal completion.
    if !self.token.is_live() {
      self.abandon();
      return;
    }

    self.animating.store(false, Ordering::Relaxed);
    info!(target: "teaching", "Teaching run completed");
    self.sink.completed();
  }

  fn abandon(&self) {
    self.animating.store(false, Ordering::Relaxed);
    debug!(target: "teaching", "Teaching run cancelled; abandoning remaining steps");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::ProblemSource;
  use std::sync::Mutex;

  fn problem(a: u8, b: u8, operator: Operator) -> Problem {
    let answer = match operator {
      Operator::Add => a + b,
      Operator::Subtract => a - b,
    };
    Problem {
      id: "t".into(),
      num_a: a,
      num_b: b,
      operator,
      answer,
      emoji: "🍎".into(),
      story: None,
      source: ProblemSource::Local,
    }
  }

  #[derive(Debug, PartialEq)]
  enum Event {
    State(TeachingState),
    Speak(String),
    Sound(SoundCue),
    Done,
  }

  #[derive(Default)]
  struct Recorder {
    events: Mutex<Vec<Event>>,
  }

  impl Recorder {
    fn take(&self) -> Vec<Event> {
      std::mem::take(&mut *self.events.lock().unwrap())
    }
    fn len(&self) -> usize {
      self.events.lock().unwrap().len()
    }
  }

  impl TeachingSink for Recorder {
    fn state_changed(&self, state: TeachingState) {
      self.events.lock().unwrap().push(Event::State(state));
    }
    fn speak(&self, text: &str) {
      self.events.lock().unwrap().push(Event::Speak(text.into()));
    }
    fn play(&self, cue: SoundCue) {
      self.events.lock().unwrap().push(Event::Sound(cue));
    }
    fn completed(&self) {
      self.events.lock().unwrap().push(Event::Done);
    }
  }

  fn make_run(
    registry: &RunRegistry,
    sink: Arc<Recorder>,
    sound_on: bool,
  ) -> (TeachingRun, Arc<RwLock<TeachingState>>, Arc<AtomicBool>) {
    let teaching = Arc::new(RwLock::new(TeachingState::default()));
    let animating = Arc::new(AtomicBool::new(true));
    let run = TeachingRun {
      token: registry.begin(),
      teaching: teaching.clone(),
      sound_enabled: Arc::new(AtomicBool::new(sound_on)),
      animating: animating.clone(),
      sink,
    };
    (run, teaching, animating)
  }

  fn spoken_numbers(events: &[Event]) -> Vec<String> {
    events
      .iter()
      .filter_map(|e| match e {
        Event::Speak(t) if t.chars().all(|c| c.is_ascii_digit()) => Some(t.clone()),
        _ => None,
      })
      .collect()
  }

  #[test]
  fn addition_script_counts_through_both_groups() {
    let p = problem(3, 2, Operator::Add);
    let steps = build_script(&p);

    let spoken: Vec<&str> = steps
      .iter()
      .filter_map(|s| s.narration.as_deref())
      .filter(|t| t.chars().all(|c| c.is_ascii_digit()))
      .collect();
    assert_eq!(spoken, vec!["1", "2", "3", "4", "5"]);

    let last = steps.last().unwrap().narration.as_deref().unwrap();
    assert_eq!(last, "所以，答案就是 5！");
  }

  #[test]
  fn subtraction_script_crosses_out_one_per_step() {
    let p = problem(5, 5, Operator::Subtract);
    let steps = build_script(&p);

    let crossed: Vec<usize> = steps
      .iter()
      .flat_map(|s| s.updates.iter())
      .filter_map(|u| match u {
        VisualUpdate::CrossedOut(k) => Some(*k),
        _ => None,
      })
      .collect();
    assert_eq!(crossed, vec![1, 2, 3, 4, 5]);

    // Zero remainder: the special line, and no counting highlights at all.
    assert!(steps
      .iter()
      .any(|s| s.narration.as_deref() == Some("咦？全都被拿走了，剩下 0 个！")));
    assert!(!steps
      .iter()
      .flat_map(|s| s.updates.iter())
      .any(|u| matches!(u, VisualUpdate::HighlightA(Some(_)))));
  }

  #[test]
  fn subtraction_script_counts_nonzero_remainder() {
    let p = problem(5, 2, Operator::Subtract);
    let steps = build_script(&p);

    let spoken: Vec<&str> = steps
      .iter()
      .filter_map(|s| s.narration.as_deref())
      .filter(|t| t.chars().all(|c| c.is_ascii_digit()))
      .collect();
    assert_eq!(spoken, vec!["1", "2", "3"]);
    assert!(steps
      .iter()
      .any(|s| s.narration.as_deref() == Some("所以，还剩下 3 个！")));
  }

  #[tokio::test(start_paused = true)]
  async fn run_completes_and_takes_scripted_time() {
    let registry = RunRegistry::new();
    let sink = Arc::new(Recorder::default());
    let p = problem(2, 1, Operator::Add);
    let expected: Duration =
      SETTLE + build_script(&p).iter().map(|s| s.delay).sum::<Duration>();

    let (run, _, animating) = make_run(&registry, sink.clone(), true);
    let started = tokio::time::Instant::now();
    run.run(&p).await;

    assert_eq!(started.elapsed(), expected);
    assert!(!animating.load(Ordering::Relaxed));
    let events = sink.take();
    assert_eq!(events.last(), Some(&Event::Done));
    assert_eq!(spoken_numbers(&events), vec!["1", "2", "3"]);
  }

  #[tokio::test(start_paused = true)]
  async fn cancellation_stops_all_further_output() {
    let registry = RunRegistry::new();
    let sink = Arc::new(Recorder::default());
    let p = problem(5, 5, Operator::Subtract);

    let (run, _, animating) = make_run(&registry, sink.clone(), true);
    let p2 = p.clone();
    let handle = tokio::spawn(async move { run.run(&p2).await });

    // Cancel mid-run, during the "我们来拿走" pause and before any removal.
    tokio::time::sleep(Duration::from_millis(6000)).await;
    registry.cancel_all();
    let len_at_cancel = sink.len();
    handle.await.unwrap();

    let events = sink.take();
    assert_eq!(events.len(), len_at_cancel);
    assert!(!events.contains(&Event::Done));
    assert!(!events
      .iter()
      .any(|e| matches!(e, Event::State(s) if s.crossed_out > 0)));
    assert!(!animating.load(Ordering::Relaxed));
  }

  #[tokio::test(start_paused = true)]
  async fn run_cancelled_before_first_step_emits_nothing() {
    // Covers the next-problem-arrives-before-the-spawned-task-runs
    // interleaving: the token is already stale when the run first executes,
    // so not even the initial active=true reset may go out.
    let registry = RunRegistry::new();
    let sink = Arc::new(Recorder::default());
    let p = problem(3, 2, Operator::Add);

    let (run, teaching, animating) = make_run(&registry, sink.clone(), true);
    registry.cancel_all();
    run.run(&p).await;

    assert!(sink.take().is_empty());
    assert_eq!(*teaching.read().await, TeachingState::default());
    assert!(!animating.load(Ordering::Relaxed));
  }

  #[tokio::test(start_paused = true)]
  async fn sound_toggle_suppresses_effects_not_timing() {
    let registry = RunRegistry::new();
    let p = problem(3, 2, Operator::Add);
    let expected: Duration =
      SETTLE + build_script(&p).iter().map(|s| s.delay).sum::<Duration>();

    let sink = Arc::new(Recorder::default());
    let (run, _, _) = make_run(&registry, sink.clone(), false);
    let started = tokio::time::Instant::now();
    run.run(&p).await;

    assert_eq!(started.elapsed(), expected);
    let muted = sink.take();
    assert!(!muted
      .iter()
      .any(|e| matches!(e, Event::Speak(_) | Event::Sound(_))));

    // Same visual mutation count as a run with sound on.
    let sink_on = Arc::new(Recorder::default());
    let (run_on, _, _) = make_run(&registry, sink_on.clone(), true);
    run_on.run(&p).await;
    let loud = sink_on.take();
    let states = |evs: &[Event]| evs.iter().filter(|e| matches!(e, Event::State(_))).count();
    assert_eq!(states(&muted), states(&loud));
  }

  #[tokio::test(start_paused = true)]
  async fn replay_is_a_fresh_full_run() {
    let registry = RunRegistry::new();
    let sink = Arc::new(Recorder::default());
    let p = problem(1, 1, Operator::Add);

    let (run, teaching, _) = make_run(&registry, sink.clone(), true);
    run.run(&p).await;
    let first = sink.take();

    let (run2, _, _) = {
      let animating = Arc::new(AtomicBool::new(true));
      let run2 = TeachingRun {
        token: registry.begin(),
        teaching: teaching.clone(),
        sound_enabled: Arc::new(AtomicBool::new(true)),
        animating: animating.clone(),
        sink: sink.clone(),
      };
      (run2, teaching.clone(), animating)
    };
    run2.run(&p).await;
    let second = sink.take();

    assert_eq!(first.len(), second.len());
    assert_eq!(second.last(), Some(&Event::Done));
  }
}
