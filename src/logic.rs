//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Producing the next problem for a mode (with story -> practice fallback)
//!   - Praise/hint text (OpenAI with fixed local fallbacks)
//!   - Building the spoken form of a problem

use tracing::{error, info, instrument};

use crate::domain::{GameMode, Operator, Problem};
use crate::generator::generate_practice;
use crate::state::AppState;

/// Fixed fallback lines when the feedback service fails or is disabled.
pub const DEFAULT_PRAISE: &str = "真棒！";
pub const DEFAULT_HINT: &str = "加油，再算算看！";

/// Produce the next problem for `mode`. Returns the problem and whether story
/// mode had to fall back to local generation.
#[instrument(level = "info", skip(state, last_signature))]
pub async fn make_problem(
  state: &AppState,
  mode: GameMode,
  last_signature: Option<&str>,
) -> (Problem, bool) {
  match mode {
    GameMode::Practice => (generate_practice(last_signature), false),
    GameMode::Story => match state.choose_story_problem().await {
      Some(p) => (p, false),
      None => {
        info!(target: "problem", "Story generation unavailable; serving practice problem");
        (generate_practice(last_signature), true)
      }
    },
  }
}

/// One short sentence of praise or a gentle non-revealing hint. Failures
/// degrade to a fixed default per correctness branch.
#[instrument(level = "info", skip(state))]
pub async fn feedback_text(
  state: &AppState,
  correct: bool,
  num_a: u8,
  num_b: u8,
  operator: Operator,
) -> String {
  let fallback = if correct { DEFAULT_PRAISE } else { DEFAULT_HINT };
  if let Some(oa) = &state.openai {
    match oa
      .encouragement_or_hint(&state.prompts, correct, num_a, num_b, operator)
      .await
    {
      Ok(t) if !t.is_empty() => return t,
      Ok(_) => {}
      Err(e) => {
        error!(target: "suanbao_backend", error = %e, "OpenAI feedback failed; using fixed fallback.");
      }
    }
  }
  fallback.into()
}

/// Spoken introduction for a fresh problem: the story first (story mode),
/// then the equation as a question.
pub fn problem_narration(problem: &Problem, mode: GameMode) -> String {
  let mut text = String::new();
  if mode == GameMode::Story {
    if let Some(story) = &problem.story {
      text.push_str(story);
      text.push('。');
    }
  }
  text.push_str(&format!(
    "请问，{} {} {} 等于几？",
    problem.num_a,
    problem.operator.spoken(),
    problem.num_b
  ));
  text
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::ProblemSource;

  fn story_problem() -> Problem {
    Problem {
      id: "s".into(),
      num_a: 3,
      num_b: 2,
      operator: Operator::Add,
      answer: 5,
      emoji: "🍎".into(),
      story: Some("小熊有3个苹果，妈妈又给了他2个".into()),
      source: ProblemSource::Seed,
    }
  }

  #[test]
  fn narration_reads_story_then_equation() {
    let text = problem_narration(&story_problem(), GameMode::Story);
    assert!(text.starts_with("小熊有3个苹果"));
    assert!(text.ends_with("请问，3 加 2 等于几？"));
  }

  #[test]
  fn narration_skips_story_outside_story_mode() {
    let text = problem_narration(&story_problem(), GameMode::Practice);
    assert_eq!(text, "请问，3 加 2 等于几？");
  }

  #[tokio::test]
  async fn feedback_uses_fixed_fallback_without_openai() {
    // AppState::new only enables OpenAI when OPENAI_API_KEY is set; tests
    // run without one.
    let state = AppState::new();
    if state.openai.is_none() {
      let t = feedback_text(&state, true, 3, 2, Operator::Add).await;
      assert_eq!(t, DEFAULT_PRAISE);
      let t = feedback_text(&state, false, 3, 2, Operator::Add).await;
      assert_eq!(t, DEFAULT_HINT);
    }
  }

  #[tokio::test]
  async fn story_mode_serves_a_problem_even_without_openai() {
    let state = AppState::new();
    if state.openai.is_none() {
      let (p, fell_back) = make_problem(&state, GameMode::Story, None).await;
      // Seed bank covers the "never configured" case, so no fallback here.
      assert!(!fell_back);
      assert!(p.story.is_some());
    }
  }
}
