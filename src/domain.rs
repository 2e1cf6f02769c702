//! Domain models used by the backend: operators, problems, game modes, and the
//! teaching-animation state driven by the sequencer.

use serde::{Deserialize, Serialize};

/// Which game mode is the player in?
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
  /// Endless locally generated questions.
  Practice,
  /// AI-generated word problems.
  Story,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
  #[serde(rename = "+")]
  Add,
  #[serde(rename = "-")]
  Subtract,
}

impl Operator {
  /// Spoken form used in narration ("3 加 2 等于几？").
  pub fn spoken(&self) -> &'static str {
    match self {
      Operator::Add => "加",
      Operator::Subtract => "减",
    }
  }
}

/// Where did the problem come from?
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemSource {
  Local,     // constrained randomization
  Generated, // OpenAI story problem
  Seed,      // built-in story bank (no API key)
}

/// A single arithmetic problem. Locally generated problems satisfy
/// ADD: 0 <= A,B <= 10 and A+B <= 10; SUBTRACT: A >= B, both in [0,10].
/// Story problems are trusted as delivered by the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Problem {
  pub id: String,
  pub num_a: u8,
  pub num_b: u8,
  pub operator: Operator,
  pub answer: u8,
  /// Single display glyph, e.g. "🍎".
  pub emoji: String,
  /// Narrative framing, story mode only.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub story: Option<String>,
  pub source: ProblemSource,
}

impl Problem {
  /// De-duplication key for practice generation.
  pub fn signature(operator: Operator, a: u8, b: u8) -> String {
    let op = match operator {
      Operator::Add => "+",
      Operator::Subtract => "-",
    };
    format!("{}:{}:{}", op, a, b)
  }
}

/// Sound cue categories, each mapped to a fixed synthesized waveform on the
/// client. Fire-and-forget; cues may overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundCue {
  Correct,
  Wrong,
  Click,
  Pop,
}

/// Answer lifecycle for the current problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
  Idle,
  Correct,
  Wrong,
}

/// Visual overlay state for the two token groups. Written exclusively by the
/// teaching sequencer; the client renders it verbatim. The crossed-out count
/// marks the *last* K indices of group A (subtraction convention).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TeachingState {
  pub active: bool,
  pub highlight_a: Option<usize>,
  pub highlight_b: Option<usize>,
  pub crossed_out: usize,
}
