//! Local practice-problem generation: constrained randomization plus a
//! signature check so the same `(operator, A, B)` never comes up twice in a
//! row (bounded retry, so no infinite loop either).

use rand::Rng;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Operator, Problem, ProblemSource};

/// Display glyphs assigned to practice problems.
pub const EMOJIS: [&str; 9] = ["🍎", "🍌", "🐶", "🐱", "🐸", "⭐", "🎈", "🍪", "🚗"];

/// How many times we re-roll the whole problem before accepting a duplicate
/// signature.
const MAX_DEDUP_ATTEMPTS: u32 = 10;

/// Generate one practice problem, avoiding `last_signature` if possible.
///
/// ADD operands are resampled until their sum stays within 10; SUBTRACT takes
/// the larger of two samples as the minuend so the result is never negative.
pub fn generate_practice(last_signature: Option<&str>) -> Problem {
  let mut rng = rand::thread_rng();
  let mut attempts = 0u32;

  loop {
    let operator = if rng.gen_bool(0.5) { Operator::Add } else { Operator::Subtract };
    let (a, b): (u8, u8) = match operator {
      Operator::Add => loop {
        let a = rng.gen_range(0..=10u8);
        let b = rng.gen_range(0..=10u8);
        if a + b <= 10 {
          break (a, b);
        }
      },
      Operator::Subtract => {
        let x = rng.gen_range(0..=10u8);
        let y = rng.gen_range(0..=10u8);
        (x.max(y), x.min(y))
      }
    };

    let signature = Problem::signature(operator, a, b);
    attempts += 1;
    if Some(signature.as_str()) == last_signature && attempts < MAX_DEDUP_ATTEMPTS {
      continue;
    }

    let answer = match operator {
      Operator::Add => a + b,
      Operator::Subtract => a - b,
    };
    let emoji = EMOJIS[rng.gen_range(0..EMOJIS.len())].to_string();
    debug!(target: "problem", %signature, attempts, "Practice problem generated");

    return Problem {
      id: Uuid::new_v4().to_string(),
      num_a: a,
      num_b: b,
      operator,
      answer,
      emoji,
      story: None,
      source: ProblemSource::Local,
    };
  }
}
