//! Seed data: built-in story problems served when OpenAI is not configured.

use rand::Rng;
use uuid::Uuid;

use crate::domain::{Operator, Problem, ProblemSource};

/// Minimal set of canned story problems that keep story mode useful even
/// without an API key. A failed OpenAI call still falls back to practice
/// generation; these only cover the "never configured" case.
pub fn seed_story_problems() -> Vec<Problem> {
  let mk = |a: u8, b: u8, operator: Operator, emoji: &str, story: &str| Problem {
    id: String::new(), // assigned on pick
    num_a: a,
    num_b: b,
    operator,
    answer: match operator {
      Operator::Add => a + b,
      Operator::Subtract => a - b,
    },
    emoji: emoji.into(),
    story: Some(story.into()),
    source: ProblemSource::Seed,
  };

  vec![
    mk(3, 2, Operator::Add, "🍎", "小熊有3个苹果，妈妈又给了他2个"),
    mk(5, 2, Operator::Subtract, "🎈", "天上飘着5个气球，飞走了2个"),
    mk(4, 4, Operator::Add, "🐶", "公园里有4只小狗，又跑来4只"),
    mk(6, 3, Operator::Subtract, "🍪", "盘子里有6块饼干，弟弟吃了3块"),
    mk(2, 7, Operator::Add, "⭐", "夜空中先出现2颗星星，又亮起7颗"),
  ]
}

/// Pick a random seed story and stamp it with a fresh id.
pub fn pick_seed_story(bank: &[Problem]) -> Option<Problem> {
  if bank.is_empty() {
    return None;
  }
  let mut p = bank[rand::thread_rng().gen_range(0..bank.len())].clone();
  p.id = Uuid::new_v4().to_string();
  Some(p)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn seed_answers_are_consistent() {
    for p in seed_story_problems() {
      let expected = match p.operator {
        Operator::Add => p.num_a + p.num_b,
        Operator::Subtract => p.num_a - p.num_b,
      };
      assert_eq!(p.answer, expected);
      assert!(p.story.is_some());
    }
  }

  #[test]
  fn picked_seed_gets_fresh_id() {
    let bank = seed_story_problems();
    let p = pick_seed_story(&bank).unwrap();
    assert!(!p.id.is_empty());
  }
}
