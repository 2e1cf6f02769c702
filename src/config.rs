//! Loading agent configuration (prompt overrides) from TOML.
//!
//! See `AgentConfig` and `Prompts` for the expected schema.

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
}

/// Prompts used by the OpenAI client. Defaults are tuned for a 5-year-old
/// audience and Chinese narration. Override them in TOML to tune tone.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  // Story-problem generation (structured JSON)
  pub story_system: String,
  pub story_user: String,
  // Praise / hint one-liners
  pub feedback_system: String,
  pub praise_user_template: String,
  pub hint_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      story_system: "You are a content generator for a math game for 5-year-olds. Respond ONLY with strict JSON.".into(),
      story_user: "Generate a simple math word problem for a child learning 1-10 addition or subtraction. Return JSON with fields: story (a very short, cute story in Chinese, max 20 words), num_a (0-10), num_b (0-10), operator ('+' or '-'), answer, emoji (a single emoji for the object in the story). Use emojis. Keep it fun.".into(),
      feedback_system: "You are a kind kindergarten math teacher. Reply with exactly one short Chinese sentence.".into(),
      praise_user_template: "A child just correctly solved {num_a} {operator} {num_b}. Give them a very short, super enthusiastic praise in Chinese (max 1 sentence).".into(),
      hint_user_template: "A child got {num_a} {operator} {num_b} wrong. Give them a very gentle, simple hint in Chinese like a kind teacher. Don't give the answer directly. (max 1 sentence).".into(),
    }
  }
}

/// Attempt to load `AgentConfig` from AGENT_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("AGENT_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<AgentConfig>(&s) {
      Ok(cfg) => {
        info!(target: "suanbao_backend", %path, "Loaded agent config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "suanbao_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "suanbao_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
