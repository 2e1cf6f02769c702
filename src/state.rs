//! Application state shared across connections: prompts, the optional OpenAI
//! client, and the built-in story bank.
//!
//! Per-player state lives in `session::Session`; nothing here is mutated
//! after startup.

use tracing::{error, info, instrument, warn};

use crate::config::{load_agent_config_from_env, Prompts};
use crate::domain::Problem;
use crate::openai::OpenAI;
use crate::seeds::{pick_seed_story, seed_story_problems};

pub struct AppState {
  pub openai: Option<OpenAI>,
  pub prompts: Prompts,
  pub story_bank: Vec<Problem>,
}

impl AppState {
  /// Build state from env: load config, seed the story bank, init OpenAI.
  #[instrument(level = "info", skip_all)]
  pub fn new() -> Self {
    // Load TOML config if provided (prompt overrides).
    let cfg_opt = load_agent_config_from_env();
    let prompts = cfg_opt
      .as_ref()
      .map(|c| c.prompts.clone())
      .unwrap_or_default();

    let story_bank = seed_story_problems();
    info!(target: "problem", seeds = story_bank.len(), "Startup story-bank inventory");

    // Build optional OpenAI client (if API key present).
    let openai = OpenAI::from_env();
    if let Some(oa) = &openai {
      info!(target: "suanbao_backend", base_url = %oa.base_url, fast_model = %oa.fast_model, strong_model = %oa.strong_model, "OpenAI enabled.");
    } else {
      info!(target: "suanbao_backend", "OpenAI disabled (no OPENAI_API_KEY). Using local/seed logic.");
    }

    Self { openai, prompts, story_bank }
  }

  /// Story-problem selection policy:
  /// Generate fresh via OpenAI when available; a failed call returns None so
  /// the caller falls back to practice generation. Without an API key, serve
  /// a canned seed story instead.
  #[instrument(level = "info", skip(self))]
  pub async fn choose_story_problem(&self) -> Option<Problem> {
    if let Some(oa) = &self.openai {
      match oa.generate_story_problem(&self.prompts).await {
        Ok(p) => {
          info!(target: "problem", id = %p.id, source = "openai_generated_new", "Generated fresh story problem");
          return Some(p);
        }
        Err(e) => {
          error!(target: "problem", error = %e, "OpenAI story generation failed; falling back to practice");
          return None;
        }
      }
    }

    let seed = pick_seed_story(&self.story_bank);
    if let Some(p) = &seed {
      warn!(target: "problem", id = %p.id, source = "seed_bank", "Serving built-in story problem (OpenAI disabled)");
    }
    seed
  }
}
