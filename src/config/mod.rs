//! Configuration for the session core.

/// Knobs shared by every session a registry creates.
#[derive(Debug, Clone)]
pub struct ParleyConfig {
    /// Base instruction set prepended to every engine system prompt.
    pub base_instructions: String,
    /// Model used when a client does not request one.
    pub default_model: String,
    /// Maximum number of prior turns replayed into the engine on resume.
    pub replay_limit: usize,
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            base_instructions: String::new(),
            default_model: "default".to_string(),
            replay_limit: 10,
        }
    }
}

impl ParleyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables (`PARLEY_BASE_INSTRUCTIONS`,
    /// `PARLEY_DEFAULT_MODEL`, `PARLEY_REPLAY_LIMIT`).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::new();

        if let Ok(instructions) = std::env::var("PARLEY_BASE_INSTRUCTIONS") {
            config.base_instructions = instructions;
        }
        if let Ok(model) = std::env::var("PARLEY_DEFAULT_MODEL") {
            config.default_model = model;
        }
        if let Ok(limit) = std::env::var("PARLEY_REPLAY_LIMIT") {
            if let Ok(limit) = limit.parse() {
                config.replay_limit = limit;
            }
        }

        config
    }

    pub fn with_base_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.base_instructions = instructions.into();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_replay_limit(mut self, limit: usize) -> Self {
        self.replay_limit = limit;
        self
    }
}
