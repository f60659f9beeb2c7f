//! Token usage and spend accounting shared by every scoring worker.
//!
//! Prices are USD per 1K tokens. A model's rate comes from its API-config
//! entry when present, else from the table below (exact name first, then the
//! part after the last `/`), else [`DEFAULT_RATE`].

use std::{
    collections::HashMap,
    sync::{Mutex, OnceLock},
};

use crate::config::ModelConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl Rate {
    pub const fn new(prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        Self {
            prompt_per_1k,
            completion_per_1k,
        }
    }

    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 * self.prompt_per_1k + completion_tokens as f64 * self.completion_per_1k)
            / 1000.0
    }
}

/// Used for models missing from the table.
pub const DEFAULT_RATE: Rate = Rate::new(0.001, 0.005);

static RATES: OnceLock<HashMap<&'static str, Rate>> = OnceLock::new();

fn init_rates() -> HashMap<&'static str, Rate> {
    let mut map = HashMap::new();

    // OpenAI
    map.insert("gpt-3.5-turbo", Rate::new(0.0005, 0.0015));
    map.insert("gpt-4-turbo", Rate::new(0.01, 0.03));
    map.insert("gpt-4o", Rate::new(0.0025, 0.01));
    map.insert("gpt-4o-mini", Rate::new(0.00015, 0.0006));
    map.insert("gpt-4.1", Rate::new(0.002, 0.008));
    map.insert("gpt-4.1-mini", Rate::new(0.0004, 0.0016));

    // DeepSeek
    map.insert("deepseek-chat", Rate::new(0.00027, 0.0011));
    map.insert("deepseek-v3", Rate::new(0.00027, 0.0011));
    map.insert("deepseek-reasoner", Rate::new(0.00055, 0.00219));
    map.insert("deepseek-r1", Rate::new(0.00055, 0.00219));

    // Anthropic
    map.insert("claude-3-5-haiku", Rate::new(0.0008, 0.004));
    map.insert("claude-3-5-sonnet", Rate::new(0.003, 0.015));

    // Qwen
    map.insert("qwen-plus", Rate::new(0.0004, 0.0012));
    map.insert("qwen-max", Rate::new(0.0016, 0.0064));

    map
}

/// Table lookup for `model`.
pub fn rate_for(model: &str) -> Option<Rate> {
    let map = RATES.get_or_init(init_rates);
    let lower = model.to_lowercase();
    map.get(lower.as_str()).copied().or_else(|| {
        lower
            .rsplit_once('/')
            .and_then(|(_, short)| map.get(short).copied())
    })
}

/// Rate for a configured endpoint; config prices override the table.
pub fn rate_for_config(cfg: &ModelConfig) -> Rate {
    let table = rate_for(&cfg.model_name).unwrap_or(DEFAULT_RATE);
    Rate {
        prompt_per_1k: cfg.prompt_price_per_1k.unwrap_or(table.prompt_per_1k),
        completion_per_1k: cfg.completion_price_per_1k.unwrap_or(table.completion_per_1k),
    }
}

/// Snapshot of the accumulated usage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Costs {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_cost: f64,
}

#[derive(Debug)]
pub struct CostManager {
    max_budget: f64,
    overrides: HashMap<String, Rate>,
    state: Mutex<Costs>,
}

impl CostManager {
    pub fn new(max_budget: f64) -> Self {
        Self {
            max_budget,
            overrides: HashMap::new(),
            state: Mutex::new(Costs::default()),
        }
    }

    /// Pin the rate used for `model`, e.g. from the API config.
    pub fn with_rate(mut self, model: impl Into<String>, rate: Rate) -> Self {
        self.overrides.insert(model.into(), rate);
        self
    }

    pub fn max_budget(&self) -> f64 {
        self.max_budget
    }

    fn rate(&self, model: &str) -> Rate {
        self.overrides
            .get(model)
            .copied()
            .or_else(|| rate_for(model))
            .unwrap_or(DEFAULT_RATE)
    }

    /// Add one call's usage; returns the new running total.
    pub fn update(&self, prompt_tokens: u64, completion_tokens: u64, model: &str) -> f64 {
        let delta = self.rate(model).cost(prompt_tokens, completion_tokens);
        let mut state = self.lock();
        state.total_prompt_tokens += prompt_tokens;
        state.total_completion_tokens += completion_tokens;
        state.total_cost += delta;
        log::info!(
            "usage model={model} prompt={prompt_tokens} completion={completion_tokens} \
             cost=${delta:.6} total=${:.6}/{:.2}",
            state.total_cost,
            self.max_budget
        );
        state.total_cost
    }

    pub fn total_cost(&self) -> f64 {
        self.lock().total_cost
    }

    pub fn exceeded(&self) -> bool {
        self.total_cost() > self.max_budget
    }

    pub fn costs(&self) -> Costs {
        *self.lock()
    }

    /// Delimited end-of-run report, printed and appended to the cost log.
    pub fn summary(&self) -> String {
        let c = self.costs();
        let rule = "=".repeat(60);
        format!(
            "\n{rule}\n\
             Script finished or was halted. Final Cost Report:\n  \
             - Total Prompt Tokens:     {}\n  \
             - Total Completion Tokens: {}\n  \
             - Total Estimated Cost:    ${:.6}\n  \
             - Budget Set:              ${:.2}\n\
             {rule}\n",
            c.total_prompt_tokens, c.total_completion_tokens, c.total_cost, self.max_budget
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Costs> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}
