//! Scores one turn record with the judge model.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use crate::cost::CostManager;
use crate::error::{CrasError, Result};
use crate::judge::{complete_with_retry, GenParams, Judge};
use crate::prompts::build_scoring_prompt;
use crate::rubric::RubricStore;
use crate::transcript::TurnRecord;

/// `{"error": "..."}` stored when the judge call itself failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorDescriptor {
    pub error: String,
}

/// What ends up in `scores.json` for one scored turn.
///
/// Untagged on disk: an object of dimensions, the raw response string, or an
/// error descriptor. `Error` is tried first when reading back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScoreResult {
    Error(ErrorDescriptor),
    Structured(JsonMap<String, Value>),
    RawText(String),
}

impl ScoreResult {
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error(ErrorDescriptor { error: msg.into() })
    }
}

fn fenced_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").expect("fenced json regex"))
}

fn braces_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("brace span regex"))
}

/// Pull a JSON object out of free text: a ```json fenced block when present,
/// otherwise the span from the first `{` to the last `}`. Empty objects count
/// as nothing found.
pub fn extract_json_object(text: &str) -> Option<JsonMap<String, Value>> {
    let candidate = match fenced_re().captures(text) {
        Some(c) => c.get(1)?.as_str(),
        None => braces_re().find(text)?.as_str(),
    };
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) if !map.is_empty() => Some(map),
        _ => None,
    }
}

/// Structured when a JSON object could be parsed, raw trimmed text otherwise.
pub fn parse_judge_response(text: &str) -> ScoreResult {
    let trimmed = text.trim();
    match extract_json_object(trimmed) {
        Some(map) => ScoreResult::Structured(map),
        None => ScoreResult::RawText(trimmed.to_string()),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreParams {
    pub gen: GenParams,
    pub max_attempts: u8,
    pub retry_delay: Duration,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            gen: GenParams {
                temperature: 0.3,
                max_tokens: 10240,
            },
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub role: String,
    pub result: ScoreResult,
}

pub struct Scorer {
    judge: Arc<dyn Judge>,
    rubrics: Arc<RubricStore>,
    cost: Arc<CostManager>,
    params: ScoreParams,
}

impl Scorer {
    pub fn new(
        judge: Arc<dyn Judge>,
        rubrics: Arc<RubricStore>,
        cost: Arc<CostManager>,
        params: ScoreParams,
    ) -> Self {
        Self {
            judge,
            rubrics,
            cost,
            params,
        }
    }

    pub fn cost(&self) -> &CostManager {
        &self.cost
    }

    /// Score one record. `Ok(None)` means the record was skipped without a
    /// judge call; the only error is [`CrasError::BudgetExceeded`].
    pub async fn score(&self, record: &TurnRecord, original_query: &str) -> Result<Option<Scored>> {
        if record.should_skip() {
            return Ok(None);
        }
        let turn = record.extract(original_query);
        if !turn.is_scorable() {
            return Ok(None);
        }

        let rubric = match self.rubrics.get(&turn.role) {
            Ok(r) => r,
            // RubricNotFound / InvalidRubric / unreadable file: skip the record, keep the batch
            Err(e) => {
                log::warn!("rubric for role '{}' unavailable, skipping: {e}", turn.role);
                return Ok(None);
            }
        };

        let prompt = build_scoring_prompt(&turn.role, &rubric, &turn.question, &turn.answer);

        // no new billable call once the ceiling has been crossed by another worker
        self.check_budget()?;

        let completion = match complete_with_retry(
            self.judge.as_ref(),
            &prompt,
            self.params.gen,
            self.params.max_attempts,
            self.params.retry_delay,
        )
        .await
        {
            Ok(c) => c,
            Err(e) => {
                log::error!("judge call for role '{}' failed: {e}", turn.role);
                return Ok(Some(Scored {
                    role: turn.role,
                    result: ScoreResult::error(format!("API call failed: {e}")),
                }));
            }
        };

        if let Some(u) = completion.usage {
            self.cost
                .update(u.prompt_tokens, u.completion_tokens, self.judge.model());
            if self.cost.exceeded() {
                print_budget_alarm(&self.cost);
                return Err(self.budget_error());
            }
        }

        let result = parse_judge_response(&completion.text);
        if let ScoreResult::RawText(_) = result {
            log::warn!("could not parse JSON for role '{}', storing raw response", turn.role);
        }
        Ok(Some(Scored {
            role: turn.role,
            result,
        }))
    }

    fn check_budget(&self) -> Result<()> {
        if self.cost.exceeded() {
            return Err(self.budget_error());
        }
        Ok(())
    }

    fn budget_error(&self) -> CrasError {
        CrasError::BudgetExceeded {
            total: self.cost.total_cost(),
            budget: self.cost.max_budget(),
        }
    }
}

fn print_budget_alarm(cost: &CostManager) {
    let bang = "!".repeat(60);
    println!(
        "\n{bang}\n! CRITICAL: BUDGET EXCEEDED !\n  \
         - Current Total Cost: ${:.6}\n  \
         - Max Budget Set:     ${:.6}\n\
         ! Halting the script to prevent further charges. !\n{bang}\n",
        cost.total_cost(),
        cost.max_budget()
    );
    log::error!(
        "budget exceeded: ${:.6} > ${:.6}",
        cost.total_cost(),
        cost.max_budget()
    );
}
