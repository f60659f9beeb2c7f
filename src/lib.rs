//! Role-adherence scoring of multi-agent transcripts with an LLM judge.
//!
//! `score_transcripts` walks agent output directories and writes one
//! `scores.json` per run; `generate_rubrics` produces the per-role rubrics
//! the scorer reads.

pub mod config;
pub mod cost;
pub mod driver;
pub mod error;
pub mod judge;
pub mod logging;
pub mod prompts;
pub mod rubric;
pub mod rubric_gen;
pub mod scorer;
pub mod store;
pub mod transcript;

pub use error::{CrasError, Result};
