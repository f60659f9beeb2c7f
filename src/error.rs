use std::path::PathBuf;

/// Errors raised by the scoring library. Only `Config`, `BudgetExceeded` and
/// `Io` stop a run; everything else is handled per record.
#[derive(Debug, thiserror::Error)]
pub enum CrasError {
    #[error("config error: {0}")]
    Config(String),

    #[error("neither a rubric for '{role}' nor the general rubric exists in {}", dir.display())]
    RubricNotFound { role: String, dir: PathBuf },

    #[error("rubric file {} is invalid: {reason}", path.display())]
    InvalidRubric { path: PathBuf, reason: String },

    #[error("judge call failed: {0}")]
    Api(String),

    #[error("budget exceeded: spent ${total:.6} of ${budget:.2}")]
    BudgetExceeded { total: f64, budget: f64 },

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("score writer has stopped")]
    WriterStopped,

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CrasError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, Self::BudgetExceeded { .. })
    }
}

pub type Result<T, E = CrasError> = std::result::Result<T, E>;
