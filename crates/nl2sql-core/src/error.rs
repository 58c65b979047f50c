//! Unified Error Model
use crate::state::GenerationFailure;
use thiserror::Error;

/// Every failure a pipeline run can observe.
///
/// The `Display` strings carry a stage code (`TRANSLATE/…`, `SQLPARSE/…`) so
/// log lines can be grepped by stage. Use [`PipelineError::user_message`] for
/// anything shown to the person who asked the question.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("TRANSLATE/{0}")]
    Translation(String),

    #[error("LINK/{0}")]
    SchemaLink(String),

    /// One failed attempt; the orchestrator retries these.
    #[error("GENERATE/{0}")]
    Generation(String),

    /// Every attempt failed. `detail` is the last diagnostic, for logs only.
    #[error("GENERATE/{attempts} attempts failed, last: {detail}")]
    GenerationExhausted {
        attempts: u32,
        reason: GenerationFailure,
        detail: String,
    },

    #[error("SQLPARSE/{0}")]
    SqlParse(String),

    #[error("DIALECT/{0}")]
    DialectTransform(String),

    #[error("VERIFY/{0}")]
    TestSynthesis(String),

    #[error("CONFIG/{0}")]
    InvalidConfiguration(String),

    #[error("TIMEOUT/{call} exceeded {secs}s")]
    Timeout { call: &'static str, secs: u64 },

    #[error("CANCELLED/request cancelled")]
    Cancelled,

    #[error("STATE/{0}")]
    State(#[from] StateError),
}

impl PipelineError {
    /// Only generation failures are retried, and only inside the orchestrator.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Generation(_))
    }

    /// Terminal kinds abort the run. Dialect-transform and test-synthesis
    /// failures are absorbed, and a bad context window only degrades.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::DialectTransform(_) | Self::TestSynthesis(_) | Self::InvalidConfiguration(_)
        )
    }

    /// Sentence naming the failed stage, safe to return to the caller.
    pub fn user_message(&self) -> String {
        match self {
            Self::Translation(_) => {
                "Could not translate the question into the working language.".to_string()
            }
            Self::SchemaLink(_) => {
                "The schema is too large for the model and could not be reduced to the relevant tables.".to_string()
            }
            Self::Generation(_) => "SQL generation failed.".to_string(),
            Self::GenerationExhausted { attempts, reason, .. } => {
                format!("SQL generation failed after {} attempts: {}.", attempts, reason)
            }
            Self::SqlParse(detail) => {
                format!("The generated query is not valid SQL: {}", first_line(detail))
            }
            Self::DialectTransform(_) => {
                "The query could not be rewritten for the target database.".to_string()
            }
            Self::TestSynthesis(_) => "Verification checks could not be generated.".to_string(),
            Self::InvalidConfiguration(detail) => {
                format!("The pipeline is misconfigured: {}", first_line(detail))
            }
            Self::Timeout { call, .. } => format!("The {} step timed out.", call),
            Self::Cancelled => "The request was cancelled.".to_string(),
            Self::State(_) => "The request reached an inconsistent state.".to_string(),
        }
    }
}

/// Violations of the [`PipelineState`](crate::state::PipelineState) write rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("{field} is write-once (current {current:?}, attempted {attempted:?})")]
    Immutable {
        field: &'static str,
        current: String,
        attempted: String,
    },

    #[error("no generated SQL to replace")]
    NoGeneratedSql,
}

fn first_line(detail: &str) -> &str {
    detail.lines().next().unwrap_or_default().trim()
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_generation_is_retryable() {
        assert!(PipelineError::Generation("x".into()).is_retryable());
        assert!(!PipelineError::SqlParse("x".into()).is_retryable());
        assert!(!PipelineError::Timeout { call: "generate", secs: 1 }.is_retryable());
    }

    #[test]
    fn absorbed_kinds_are_not_terminal() {
        assert!(!PipelineError::DialectTransform("x".into()).is_terminal());
        assert!(!PipelineError::TestSynthesis("x".into()).is_terminal());
        assert!(PipelineError::SqlParse("x".into()).is_terminal());
        assert!(PipelineError::Cancelled.is_terminal());
    }

    #[test]
    fn generation_message_names_reason_not_detail() {
        let err = PipelineError::GenerationExhausted {
            attempts: 3,
            reason: GenerationFailure::Capability,
            detail: "GENERATE/POST https://llm.internal/v1: 401 key sk-test".into(),
        };
        let msg = err.user_message();
        assert_eq!(msg, "SQL generation failed after 3 attempts: the model reported an error.");
        assert!(err.to_string().contains("sk-test"));
        assert!(!PipelineError::Generation("sk-test".into()).user_message().contains("sk-test"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn user_message_hides_internal_chain() {
        let err = PipelineError::SqlParse("Expected: an expression\nat line 1".into());
        let msg = err.user_message();
        assert!(msg.contains("not valid SQL"));
        assert!(!msg.contains("line 1"));
        assert_eq!(err.to_string(), "SQLPARSE/Expected: an expression\nat line 1");
    }
}
