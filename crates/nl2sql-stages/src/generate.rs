//! SQL generation stage.
use crate::bounded;
use lazy_static::lazy_static;
use nl2sql_core::{
    GeneratedSql, GenerationFailure, GenerationOutcome, GenerationRequest, ModelCapability, PipelineError,
    PipelineStage, PipelineState, SqlDialect,
};
use regex::Regex;
use std::time::Duration;
use tracing::{debug, warn};

lazy_static! {
    /// Body of the first fenced code block, with or without a language tag.
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*\n?(.*?)```").unwrap();
}

pub struct SqlGenerator {
    dialect: SqlDialect,
    timeout: Duration,
}

impl SqlGenerator {
    pub fn new(dialect: SqlDialect, timeout: Duration) -> Self {
        Self { dialect, timeout }
    }

    /// One generation attempt. The outcome is recorded in `state`; a
    /// capability error or timeout becomes a failed outcome, never both.
    /// The previous attempt's diagnostic, if any, is passed back to the model.
    pub async fn generate(
        &self,
        state: &mut PipelineState,
        schema: &str,
        capability: &dyn ModelCapability,
    ) -> GenerationOutcome {
        let request = GenerationRequest {
            question: state.question().to_string(),
            schema: schema.to_string(),
            dialect: self.dialect,
            previous_error: state.error().map(str::to_string),
        };
        debug!(
            schema_chars = request.schema.len(),
            retry = request.previous_error.is_some(),
            "generating sql"
        );

        let outcome = match bounded(
            "generate",
            self.timeout,
            capability.generate_sql(&request),
            PipelineError::Generation,
        )
        .await
        {
            Ok(generated) => GenerationOutcome::from_generated(GeneratedSql {
                sql: clean_sql(&generated.sql),
                plan: generated.plan.trim().to_string(),
                chain_of_thought: generated.chain_of_thought.trim().to_string(),
            }),
            Err(e) => {
                warn!(error = %e, "generation attempt failed");
                let reason = match e {
                    PipelineError::Timeout { .. } => GenerationFailure::Timeout,
                    _ => GenerationFailure::Capability,
                };
                GenerationOutcome::failed(reason, e.to_string())
            }
        };

        state.record_generation(PipelineStage::Generate, outcome.clone());
        outcome
    }
}

/// Strips Markdown fences, surrounding whitespace and trailing semicolons.
pub fn clean_sql(raw: &str) -> String {
    let body = CODE_FENCE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);
    body.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_sql_strips_fences() {
        assert_eq!(
            clean_sql("```sql\nSELECT COUNT(*) FROM schools;\n```"),
            "SELECT COUNT(*) FROM schools"
        );
        assert_eq!(clean_sql("Here you go:\n```\nSELECT 1\n```\nDone."), "SELECT 1");
        assert_eq!(clean_sql("  SELECT 1 ;; \n"), "SELECT 1");
        assert_eq!(clean_sql("```sql\n```"), "");
    }
}
