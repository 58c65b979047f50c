//! Test-unit synthesis: a checklist of assertions a correct query for the
//! question must satisfy.
use crate::bounded;
use lazy_static::lazy_static;
use nl2sql_core::{
    ModelCapability, PipelineError, PipelineStage, PipelineState, SynthesisRequest, UpdateOutcome,
    VerificationUpdate,
};
use regex::Regex;
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

lazy_static! {
    /// Leading bullet or list numbering.
    static ref LIST_MARKER: Regex = Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+").unwrap();
}

pub struct TestUnitSynthesizer {
    timeout: Duration,
}

impl TestUnitSynthesizer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Replaces `thinking` and `test_units` in `state` with a fresh synthesis
    /// for the current question and SQL.
    pub async fn synthesize(
        &self,
        state: &mut PipelineState,
        schema: &str,
        capability: &dyn ModelCapability,
    ) -> Result<UpdateOutcome, PipelineError> {
        let request = SynthesisRequest {
            question: state.question().to_string(),
            schema: schema.to_string(),
            sql: state.sql().to_string(),
        };

        let synthesized = bounded(
            "synthesize_tests",
            self.timeout,
            capability.synthesize_tests(&request),
            PipelineError::TestSynthesis,
        )
        .await?;

        let units = clean_units(&synthesized.test_units);
        if units.is_empty() {
            return Err(PipelineError::TestSynthesis(
                "model returned no usable test units".to_string(),
            ));
        }
        info!(units = units.len(), "test units synthesized");

        Ok(state.apply_verification_update(
            PipelineStage::SynthesizeTests,
            VerificationUpdate::default()
                .thinking(synthesized.thinking.trim())
                .test_units(units),
        ))
    }
}

/// Trims, strips list markers, drops blanks and case-insensitive repeats.
pub fn clean_units(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .map(|unit| LIST_MARKER.replace(unit.trim(), "").trim().to_string())
        .filter(|unit| !unit.is_empty())
        .filter(|unit| seen.insert(unit.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_units_normalizes_list() {
        let raw = vec![
            "1. The generated query should count schools".to_string(),
            "- the generated query should count schools".to_string(),
            "   ".to_string(),
            "* The generated query must not join satscores".to_string(),
            "2) The generated query should filter Virtual = 'F'".to_string(),
        ];
        assert_eq!(
            clean_units(&raw),
            vec![
                "The generated query should count schools",
                "The generated query must not join satscores",
                "The generated query should filter Virtual = 'F'",
            ]
        );
    }

    #[test]
    fn numbers_inside_text_survive() {
        let raw = vec!["The generated query should return 1 row".to_string()];
        assert_eq!(clean_units(&raw), raw);
    }
}
