//! Context budget: decides whether the schema must be linked down before
//! it is sent to the model.
//!
//! Token counts are a character heuristic, not a tokenizer. The same schema
//! text always yields the same decision.

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;
pub const DEFAULT_LINK_THRESHOLD: f64 = 0.5;

/// Outcome of a budget check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetDecision {
    pub schema_tokens: usize,
    pub usage: f64,
    pub needs_linking: bool,
    /// Set when the window was unusable and the check degraded.
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ContextBudgetEstimator {
    chars_per_token: usize,
    threshold: f64,
}

impl Default for ContextBudgetEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN, DEFAULT_LINK_THRESHOLD)
    }
}

impl ContextBudgetEstimator {
    /// `chars_per_token` of zero is clamped to one.
    pub fn new(chars_per_token: usize, threshold: f64) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// `0` for empty text, otherwise at least `1`.
    pub fn estimate_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        (text.chars().count() / self.chars_per_token).max(1)
    }

    /// Full check over a rendered schema against the given window.
    pub fn decide(&self, schema_text: &str, context_window: i64) -> BudgetDecision {
        let schema_tokens = self.estimate_tokens(schema_text);
        let (needs_linking, usage) = needs_schema_linking(schema_tokens, context_window, self.threshold);
        let warning = (context_window <= 0).then(|| {
            format!(
                "context window {} is not positive; schema linking skipped",
                context_window
            )
        });
        BudgetDecision {
            schema_tokens,
            usage,
            needs_linking,
            warning,
        }
    }
}

/// `(usage > threshold, usage)` where `usage = schema_tokens / context_window`.
///
/// A non-positive window cannot be divided by; it yields `(false, 0.0)` and
/// logs a configuration warning instead of failing.
pub fn needs_schema_linking(schema_tokens: usize, context_window: i64, threshold: f64) -> (bool, f64) {
    if context_window <= 0 {
        warn!(
            context_window,
            "invalid context window; treating budget as unlimited"
        );
        return (false, 0.0);
    }
    let usage = schema_tokens as f64 / context_window as f64;
    (usage > threshold, usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_heuristic() {
        let estimator = ContextBudgetEstimator::default();
        assert_eq!(estimator.estimate_tokens(""), 0);
        assert_eq!(estimator.estimate_tokens("ab"), 1);
        assert_eq!(estimator.estimate_tokens("abcd"), 1);
        assert_eq!(estimator.estimate_tokens("abcdefghi"), 2);
        assert_eq!(estimator.estimate_tokens(&"x".repeat(2400)), 600);
    }

    #[test]
    fn estimate_counts_characters_not_bytes() {
        let estimator = ContextBudgetEstimator::default();
        // 8 characters, 16 bytes
        assert_eq!(estimator.estimate_tokens("éééééééé"), 2);
    }

    #[test]
    fn threshold_cases() {
        assert_eq!(needs_schema_linking(6000, 10000, 0.5), (true, 0.6));
        assert_eq!(needs_schema_linking(4000, 10000, 0.5), (false, 0.4));
        assert_eq!(needs_schema_linking(5000, 10000, 0.5), (false, 0.5));
    }

    #[test]
    fn non_positive_window_degrades() {
        for window in [0, -1, -8192] {
            for threshold in [0.0, 0.5, 1.0] {
                assert_eq!(needs_schema_linking(123_456, window, threshold), (false, 0.0));
            }
        }
    }

    #[test]
    fn decide_reports_warning_for_bad_window() {
        let estimator = ContextBudgetEstimator::default();
        let decision = estimator.decide("CREATE TABLE t (a INT)", 0);
        assert!(!decision.needs_linking);
        assert!(decision.warning.is_some());

        let decision = estimator.decide(&"x".repeat(2400), 1000);
        assert_eq!(decision.schema_tokens, 600);
        assert!(decision.needs_linking);
        assert!((decision.usage - 0.6).abs() < f64::EPSILON);
        assert!(decision.warning.is_none());
    }
}
