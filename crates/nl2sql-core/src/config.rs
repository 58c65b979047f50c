//! Pipeline configuration.
//!
//! Loaded from YAML, optionally overridden by `NL2SQL_*` environment
//! variables, then validated once before an orchestrator is built.

use crate::budget::{ContextBudgetEstimator, DEFAULT_CHARS_PER_TOKEN, DEFAULT_LINK_THRESHOLD};
use crate::dialect::SqlDialect;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "NL2SQL_";
const MAX_RETRIES: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Window used when a request does not carry one.
    pub context_window: i64,
    pub schema_link_threshold: f64,
    /// Extra generation attempts after the first one.
    pub max_generation_retries: u32,
    pub source_sql_dialect: String,
    pub target_sql_dialect: String,
    pub canonical_language: String,
    pub chars_per_token: usize,
    pub capability_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            context_window: 8192,
            schema_link_threshold: DEFAULT_LINK_THRESHOLD,
            max_generation_retries: 2,
            source_sql_dialect: "generic".to_string(),
            target_sql_dialect: "sqlite".to_string(),
            canonical_language: "en".to_string(),
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            capability_timeout_secs: 60,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| PipelineError::InvalidConfiguration(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidConfiguration(format!("{}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Applies `NL2SQL_<FIELD>` overrides from the process environment.
    pub fn from_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    /// Applies overrides from any key lookup; keys are upper-case field names.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CONTEXT_WINDOW") {
            self.context_window = parse_value("CONTEXT_WINDOW", &v)?;
        }
        if let Some(v) = lookup("SCHEMA_LINK_THRESHOLD") {
            self.schema_link_threshold = parse_value("SCHEMA_LINK_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("MAX_GENERATION_RETRIES") {
            self.max_generation_retries = parse_value("MAX_GENERATION_RETRIES", &v)?;
        }
        if let Some(v) = lookup("SOURCE_SQL_DIALECT") {
            self.source_sql_dialect = v;
        }
        if let Some(v) = lookup("TARGET_SQL_DIALECT") {
            self.target_sql_dialect = v;
        }
        if let Some(v) = lookup("CANONICAL_LANGUAGE") {
            self.canonical_language = v;
        }
        if let Some(v) = lookup("CHARS_PER_TOKEN") {
            self.chars_per_token = parse_value("CHARS_PER_TOKEN", &v)?;
        }
        if let Some(v) = lookup("CAPABILITY_TIMEOUT_SECS") {
            self.capability_timeout_secs = parse_value("CAPABILITY_TIMEOUT_SECS", &v)?;
        }
        Ok(self)
    }

    /// Rejects values the pipeline cannot run with. A non-positive
    /// `context_window` is accepted; budget checks degrade instead.
    pub fn validate(&self) -> Result<()> {
        if !(self.schema_link_threshold > 0.0 && self.schema_link_threshold <= 1.0) {
            return Err(PipelineError::InvalidConfiguration(format!(
                "schema_link_threshold must be in (0, 1], got {}",
                self.schema_link_threshold
            )));
        }
        if self.max_generation_retries == 0 || self.max_generation_retries > MAX_RETRIES {
            return Err(PipelineError::InvalidConfiguration(format!(
                "max_generation_retries must be in 1..={}, got {}",
                MAX_RETRIES, self.max_generation_retries
            )));
        }
        if self.chars_per_token == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "chars_per_token must be positive".to_string(),
            ));
        }
        if self.capability_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "capability_timeout_secs must be positive".to_string(),
            ));
        }
        if self.canonical_language.trim().is_empty() {
            return Err(PipelineError::InvalidConfiguration(
                "canonical_language must not be empty".to_string(),
            ));
        }
        self.source_dialect()?;
        self.target_dialect()?;
        Ok(())
    }

    pub fn source_dialect(&self) -> Result<SqlDialect> {
        self.source_sql_dialect.parse()
    }

    pub fn target_dialect(&self) -> Result<SqlDialect> {
        self.target_sql_dialect.parse()
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.capability_timeout_secs)
    }

    pub fn budget_estimator(&self) -> ContextBudgetEstimator {
        ContextBudgetEstimator::new(self.chars_per_token, self.schema_link_threshold)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        PipelineError::InvalidConfiguration(format!("{}{}: cannot parse '{}'", ENV_PREFIX, key, raw))
    })
}
