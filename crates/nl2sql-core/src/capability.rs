//! Capability traits
//!
//! The pipeline never talks to a model provider directly. Everything it
//! needs from a model goes through [`ModelCapability`], and schema reduction
//! goes through [`SchemaLinker`]. Swapping providers means swapping the
//! implementation handed to the orchestrator.

use crate::data_model::SchemaContext;
use crate::dialect::SqlDialect;
use crate::state::GeneratedSql;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Input of one generation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub question: String,
    /// Rendered schema, full or linked.
    pub schema: String,
    pub dialect: SqlDialect,
    /// Diagnostic of the previous attempt when retrying.
    pub previous_error: Option<String>,
}

/// Input of test-unit synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub question: String,
    pub schema: String,
    pub sql: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedTests {
    pub thinking: String,
    pub test_units: Vec<String>,
}

#[async_trait]
pub trait ModelCapability: Send + Sync {
    /// Translate `text` into `target_language` (ISO 639-1 code).
    async fn translate(&self, text: &str, target_language: &str) -> Result<String>;

    async fn generate_sql(&self, request: &GenerationRequest) -> Result<GeneratedSql>;

    async fn synthesize_tests(&self, request: &SynthesisRequest) -> Result<SynthesizedTests>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}

#[async_trait]
pub trait SchemaLinker: Send + Sync {
    /// Reduce `full_schema` to the tables relevant to `question`.
    async fn link_schema(&self, full_schema: &SchemaContext, question: &str) -> Result<SchemaContext>;
}
