//! NL2SQL Core: pipeline state, budget gate, configuration and capability
//! contracts.
//!
//! Shared by every stage of the question-to-SQL pipeline. Nothing in here
//! performs I/O except configuration loading.

pub mod budget;
pub mod capability;
pub mod config;
pub mod context;
pub mod data_model;
pub mod dialect;
pub mod error;
pub mod stage;
pub mod state;
pub mod telemetry;

pub use budget::{needs_schema_linking, BudgetDecision, ContextBudgetEstimator};
pub use capability::{GenerationRequest, ModelCapability, SchemaLinker, SynthesisRequest, SynthesizedTests};
pub use config::PipelineConfig;
pub use context::RunContext;
pub use data_model::{ColumnSchema, ForeignKey, PipelineRequest, PipelineResponse, SchemaContext, TableSchema};
pub use dialect::SqlDialect;
pub use error::{PipelineError, StateError};
pub use stage::{PipelineStage, StageProof, StageTimer};
pub use state::{
    AuditEntry, GeneratedSql, GenerationFailure, GenerationOutcome, PipelineState, QuestionUpdate, UpdateOutcome,
    VerificationUpdate,
};

/// Engine version reported in logs
pub const NL2SQL_VERSION: &str = "1.0.0";
