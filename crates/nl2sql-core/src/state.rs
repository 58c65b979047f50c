//! Pipeline State: the per-request record threaded through every stage.
//!
//! Fields are private. Stages change the record only through the update
//! operations below, each of which bumps [`PipelineState::version`] and
//! returns the audit entries it appended.

use crate::error::StateError;
use crate::stage::PipelineStage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

const UNSET: &str = "<unset>";

/// Successful output of the generation stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedSql {
    pub sql: String,
    pub plan: String,
    pub chain_of_thought: String,
}

/// Why a generation attempt produced no SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationFailure {
    Timeout,
    EmptySql,
    Capability,
}

impl fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "the model timed out"),
            Self::EmptySql => write!(f, "the model returned no SQL"),
            Self::Capability => write!(f, "the model reported an error"),
        }
    }
}

/// Result of the generation stage. Holding SQL and a diagnostic at the same
/// time is not representable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Generated(GeneratedSql),
    /// `diagnostic` is internal detail, fed back to the model on retry.
    Failed {
        reason: GenerationFailure,
        diagnostic: String,
    },
}

impl GenerationOutcome {
    /// Blank SQL is not a result; it becomes a failure.
    pub fn from_generated(generated: GeneratedSql) -> Self {
        if generated.sql.trim().is_empty() {
            Self::failed(GenerationFailure::EmptySql, "model returned empty SQL")
        } else {
            Self::Generated(generated)
        }
    }

    /// A failure always carries a non-empty diagnostic.
    pub fn failed(reason: GenerationFailure, diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        let diagnostic = if diagnostic.trim().is_empty() {
            "generation failed without a diagnostic".to_string()
        } else {
            diagnostic
        };
        Self::Failed { reason, diagnostic }
    }

    pub fn is_generated(&self) -> bool {
        matches!(self, Self::Generated(_))
    }
}

/// One field write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub stage: PipelineStage,
    pub field: String,
    pub old: Option<String>,
    pub new: String,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    fn new(stage: PipelineStage, field: &str, old: Option<String>, new: String) -> Self {
        Self {
            stage,
            field: field.to_string(),
            old,
            new,
            at: Utc::now(),
        }
    }

    /// `field: old -> new`
    pub fn line(&self) -> String {
        format!(
            "{}: {} -> {}",
            self.field,
            self.old.as_deref().unwrap_or(UNSET),
            self.new
        )
    }
}

/// What an update call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Nothing was supplied (or nothing needed writing); zero field writes.
    NoUpdates,
    Applied(Vec<AuditEntry>),
}

impl UpdateOutcome {
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoUpdates)
    }

    pub fn changes(&self) -> &[AuditEntry] {
        match self {
            Self::NoUpdates => &[],
            Self::Applied(changes) => changes,
        }
    }
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoUpdates => write!(f, "no updates made"),
            Self::Applied(changes) => {
                let lines: Vec<String> = changes.iter().map(AuditEntry::line).collect();
                write!(f, "{}", lines.join("\n"))
            }
        }
    }
}

/// Language/question fields. `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionUpdate {
    pub question: Option<String>,
    pub original_question: Option<String>,
    pub original_language: Option<String>,
}

impl QuestionUpdate {
    pub fn question(mut self, value: impl Into<String>) -> Self {
        self.question = Some(value.into());
        self
    }

    pub fn original_question(mut self, value: impl Into<String>) -> Self {
        self.original_question = Some(value.into());
        self
    }

    pub fn original_language(mut self, value: impl Into<String>) -> Self {
        self.original_language = Some(value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.question.is_none() && self.original_question.is_none() && self.original_language.is_none()
    }
}

/// Verification fields. `test_units`, when supplied, replaces the list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationUpdate {
    pub thinking: Option<String>,
    pub test_units: Option<Vec<String>>,
}

impl VerificationUpdate {
    pub fn thinking(mut self, value: impl Into<String>) -> Self {
        self.thinking = Some(value.into());
        self
    }

    pub fn test_units(mut self, units: Vec<String>) -> Self {
        self.test_units = Some(units);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.thinking.is_none() && self.test_units.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineState {
    question: String,
    original_question: Option<String>,
    original_language: Option<String>,
    thinking: String,
    test_units: Vec<String>,
    generation: Option<GenerationOutcome>,
    version: u64,
    audit: Vec<AuditEntry>,
}

impl PipelineState {
    /// A fresh record holding only the submitted question.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            original_question: None,
            original_language: None,
            thinking: String::new(),
            test_units: Vec::new(),
            generation: None,
            version: 0,
            audit: Vec::new(),
        }
    }

    /// Writes the supplied language/question fields.
    ///
    /// `original_question` and `original_language` are write-once: writing a
    /// different value a second time fails before anything is written.
    /// A changed `question` clears `thinking` and `test_units`.
    pub fn apply_question_update(
        &mut self,
        stage: PipelineStage,
        update: QuestionUpdate,
    ) -> Result<UpdateOutcome, StateError> {
        if update.is_empty() {
            debug!(stage = %stage, "question update with no fields");
            return Ok(UpdateOutcome::NoUpdates);
        }

        check_write_once("original_question", &self.original_question, &update.original_question)?;
        check_write_once("original_language", &self.original_language, &update.original_language)?;

        let mut changes = Vec::new();
        let mut question_changed = false;

        if let Some(question) = update.question.filter(|q| *q != self.question) {
            question_changed = true;
            let old = std::mem::replace(&mut self.question, question);
            changes.push(self.write(stage, "question", Some(old), self.question.clone()));
        }
        if self.original_question.is_none() {
            if let Some(original) = update.original_question {
                self.original_question = Some(original.clone());
                changes.push(self.write(stage, "original_question", None, original));
            }
        }
        if self.original_language.is_none() {
            if let Some(language) = update.original_language {
                self.original_language = Some(language.clone());
                changes.push(self.write(stage, "original_language", None, language));
            }
        }

        if question_changed {
            changes.extend(self.invalidate_verification(stage));
        }

        if changes.is_empty() {
            return Ok(UpdateOutcome::NoUpdates);
        }
        Ok(UpdateOutcome::Applied(changes))
    }

    /// Writes the verification fields. A supplied `test_units` list replaces
    /// the previous one entirely.
    pub fn apply_verification_update(
        &mut self,
        stage: PipelineStage,
        update: VerificationUpdate,
    ) -> UpdateOutcome {
        if update.is_empty() {
            debug!(stage = %stage, "verification update with no fields");
            return UpdateOutcome::NoUpdates;
        }

        let mut changes = Vec::new();
        if let Some(thinking) = update.thinking {
            let old = std::mem::replace(&mut self.thinking, thinking);
            changes.push(self.write(stage, "thinking", non_empty(old), self.thinking.clone()));
        }
        if let Some(units) = update.test_units {
            let old = std::mem::replace(&mut self.test_units, units);
            let old = if old.is_empty() { None } else { Some(render_units(&old)) };
            changes.push(self.write(stage, "test_units", old, render_units(&self.test_units)));
        }
        UpdateOutcome::Applied(changes)
    }

    /// Stores the generation result, replacing any earlier attempt.
    pub fn record_generation(&mut self, stage: PipelineStage, outcome: GenerationOutcome) -> AuditEntry {
        let old = self.generation.as_ref().map(summarize_generation);
        let new = summarize_generation(&outcome);
        let field = if outcome.is_generated() { "sql" } else { "error" };
        self.generation = Some(outcome);
        self.write(stage, field, old, new)
    }

    /// Swaps the SQL text of a successful generation (dialect rewrite).
    pub fn replace_sql(&mut self, stage: PipelineStage, sql: impl Into<String>) -> Result<AuditEntry, StateError> {
        let sql = sql.into();
        let old = match self.generation.as_mut() {
            Some(GenerationOutcome::Generated(generated)) => std::mem::replace(&mut generated.sql, sql.clone()),
            _ => return Err(StateError::NoGeneratedSql),
        };
        Ok(self.write(stage, "sql", Some(old), sql))
    }

    fn invalidate_verification(&mut self, stage: PipelineStage) -> Vec<AuditEntry> {
        let mut changes = Vec::new();
        if !self.test_units.is_empty() {
            let old = render_units(&std::mem::take(&mut self.test_units));
            changes.push(self.write(stage, "test_units", Some(old), render_units(&[])));
        }
        if !self.thinking.is_empty() {
            let old = std::mem::take(&mut self.thinking);
            changes.push(self.write(stage, "thinking", Some(old), String::new()));
        }
        changes
    }

    fn write(&mut self, stage: PipelineStage, field: &str, old: Option<String>, new: String) -> AuditEntry {
        self.version += 1;
        let entry = AuditEntry::new(stage, field, old, new);
        debug!(stage = %stage, version = self.version, "{}", entry.line());
        self.audit.push(entry.clone());
        entry
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn original_question(&self) -> Option<&str> {
        self.original_question.as_deref()
    }

    pub fn original_language(&self) -> Option<&str> {
        self.original_language.as_deref()
    }

    pub fn thinking(&self) -> &str {
        &self.thinking
    }

    pub fn test_units(&self) -> &[String] {
        &self.test_units
    }

    pub fn generation(&self) -> Option<&GenerationOutcome> {
        self.generation.as_ref()
    }

    pub fn sql(&self) -> &str {
        match &self.generation {
            Some(GenerationOutcome::Generated(generated)) => &generated.sql,
            _ => "",
        }
    }

    pub fn plan(&self) -> &str {
        match &self.generation {
            Some(GenerationOutcome::Generated(generated)) => &generated.plan,
            _ => "",
        }
    }

    pub fn chain_of_thought(&self) -> &str {
        match &self.generation {
            Some(GenerationOutcome::Generated(generated)) => &generated.chain_of_thought,
            _ => "",
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.generation {
            Some(GenerationOutcome::Failed { diagnostic, .. }) => Some(diagnostic),
            _ => None,
        }
    }

    pub fn failure_reason(&self) -> Option<GenerationFailure> {
        match &self.generation {
            Some(GenerationOutcome::Failed { reason, .. }) => Some(*reason),
            _ => None,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn audit(&self) -> &[AuditEntry] {
        &self.audit
    }

    /// Serialized form used for stage hashing.
    pub fn snapshot(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

fn check_write_once(
    field: &'static str,
    current: &Option<String>,
    attempted: &Option<String>,
) -> Result<(), StateError> {
    match (current, attempted) {
        (Some(current), Some(attempted)) if current != attempted => Err(StateError::Immutable {
            field,
            current: current.clone(),
            attempted: attempted.clone(),
        }),
        _ => Ok(()),
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn render_units(units: &[String]) -> String {
    format!("{:?}", units)
}

fn summarize_generation(outcome: &GenerationOutcome) -> String {
    match outcome {
        GenerationOutcome::Generated(generated) => generated.sql.clone(),
        GenerationOutcome::Failed { diagnostic, .. } => format!("error: {}", diagnostic),
    }
}
