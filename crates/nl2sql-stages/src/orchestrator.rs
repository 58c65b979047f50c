//! Pipeline orchestrator: runs one request through the stage state machine.
//!
//! ```text
//! START → NORMALIZE_LANGUAGE → BUDGET_CHECK → (SCHEMA_LINK) → GENERATE
//!       → DIALECT_NORMALIZE → SYNTHESIZE_TESTS → DONE
//! ```
//!
//! Any stage can move to FAILED. Only GENERATE retries.

use crate::bounded;
use crate::dialect::DialectNormalizer;
use crate::generate::SqlGenerator;
use crate::language::{restore_original, LanguageNormalizer, LanguageOutcome};
use crate::verify::TestUnitSynthesizer;
use nl2sql_core::{
    ContextBudgetEstimator, GenerationFailure, GenerationOutcome, ModelCapability, PipelineConfig, PipelineError,
    PipelineRequest, PipelineResponse, PipelineStage, PipelineState, RunContext, SchemaContext,
    SchemaLinker, StageProof, StageTimer,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};

pub struct Orchestrator {
    config: PipelineConfig,
    estimator: ContextBudgetEstimator,
    language: LanguageNormalizer,
    generator: SqlGenerator,
    dialect: DialectNormalizer,
    synthesizer: TestUnitSynthesizer,
    capability: Arc<dyn ModelCapability>,
    linker: Arc<dyn SchemaLinker>,
}

/// Everything one run accumulates besides the state record.
struct Run {
    ctx: RunContext,
    state: PipelineState,
    full_schema: SchemaContext,
    /// Schema text the model sees; replaced when linking runs.
    schema_text: String,
    schema_linked: bool,
    context_usage: f64,
    verification_complete: bool,
    warnings: Vec<String>,
    stages: Vec<StageProof>,
    failure: Option<PipelineError>,
}

struct Transition {
    next: PipelineStage,
    verdict: Option<String>,
}

impl Transition {
    fn to(next: PipelineStage, verdict: impl Into<String>) -> Self {
        Self {
            next,
            verdict: Some(verdict.into()),
        }
    }
}

impl Orchestrator {
    /// Validates `config` and wires the stages from it.
    pub fn new(
        config: PipelineConfig,
        capability: Arc<dyn ModelCapability>,
        linker: Arc<dyn SchemaLinker>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let timeout = config.capability_timeout();
        let target = config.target_dialect()?;
        Ok(Self {
            estimator: config.budget_estimator(),
            language: LanguageNormalizer::new(config.canonical_language.clone(), timeout),
            generator: SqlGenerator::new(target, timeout),
            dialect: DialectNormalizer::new(config.source_dialect()?, target),
            synthesizer: TestUnitSynthesizer::new(timeout),
            config,
            capability,
            linker,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the request to DONE or FAILED. Failures are reported in the
    /// response's `error`, never as a panic or raw error.
    pub async fn run(&self, request: PipelineRequest) -> PipelineResponse {
        let window = request.context_window.unwrap_or(self.config.context_window);
        let ctx = RunContext::new(window);
        let span = info_span!("pipeline", trace_id = %ctx.trace_id, model = %self.capability.model_name());
        self.execute(ctx, request).instrument(span).await
    }

    /// Like [`Orchestrator::run`], but abandons the run when `cancel`
    /// completes first. The pending capability call and the state are
    /// dropped; nothing of the run is kept.
    pub async fn run_until<C>(&self, request: PipelineRequest, cancel: C) -> Result<PipelineResponse, PipelineError>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            response = self.run(request) => Ok(response),
            _ = cancel => {
                warn!("pipeline run cancelled");
                Err(PipelineError::Cancelled)
            }
        }
    }

    async fn execute(&self, ctx: RunContext, request: PipelineRequest) -> PipelineResponse {
        let mut run = Run {
            ctx,
            state: PipelineState::new(request.question),
            schema_text: request.schema_context.render(),
            full_schema: request.schema_context,
            schema_linked: false,
            context_usage: 0.0,
            verification_complete: false,
            warnings: Vec::new(),
            stages: Vec::new(),
            failure: None,
        };

        let mut stage = PipelineStage::Start;
        while !stage.is_terminal() {
            let timer = StageTimer::start(stage, &run.state);
            match self.step(stage, &mut run).await {
                Ok(transition) => {
                    info!(stage = %stage, next = %transition.next, verdict = ?transition.verdict, "stage complete");
                    run.stages.push(timer.finish(&run.state, transition.verdict));
                    stage = transition.next;
                }
                Err(e) => {
                    error!(stage = %stage, error = %e, "stage failed");
                    run.stages.push(timer.finish(&run.state, Some(e.to_string())));
                    run.failure = Some(e);
                    stage = PipelineStage::Failed;
                }
            }
        }

        info!(
            outcome = %stage,
            elapsed_ms = run.ctx.elapsed_ms(),
            version = run.state.version(),
            "pipeline finished"
        );
        respond(run)
    }

    async fn step(&self, stage: PipelineStage, run: &mut Run) -> Result<Transition, PipelineError> {
        match stage {
            PipelineStage::Start => Ok(Transition::to(
                PipelineStage::NormalizeLanguage,
                format!("question received ({} chars)", run.state.question().chars().count()),
            )),
            PipelineStage::NormalizeLanguage => self.normalize_language(run).await,
            PipelineStage::BudgetCheck => Ok(self.budget_check(run)),
            PipelineStage::SchemaLink => self.schema_link(run).await,
            PipelineStage::Generate => self.generate(run).await,
            PipelineStage::DialectNormalize => self.dialect_normalize(run),
            PipelineStage::SynthesizeTests => Ok(self.synthesize_tests(run).await),
            PipelineStage::Done | PipelineStage::Failed => Ok(Transition {
                next: stage,
                verdict: None,
            }),
        }
    }

    async fn normalize_language(&self, run: &mut Run) -> Result<Transition, PipelineError> {
        let outcome = self.language.normalize(&mut run.state, self.capability.as_ref()).await?;
        let verdict = match outcome {
            LanguageOutcome::AlreadyCanonical { language } => format!("already canonical ({})", language),
            LanguageOutcome::Translated { from, .. } => format!("translated from {}", from),
        };
        Ok(Transition::to(PipelineStage::BudgetCheck, verdict))
    }

    fn budget_check(&self, run: &mut Run) -> Transition {
        let decision = self.estimator.decide(&run.schema_text, run.ctx.context_window);
        run.context_usage = decision.usage;
        if let Some(warning) = decision.warning {
            run.warnings.push(warning);
        }
        let next = if decision.needs_linking {
            PipelineStage::SchemaLink
        } else {
            PipelineStage::Generate
        };
        Transition::to(
            next,
            format!(
                "{} schema tokens, usage {:.2} (threshold {:.2})",
                decision.schema_tokens,
                decision.usage,
                self.estimator.threshold()
            ),
        )
    }

    async fn schema_link(&self, run: &mut Run) -> Result<Transition, PipelineError> {
        let linked = bounded(
            "link_schema",
            self.capability_timeout(),
            self.linker.link_schema(&run.full_schema, run.state.question()),
            PipelineError::SchemaLink,
        )
        .await?;
        if linked.is_empty() {
            return Err(PipelineError::SchemaLink("linker returned no tables".to_string()));
        }

        run.schema_text = linked.render();
        run.schema_linked = true;

        let recheck = self.estimator.decide(&run.schema_text, run.ctx.context_window);
        if recheck.needs_linking {
            run.warnings.push(format!(
                "linked schema still uses {:.2} of the context window",
                recheck.usage
            ));
        }
        Ok(Transition::to(
            PipelineStage::Generate,
            format!(
                "linked {} of {} tables",
                linked.tables.len(),
                run.full_schema.tables.len()
            ),
        ))
    }

    async fn generate(&self, run: &mut Run) -> Result<Transition, PipelineError> {
        let attempts = self.config.max_generation_retries + 1;
        for attempt in 1..=attempts {
            let outcome = self
                .generator
                .generate(&mut run.state, &run.schema_text, self.capability.as_ref())
                .await;
            match outcome {
                GenerationOutcome::Generated(_) => {
                    return Ok(Transition::to(
                        PipelineStage::DialectNormalize,
                        format!("generated on attempt {}/{}", attempt, attempts),
                    ));
                }
                GenerationOutcome::Failed { reason, diagnostic } => {
                    warn!(attempt, attempts, reason = ?reason, diagnostic = %diagnostic, "generation failed");
                }
            }
        }
        Err(PipelineError::GenerationExhausted {
            attempts,
            reason: run.state.failure_reason().unwrap_or(GenerationFailure::Capability),
            detail: run.state.error().unwrap_or_default().to_string(),
        })
    }

    fn dialect_normalize(&self, run: &mut Run) -> Result<Transition, PipelineError> {
        let outcome = self.dialect.normalize_detailed(run.state.sql())?;
        if let Some(reason) = &outcome.fallback_reason {
            run.warnings.push(format!(
                "SQL kept in source dialect; rewrite for {} failed: {}",
                self.dialect.target(),
                reason
            ));
        }
        if outcome.rewritten {
            run.state.replace_sql(PipelineStage::DialectNormalize, outcome.sql)?;
        }
        let verdict = match (&outcome.fallback_reason, outcome.rewritten) {
            (Some(_), _) => "fallback to original",
            (None, true) => "rewritten",
            (None, false) => "unchanged",
        };
        Ok(Transition::to(PipelineStage::SynthesizeTests, verdict))
    }

    async fn synthesize_tests(&self, run: &mut Run) -> Transition {
        match self
            .synthesizer
            .synthesize(&mut run.state, &run.schema_text, self.capability.as_ref())
            .await
        {
            Ok(_) => {
                run.verification_complete = true;
                Transition::to(
                    PipelineStage::Done,
                    format!("{} test units", run.state.test_units().len()),
                )
            }
            Err(e) => {
                warn!(error = %e, "verification incomplete");
                run.warnings.push(format!("{} ({})", e.user_message(), e));
                Transition::to(PipelineStage::Done, "verification incomplete")
            }
        }
    }

    fn capability_timeout(&self) -> Duration {
        self.config.capability_timeout()
    }
}

fn respond(run: Run) -> PipelineResponse {
    let state = &run.state;
    let error = run.failure.as_ref().map(PipelineError::user_message);
    // A failed run hands back no part of the generation, even if some exists.
    let (sql, plan, chain_of_thought) = if error.is_some() {
        (String::new(), String::new(), String::new())
    } else {
        (
            state.sql().to_string(),
            state.plan().to_string(),
            state.chain_of_thought().to_string(),
        )
    };

    PipelineResponse {
        trace_id: run.ctx.trace_id.clone(),
        sql,
        plan,
        chain_of_thought,
        thinking: state.thinking().to_string(),
        test_units: state.test_units().to_vec(),
        error,
        original_question: restore_original(state).to_string(),
        original_language: state.original_language().map(str::to_string),
        schema_linked: run.schema_linked,
        context_usage: run.context_usage,
        verification_complete: run.verification_complete,
        warnings: run.warnings,
        stages: run.stages,
    }
}
