#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use nl2sql_core::{
    ColumnSchema, GeneratedSql, GenerationRequest, ModelCapability, PipelineConfig, SchemaContext,
    SchemaLinker, SynthesisRequest, SynthesizedTests, TableSchema,
};
use nl2sql_core::telemetry::init_tracing;
use nl2sql_stages::{LexicalSchemaLinker, Orchestrator};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const VIRTUAL_SQL: &str = "SELECT COUNT(*) FROM schools WHERE Virtual = 'F'";

/// Shared, ordered log of capability calls.
pub(crate) type CallLog = Arc<Mutex<Vec<&'static str>>>;

#[derive(Default)]
pub(crate) struct Script {
    pub translation: Option<std::result::Result<String, String>>,
    pub generations: VecDeque<std::result::Result<GeneratedSql, String>>,
    pub tests: Option<std::result::Result<SynthesizedTests, String>>,
    pub generate_delay: Option<Duration>,
}

pub(crate) struct ScriptedModel {
    script: Mutex<Script>,
    log: CallLog,
    generation_requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedModel {
    pub(crate) fn new(script: Script, log: CallLog) -> Self {
        Self {
            script: Mutex::new(script),
            log,
            generation_requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn generation_requests(&self) -> Vec<GenerationRequest> {
        self.generation_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelCapability for ScriptedModel {
    async fn translate(&self, _text: &str, _target_language: &str) -> Result<String> {
        self.log.lock().unwrap().push("translate");
        let scripted = self.script.lock().unwrap().translation.clone();
        match scripted {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Err(anyhow!("no translation scripted")),
        }
    }

    async fn generate_sql(&self, request: &GenerationRequest) -> Result<GeneratedSql> {
        self.log.lock().unwrap().push("generate_sql");
        self.generation_requests.lock().unwrap().push(request.clone());
        let (next, delay) = {
            let mut script = self.script.lock().unwrap();
            (script.generations.pop_front(), script.generate_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match next {
            Some(Ok(generated)) => Ok(generated),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Err(anyhow!("generation script exhausted")),
        }
    }

    async fn synthesize_tests(&self, _request: &SynthesisRequest) -> Result<SynthesizedTests> {
        self.log.lock().unwrap().push("synthesize_tests");
        let scripted = self.script.lock().unwrap().tests.clone();
        match scripted {
            Some(Ok(tests)) => Ok(tests),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Ok(default_tests()),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Lexical linker that records its calls in the shared log.
pub(crate) struct RecordingLinker {
    inner: LexicalSchemaLinker,
    log: CallLog,
}

#[async_trait]
impl SchemaLinker for RecordingLinker {
    async fn link_schema(&self, full_schema: &SchemaContext, question: &str) -> Result<SchemaContext> {
        self.log.lock().unwrap().push("link_schema");
        self.inner.link_schema(full_schema, question).await
    }
}

pub(crate) struct Harness {
    pub orchestrator: Orchestrator,
    pub model: Arc<ScriptedModel>,
    pub log: CallLog,
}

impl Harness {
    pub(crate) fn new(script: Script) -> Self {
        Self::with_config(script, PipelineConfig::default())
    }

    pub(crate) fn with_config(script: Script, config: PipelineConfig) -> Self {
        init_tracing();
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let model = Arc::new(ScriptedModel::new(script, log.clone()));
        let linker = Arc::new(RecordingLinker {
            inner: LexicalSchemaLinker::default(),
            log: log.clone(),
        });
        let orchestrator = Orchestrator::new(config, model.clone(), linker).unwrap();
        Self {
            orchestrator,
            model,
            log,
        }
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }
}

pub(crate) fn generated(sql: &str) -> GeneratedSql {
    GeneratedSql {
        sql: sql.to_string(),
        plan: "Filter schools on Virtual = 'F' and count them.".to_string(),
        chain_of_thought: "Virtual = 'F' marks exclusively virtual schools.".to_string(),
    }
}

pub(crate) fn default_tests() -> SynthesizedTests {
    SynthesizedTests {
        thinking: "The answer is a single count over schools.".to_string(),
        test_units: vec![
            "the generated query should count rows of the schools table".to_string(),
            "the generated query should filter on Virtual = 'F'".to_string(),
            "the generated query must not join unrelated tables".to_string(),
        ],
    }
}

fn column(name: &str, data_type: &str, description: Option<&str>) -> ColumnSchema {
    ColumnSchema {
        name: name.to_string(),
        data_type: data_type.to_string(),
        description: description.map(str::to_string),
        primary_key: name == "CDSCode",
    }
}

pub(crate) fn schools_table() -> TableSchema {
    TableSchema {
        name: "schools".to_string(),
        description: None,
        columns: vec![
            column("CDSCode", "TEXT", None),
            column("School", "TEXT", None),
            column("County", "TEXT", None),
            column(
                "Virtual",
                "TEXT",
                Some("F = exclusively virtual, V = primarily virtual, N = not virtual"),
            ),
        ],
        foreign_keys: vec![],
    }
}

pub(crate) fn satscores_table() -> TableSchema {
    TableSchema {
        name: "satscores".to_string(),
        description: None,
        columns: vec![
            column("cds", "TEXT", None),
            column("AvgScrMath", "INTEGER", None),
            column("NumTstTakr", "INTEGER", None),
        ],
        foreign_keys: vec![],
    }
}

pub(crate) fn small_schema() -> SchemaContext {
    SchemaContext::new(vec![schools_table()])
}

/// Two tables whose rendering is exactly `chars` characters long; the
/// padding sits in the description of the unrelated table.
pub(crate) fn padded_schema(chars: usize) -> SchemaContext {
    let unpadded = SchemaContext::new(vec![schools_table(), satscores_table()]);
    let base = unpadded.render().chars().count();
    // "-- " prefix and trailing newline around the description
    let padding = chars - base - 4;

    let mut satscores = satscores_table();
    satscores.description = Some("x".repeat(padding));
    SchemaContext::new(vec![schools_table(), satscores])
}
