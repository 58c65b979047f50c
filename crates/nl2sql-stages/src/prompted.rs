//! Prompt-backed model capability.
//!
//! Adapts any provider that can answer a prompt with JSON conforming to an
//! output schema into a [`ModelCapability`]. The provider client itself
//! (HTTP, auth, retries on transport errors) lives outside this crate.

use anyhow::{Context, Result};
use async_trait::async_trait;
use nl2sql_core::{
    GeneratedSql, GenerationRequest, ModelCapability, SynthesisRequest, SynthesizedTests,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

/// Structured-output completion, one request and one reply.
#[async_trait]
pub trait StructuredModel: Send + Sync {
    async fn complete_json(&self, system_prompt: &str, user_prompt: &str, output_schema: &Value) -> Result<Value>;

    fn model_name(&self) -> &str;
}

pub struct PromptedCapability<M> {
    model: M,
}

impl<M: StructuredModel> PromptedCapability<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    async fn ask<T: DeserializeOwned>(&self, system: &str, user: &str, schema: Value, what: &str) -> Result<T> {
        let reply = self.model.complete_json(system, user, &schema).await?;
        serde_json::from_value(reply).with_context(|| format!("malformed {} reply from {}", what, self.model.model_name()))
    }
}

#[derive(Deserialize)]
struct TranslationReply {
    translation: String,
}

fn string_fields(fields: &[&str]) -> Value {
    let properties: serde_json::Map<String, Value> = fields
        .iter()
        .map(|f| (f.to_string(), json!({ "type": "string" })))
        .collect();
    json!({ "type": "object", "properties": properties, "required": fields })
}

#[async_trait]
impl<M: StructuredModel> ModelCapability for PromptedCapability<M> {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String> {
        let system = "You translate database questions. Keep table names, column names and literal values unchanged.";
        let user = format!("Translate into language '{}':\n{}", target_language, text);
        let reply: TranslationReply = self
            .ask(system, &user, string_fields(&["translation"]), "translation")
            .await?;
        Ok(reply.translation)
    }

    async fn generate_sql(&self, request: &GenerationRequest) -> Result<GeneratedSql> {
        let system = format!(
            "You write a single {} SQL query answering the question over the given schema. \
             Return the query, a short plan, and your reasoning.",
            request.dialect
        );
        let mut user = format!("Schema:\n{}\n\nQuestion: {}", request.schema, request.question);
        if let Some(previous) = &request.previous_error {
            user.push_str(&format!("\n\nThe previous attempt failed: {}\nAvoid that mistake.", previous));
        }
        self.ask(
            &system,
            &user,
            string_fields(&["sql", "plan", "chain_of_thought"]),
            "generation",
        )
        .await
    }

    async fn synthesize_tests(&self, request: &SynthesisRequest) -> Result<SynthesizedTests> {
        let system = "You write short, falsifiable assertions a correct SQL query for the question must satisfy. \
                      Phrase each as 'the generated query should ...' or 'the generated query must not ...'.";
        let user = format!(
            "Schema:\n{}\n\nQuestion: {}\n\nCandidate SQL:\n{}",
            request.schema, request.question, request.sql
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "thinking": { "type": "string" },
                "test_units": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["thinking", "test_units"]
        });
        self.ask(system, &user, schema, "test synthesis").await
    }

    fn model_name(&self) -> &str {
        self.model.model_name()
    }
}
