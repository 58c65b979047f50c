//! Data Model: PipelineRequest, PipelineResponse, SchemaContext
use crate::stage::StageProof;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    /// DDL-like rendering, one column per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(description) = &self.description {
            out.push_str(&format!("-- {}\n", description));
        }
        out.push_str(&format!("CREATE TABLE {} (\n", self.name));

        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut line = format!("  {} {}", c.name, c.data_type);
                if c.primary_key {
                    line.push_str(" PRIMARY KEY");
                }
                if let Some(description) = &c.description {
                    line.push_str(&format!(" -- {}", description));
                }
                line
            })
            .collect();
        lines.extend(self.foreign_keys.iter().map(|fk| {
            format!(
                "  FOREIGN KEY ({}) REFERENCES {}({})",
                fk.column, fk.references_table, fk.references_column
            )
        }));

        // Comments run to end of line, so the separator goes before them.
        let count = lines.len();
        for (i, line) in lines.into_iter().enumerate() {
            let line = if i + 1 < count { add_separator(&line) } else { line };
            out.push_str(&line);
            out.push('\n');
        }
        out.push_str(");");
        out
    }
}

fn add_separator(line: &str) -> String {
    match line.find(" -- ") {
        Some(pos) => format!("{},{}", &line[..pos], &line[pos..]),
        None => format!("{},", line),
    }
}

/// Schema representation handed to the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub tables: Vec<TableSchema>,
}

impl SchemaContext {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self {
            database: None,
            tables,
        }
    }

    /// Text that is budgeted and placed in prompts.
    pub fn render(&self) -> String {
        let mut parts = Vec::with_capacity(self.tables.len() + 1);
        if let Some(database) = &self.database {
            parts.push(format!("-- database: {}", database));
        }
        parts.extend(self.tables.iter().map(TableSchema::render));
        parts.join("\n\n")
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Copy keeping only the named tables (case-insensitive), in schema order.
    pub fn subset<'a, I>(&self, names: I) -> SchemaContext
    where
        I: IntoIterator<Item = &'a str>,
    {
        let keep: HashSet<String> = names.into_iter().map(|n| n.to_lowercase()).collect();
        SchemaContext {
            database: self.database.clone(),
            tables: self
                .tables
                .iter()
                .filter(|t| keep.contains(&t.name.to_lowercase()))
                .cloned()
                .collect(),
        }
    }
}

/// Inbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub question: String,
    pub schema_context: SchemaContext,
    /// Model window in tokens; the configured window is used when absent.
    #[serde(default)]
    pub context_window: Option<i64>,
}

impl PipelineRequest {
    pub fn new(question: impl Into<String>, schema_context: SchemaContext) -> Self {
        Self {
            question: question.into(),
            schema_context,
            context_window: None,
        }
    }

    pub fn with_context_window(mut self, context_window: i64) -> Self {
        self.context_window = Some(context_window);
        self
    }
}

/// Outbound response. `error` is set exactly when the run failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub trace_id: String,
    pub sql: String,
    pub plan: String,
    pub chain_of_thought: String,
    pub thinking: String,
    pub test_units: Vec<String>,
    pub error: Option<String>,
    pub original_question: String,
    pub original_language: Option<String>,
    pub schema_linked: bool,
    pub context_usage: f64,
    pub verification_complete: bool,
    pub warnings: Vec<String>,
    pub stages: Vec<StageProof>,
}

impl PipelineResponse {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.sql.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schools() -> TableSchema {
        TableSchema {
            name: "schools".to_string(),
            description: None,
            columns: vec![
                ColumnSchema {
                    name: "CDSCode".to_string(),
                    data_type: "TEXT".to_string(),
                    description: None,
                    primary_key: true,
                },
                ColumnSchema {
                    name: "Virtual".to_string(),
                    data_type: "TEXT".to_string(),
                    description: Some("F = exclusively virtual".to_string()),
                    primary_key: false,
                },
            ],
            foreign_keys: vec![],
        }
    }

    #[test]
    fn render_places_separator_before_comment() {
        let text = schools().render();
        assert_eq!(
            text,
            "CREATE TABLE schools (\n  CDSCode TEXT PRIMARY KEY,\n  Virtual TEXT -- F = exclusively virtual\n);"
        );
    }

    #[test]
    fn subset_is_case_insensitive() {
        let mut satscores = schools();
        satscores.name = "satscores".to_string();
        let schema = SchemaContext::new(vec![schools(), satscores]);

        let linked = schema.subset(["SCHOOLS"]);
        assert_eq!(linked.table_names(), vec!["schools"]);
    }

    #[test]
    fn request_deserializes_without_window() {
        let request: PipelineRequest = serde_json::from_str(
            r#"{"question":"How many schools?","schema_context":{"tables":[]}}"#,
        )
        .unwrap();
        assert_eq!(request.context_window, None);
        assert!(request.schema_context.is_empty());
    }
}
