//! Lexical schema linker.
//!
//! Keeps the tables whose name or columns share a word with the question,
//! plus the tables those reference by foreign key. When nothing matches the
//! full schema is returned, so linking never leaves the model without tables.

use anyhow::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use nl2sql_core::{SchemaContext, SchemaLinker, TableSchema};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

lazy_static! {
    static ref TOKEN: Regex = Regex::new(r"[A-Z]?[a-z]+|[A-Z]+(?:[a-z]+)?|\d+").unwrap();
}

const DEFAULT_MAX_TABLES: usize = 8;

#[derive(Debug, Clone)]
pub struct LexicalSchemaLinker {
    max_tables: usize,
}

impl Default for LexicalSchemaLinker {
    fn default() -> Self {
        Self {
            max_tables: DEFAULT_MAX_TABLES,
        }
    }
}

impl LexicalSchemaLinker {
    pub fn new(max_tables: usize) -> Self {
        Self {
            max_tables: max_tables.max(1),
        }
    }

    /// Synchronous core of [`SchemaLinker::link_schema`].
    pub fn link(&self, full_schema: &SchemaContext, question: &str) -> SchemaContext {
        let words = stems(question);

        let mut scored: Vec<(usize, &TableSchema)> = full_schema
            .tables
            .iter()
            .map(|table| (score(table, &words), table))
            .filter(|(score, _)| *score > 0)
            .collect();
        if scored.is_empty() {
            debug!("no table matched the question; keeping full schema");
            return full_schema.clone();
        }
        // Stable sort keeps schema order among equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(self.max_tables);

        let mut keep: HashSet<String> = scored.iter().map(|(_, t)| t.name.to_lowercase()).collect();
        let by_name: HashMap<String, &TableSchema> = full_schema
            .tables
            .iter()
            .map(|t| (t.name.to_lowercase(), t))
            .collect();
        let referenced: Vec<String> = scored
            .iter()
            .flat_map(|(_, t)| t.foreign_keys.iter())
            .map(|fk| fk.references_table.to_lowercase())
            .filter(|name| by_name.contains_key(name))
            .collect();
        keep.extend(referenced);

        let linked = full_schema.subset(keep.iter().map(String::as_str));
        debug!(
            kept = linked.tables.len(),
            total = full_schema.tables.len(),
            "lexical schema linking"
        );
        linked
    }
}

#[async_trait]
impl SchemaLinker for LexicalSchemaLinker {
    async fn link_schema(&self, full_schema: &SchemaContext, question: &str) -> Result<SchemaContext> {
        Ok(self.link(full_schema, question))
    }
}

/// Table name hits count double; column and description hits count once.
fn score(table: &TableSchema, words: &HashSet<String>) -> usize {
    let name_hits = stems(&table.name).intersection(words).count();
    let column_hits: usize = table
        .columns
        .iter()
        .map(|c| {
            let mut text = c.name.clone();
            if let Some(description) = &c.description {
                text.push(' ');
                text.push_str(description);
            }
            stems(&text).intersection(words).count()
        })
        .sum();
    name_hits * 2 + column_hits
}

/// Lower-case word stems, split on case changes, punctuation and digits.
fn stems(text: &str) -> HashSet<String> {
    TOKEN
        .find_iter(text)
        .map(|m| stem(&m.as_str().to_lowercase()))
        .filter(|w| w.len() > 2 && !STOP.contains(&w.as_str()))
        .collect()
}

const STOP: &[&str] = &[
    "the", "and", "are", "how", "many", "much", "what", "which", "with", "for", "from", "that",
    "there", "have", "has", "all", "each", "per", "list", "show", "give", "their", "whose",
];

fn stem(word: &str) -> String {
    if word.len() > 4 && word.ends_with("ies") {
        format!("{}y", &word[..word.len() - 3])
    } else if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nl2sql_core::{ColumnSchema, ForeignKey};

    fn column(name: &str) -> ColumnSchema {
        ColumnSchema {
            name: name.to_string(),
            data_type: "TEXT".to_string(),
            description: None,
            primary_key: false,
        }
    }

    fn table(name: &str, columns: &[&str], fks: Vec<ForeignKey>) -> TableSchema {
        TableSchema {
            name: name.to_string(),
            description: None,
            columns: columns.iter().map(|c| column(c)).collect(),
            foreign_keys: fks,
        }
    }

    fn schema() -> SchemaContext {
        SchemaContext::new(vec![
            table("schools", &["CDSCode", "School", "Virtual", "County"], vec![]),
            table(
                "satscores",
                &["cds", "AvgScrMath", "NumTstTakr"],
                vec![ForeignKey {
                    column: "cds".to_string(),
                    references_table: "schools".to_string(),
                    references_column: "CDSCode".to_string(),
                }],
            ),
            table("frpm", &["CDSCode", "Enrollment (K-12)", "Free Meal Count (K-12)"], vec![]),
        ])
    }

    #[test]
    fn keeps_matching_tables() {
        let linked = LexicalSchemaLinker::default().link(&schema(), "How many schools are exclusively virtual?");
        assert_eq!(linked.table_names(), vec!["schools"]);
    }

    #[test]
    fn pulls_in_referenced_tables() {
        let linked = LexicalSchemaLinker::default().link(&schema(), "Average sat scores in math");
        assert_eq!(linked.table_names(), vec!["schools", "satscores"]);
    }

    #[test]
    fn no_match_keeps_everything() {
        let full = schema();
        let linked = LexicalSchemaLinker::default().link(&full, "xyzzy");
        assert_eq!(linked, full);
    }

    #[test]
    fn stems_split_identifiers() {
        let words = stems("AvgScrMath NumTstTakr free_meal_counts");
        assert!(words.contains("math"));
        assert!(words.contains("meal"));
        assert!(words.contains("count"));
    }
}
