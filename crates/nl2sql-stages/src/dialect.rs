//! Dialect normalization of generated SQL.
//!
//! Input that does not parse is reported as [`PipelineError::SqlParse`].
//! Input that parses but cannot be rewritten for the target comes back
//! unchanged, with the reason recorded in [`DialectOutcome::fallback_reason`].

use nl2sql_core::{PipelineError, SqlDialect};
use sqlparser::ast::{
    Expr, Ident, ObjectName, Query, SelectItem, SetExpr, Statement, TableFactor, VisitMut,
    VisitorMut,
};
use sqlparser::parser::Parser;
use std::ops::ControlFlow;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialectOutcome {
    pub sql: String,
    /// Whether the returned text differs from the input.
    pub rewritten: bool,
    /// Set when the rewrite was abandoned and the input returned as is.
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct DialectNormalizer {
    source: SqlDialect,
    target: SqlDialect,
}

impl DialectNormalizer {
    pub fn new(source: SqlDialect, target: SqlDialect) -> Self {
        Self { source, target }
    }

    pub fn target(&self) -> SqlDialect {
        self.target
    }

    pub fn normalize(&self, sql: &str) -> Result<String, PipelineError> {
        self.normalize_detailed(sql).map(|outcome| outcome.sql)
    }

    pub fn normalize_detailed(&self, sql: &str) -> Result<DialectOutcome, PipelineError> {
        let mut statements = self.parse(sql)?;

        match self.transform(&mut statements) {
            Ok(rendered) => {
                let rewritten = rendered != sql.trim();
                debug!(target_dialect = %self.target, rewritten, "sql normalized");
                Ok(DialectOutcome {
                    sql: rendered,
                    rewritten,
                    fallback_reason: None,
                })
            }
            Err(e) => {
                warn!(target_dialect = %self.target, error = %e, "dialect rewrite failed; keeping original sql");
                Ok(DialectOutcome {
                    sql: sql.to_string(),
                    rewritten: false,
                    fallback_reason: Some(e.to_string()),
                })
            }
        }
    }

    fn parse(&self, sql: &str) -> Result<Vec<Statement>, PipelineError> {
        let dialect = self.source.parser();
        let statements = Parser::parse_sql(dialect.as_ref(), sql)
            .map_err(|e| PipelineError::SqlParse(e.to_string()))?;
        if statements.is_empty() {
            return Err(PipelineError::SqlParse("no SQL statement found".to_string()));
        }
        Ok(statements)
    }

    /// Rewrites in place and renders; every error is a `DialectTransform`.
    fn transform(&self, statements: &mut [Statement]) -> Result<String, PipelineError> {
        let mut rewriter = Rewriter { target: self.target };
        for statement in statements.iter_mut() {
            if let ControlFlow::Break(reason) = statement.visit(&mut rewriter) {
                return Err(PipelineError::DialectTransform(reason));
            }
        }

        let rendered = statements
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(";\n");

        // The rewrite must be readable by the target itself.
        let target = self.target.parser();
        Parser::parse_sql(target.as_ref(), &rendered).map_err(|e| {
            PipelineError::DialectTransform(format!("{} rejects rewritten SQL: {}", self.target, e))
        })?;
        Ok(rendered)
    }
}

struct Rewriter {
    target: SqlDialect,
}

impl Rewriter {
    fn requote(&self, ident: &mut Ident) {
        if ident.quote_style.is_some() {
            ident.quote_style = Some(self.target.identifier_quote());
        }
    }

    fn rename_function(&self, name: &mut ObjectName) {
        let Some(last) = name.0.last_mut() else {
            return;
        };
        if last.quote_style.is_some() {
            return;
        }
        let upper = last.value.to_uppercase();
        if let Some((_, to)) = self.target.function_renames().iter().find(|(from, _)| *from == upper) {
            last.value = to.to_string();
        }
    }

    fn requote_projection(&self, body: &mut SetExpr) {
        match body {
            SetExpr::Select(select) => {
                for item in select.projection.iter_mut() {
                    if let SelectItem::ExprWithAlias { alias, .. } = item {
                        self.requote(alias);
                    }
                }
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.requote_projection(left);
                self.requote_projection(right);
            }
            _ => {}
        }
    }

    fn uses_top(body: &SetExpr) -> bool {
        match body {
            SetExpr::Select(select) => select.top.is_some(),
            SetExpr::SetOperation { left, right, .. } => Self::uses_top(left) || Self::uses_top(right),
            _ => false,
        }
    }
}

impl VisitorMut for Rewriter {
    type Break = String;

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        if !self.target.supports_limit() && (query.limit.is_some() || query.offset.is_some()) {
            return ControlFlow::Break(format!("LIMIT/OFFSET has no {} equivalent here", self.target));
        }
        if self.target.supports_limit() && Self::uses_top(&query.body) {
            return ControlFlow::Break(format!("TOP is not supported by {}", self.target));
        }
        self.requote_projection(&mut query.body);
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &mut ObjectName) -> ControlFlow<Self::Break> {
        for ident in relation.0.iter_mut() {
            self.requote(ident);
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, table_factor: &mut TableFactor) -> ControlFlow<Self::Break> {
        if let TableFactor::Table { alias: Some(alias), .. } = table_factor {
            self.requote(&mut alias.name);
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Identifier(ident) => self.requote(ident),
            Expr::CompoundIdentifier(idents) => {
                for ident in idents.iter_mut() {
                    self.requote(ident);
                }
            }
            Expr::ILike { .. } if !self.target.supports_ilike() => {
                return ControlFlow::Break(format!("ILIKE is not supported by {}", self.target));
            }
            Expr::Function(function) => self.rename_function(&mut function.name),
            _ => {}
        }
        ControlFlow::Continue(())
    }
}
