//! MERGE decomposition: a sequenced (WHEN MATCHED -> UPDATE/DELETE),
//! (WHEN NOT MATCHED -> INSERT) pair over a shared ON condition. The
//! session brackets the sequence in a savepoint so it appears atomic.

use skiffql_common::{Error, Result};
use skiffql_core::{DataType, Value};
use skiffql_functions::FUNC_PREFIX;
use sqlparser::ast;
use tracing::debug;

use super::{Rewriter, Scope, ScopeTable, object_name_parts, quote_ident, string_literal};
use crate::catalog::TableDef;

struct MergeSource<'a> {
    alias: String,
    def: Option<TableDef>,
    factor: &'a ast::TableFactor,
}

impl<'a> Rewriter<'a> {
    /// Lowers a MERGE into independently bindable host statements, in
    /// execution order.
    pub fn rewrite_merge(
        &self,
        table: &ast::TableFactor,
        source: &ast::TableFactor,
        on: &ast::Expr,
        clauses: &[ast::MergeClause],
    ) -> Result<Vec<(String, Vec<Value>)>> {
        let (target, target_alias) = self.dml_target(table)?;
        let source = self.merge_source(source)?;
        debug!(target = %target.internal_name(), "decomposing MERGE");

        // matched clauses run before not-matched inserts so fresh rows
        // are never re-touched by the same MERGE
        let mut statements = Vec::new();
        let mut inserts = Vec::new();
        for clause in clauses {
            match (&clause.clause_kind, &clause.action) {
                (ast::MergeClauseKind::Matched, ast::MergeAction::Update { assignments }) => {
                    statements.push(self.merge_update(
                        &target,
                        &target_alias,
                        &source,
                        on,
                        clause.predicate.as_ref(),
                        assignments,
                    )?);
                }
                (ast::MergeClauseKind::Matched, ast::MergeAction::Delete) => {
                    statements.push(self.merge_delete(
                        &target,
                        &target_alias,
                        &source,
                        on,
                        clause.predicate.as_ref(),
                    )?);
                }
                (
                    ast::MergeClauseKind::NotMatched | ast::MergeClauseKind::NotMatchedByTarget,
                    ast::MergeAction::Insert(insert),
                ) => {
                    inserts.push(self.merge_insert(
                        &target,
                        &target_alias,
                        &source,
                        on,
                        clause.predicate.as_ref(),
                        insert,
                    )?);
                }
                (kind, action) => {
                    return Err(Error::analyze(format!(
                        "unsupported MERGE clause {:?} {:?}",
                        kind, action
                    )));
                }
            }
        }
        statements.extend(inserts);
        Ok(statements)
    }

    fn merge_source(&self, factor: &'a ast::TableFactor) -> Result<MergeSource<'a>> {
        match factor {
            ast::TableFactor::Table { name, alias, .. } => {
                let parts = object_name_parts(name);
                let def = self.catalog.require(&parts)?.clone();
                let alias = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| def.table_name().to_string());
                Ok(MergeSource {
                    alias,
                    def: Some(def),
                    factor,
                })
            }
            ast::TableFactor::Derived { alias, .. } => Ok(MergeSource {
                alias: alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| "source".to_string()),
                def: None,
                factor,
            }),
            other => Err(Error::analyze(format!(
                "unsupported MERGE source {:?}",
                other
            ))),
        }
    }

    /// FROM fragment for the source, rewritten with the given fork so
    /// its binds land in the right statement.
    fn source_from(&self, fork: &Rewriter<'a>, source: &MergeSource<'_>) -> Result<String> {
        match source.factor {
            ast::TableFactor::Table { .. } => {
                let def = source.def.as_ref().ok_or_else(|| {
                    Error::internal("table source without a catalog entry")
                })?;
                Ok(format!(
                    "{} AS {}",
                    quote_ident(&def.internal_name()),
                    quote_ident(&source.alias)
                ))
            }
            ast::TableFactor::Derived { subquery, .. } => Ok(format!(
                "({}) AS {}",
                fork.rewrite_query(subquery)?,
                quote_ident(&source.alias)
            )),
            _ => Err(Error::internal("unexpected MERGE source factor")),
        }
    }

    fn merge_scope(
        &self,
        target: &TableDef,
        target_alias: &str,
        source: &MergeSource<'_>,
    ) -> Scope {
        let mut scope = Scope::default();
        scope.tables.push(ScopeTable {
            alias: target_alias.to_string(),
            qualifier: quote_ident(&target.internal_name()),
            def: Some(target.clone()),
        });
        scope.tables.push(ScopeTable {
            alias: source.alias.clone(),
            qualifier: quote_ident(&source.alias),
            def: source.def.clone(),
        });
        scope
    }

    fn merge_update(
        &self,
        target: &TableDef,
        target_alias: &str,
        source: &MergeSource<'_>,
        on: &ast::Expr,
        predicate: Option<&ast::Expr>,
        assignments: &[ast::Assignment],
    ) -> Result<(String, Vec<Value>)> {
        let fork = self.fork();
        let scope = self.merge_scope(target, target_alias, source);
        let from = self.source_from(&fork, source)?;
        let mut condition = fork.rewrite_expr(on, &scope)?;
        if let Some(predicate) = predicate {
            condition = format!("({}) AND ({})", condition, fork.rewrite_expr(predicate, &scope)?);
        }
        let mut sets = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let column = match &assignment.target {
                ast::AssignmentTarget::ColumnName(name) => object_name_parts(name)
                    .last()
                    .cloned()
                    .unwrap_or_default(),
                other => {
                    return Err(Error::analyze(format!(
                        "unsupported MERGE assignment {:?}",
                        other
                    )));
                }
            };
            let value = fork.rewrite_expr(&assignment.value, &scope)?;
            sets.push(format!(
                "{} = (SELECT {} FROM {} WHERE {} LIMIT 1)",
                quote_ident(&column),
                value,
                from,
                condition
            ));
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE EXISTS (SELECT 1 FROM {} WHERE {})",
            quote_ident(&target.internal_name()),
            sets.join(", "),
            from,
            condition
        );
        Ok((sql, fork.take_binds()))
    }

    fn merge_delete(
        &self,
        target: &TableDef,
        target_alias: &str,
        source: &MergeSource<'_>,
        on: &ast::Expr,
        predicate: Option<&ast::Expr>,
    ) -> Result<(String, Vec<Value>)> {
        let fork = self.fork();
        let scope = self.merge_scope(target, target_alias, source);
        let from = self.source_from(&fork, source)?;
        let mut condition = fork.rewrite_expr(on, &scope)?;
        if let Some(predicate) = predicate {
            condition = format!("({}) AND ({})", condition, fork.rewrite_expr(predicate, &scope)?);
        }
        let sql = format!(
            "DELETE FROM {} WHERE EXISTS (SELECT 1 FROM {} WHERE {})",
            quote_ident(&target.internal_name()),
            from,
            condition
        );
        Ok((sql, fork.take_binds()))
    }

    fn merge_insert(
        &self,
        target: &TableDef,
        target_alias: &str,
        source: &MergeSource<'_>,
        on: &ast::Expr,
        predicate: Option<&ast::Expr>,
        insert: &ast::MergeInsertExpr,
    ) -> Result<(String, Vec<Value>)> {
        let fork = self.fork();
        let from = self.source_from(&fork, source)?;

        // values resolve against the source row alone
        let mut source_scope = Scope::default();
        source_scope.tables.push(ScopeTable {
            alias: source.alias.clone(),
            qualifier: quote_ident(&source.alias),
            def: source.def.clone(),
        });

        let columns: Vec<String> = if insert.columns.is_empty() {
            target.column_names()
        } else {
            insert.columns.iter().map(|c| c.value.clone()).collect()
        };
        let values: Vec<String> = match &insert.kind {
            ast::MergeInsertKind::Values(values) => {
                let row = values
                    .rows
                    .first()
                    .ok_or_else(|| Error::analyze("MERGE INSERT requires values"))?;
                row.iter()
                    .zip(&columns)
                    .map(|(expr, column)| {
                        let sql = fork.rewrite_expr(expr, &source_scope)?;
                        let declared = target
                            .column(column)
                            .map(|c| c.data_type.clone())
                            .unwrap_or(DataType::Unknown);
                        Ok(if declared == DataType::Unknown {
                            sql
                        } else {
                            format!(
                                "{}cast({}, {})",
                                FUNC_PREFIX,
                                sql,
                                string_literal(&declared.to_string())
                            )
                        })
                    })
                    .collect::<Result<_>>()?
            }
            ast::MergeInsertKind::Row => columns.iter().map(|c| quote_ident(c)).collect(),
        };

        // the ON condition scopes over both sides here
        let scope = self.merge_scope(target, target_alias, source);
        let mut not_matched = format!(
            "NOT EXISTS (SELECT 1 FROM {} WHERE {})",
            quote_ident(&target.internal_name()),
            fork.rewrite_expr(on, &scope)?
        );
        if let Some(predicate) = predicate {
            not_matched = format!(
                "{} AND ({})",
                not_matched,
                fork.rewrite_expr(predicate, &source_scope)?
            );
        }
        let quoted_columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {} WHERE {}",
            quote_ident(&target.internal_name()),
            quoted_columns.join(", "),
            values.join(", "),
            from,
            not_matched
        );
        Ok((sql, fork.take_binds()))
    }
}
