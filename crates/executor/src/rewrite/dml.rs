//! DML lowering: INSERT/UPDATE/DELETE with declared-type coercion on
//! the way in, so structured and temporal values land in their encoded
//! cell forms.

use skiffql_common::{Error, Result};
use skiffql_core::DataType;
use skiffql_functions::FUNC_PREFIX;
use sqlparser::ast;

use super::{Rewriter, Scope, ScopeTable, object_name_parts, quote_ident, string_literal};
use crate::catalog::TableDef;

impl Rewriter<'_> {
    pub fn rewrite_insert(&self, insert: &ast::Insert) -> Result<String> {
        let parts = match &insert.table {
            ast::TableObject::TableName(name) => object_name_parts(name),
            other => {
                return Err(Error::analyze(format!(
                    "unsupported INSERT target {:?}",
                    other
                )));
            }
        };
        let def = self.catalog.require(&parts)?;
        let columns: Vec<String> = if insert.columns.is_empty() {
            def.column_names()
        } else {
            insert.columns.iter().map(|c| c.value.clone()).collect()
        };
        let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let source = insert
            .source
            .as_ref()
            .ok_or_else(|| Error::analyze("INSERT requires a source"))?;

        let body = match source.body.as_ref() {
            ast::SetExpr::Values(values) => {
                let mut rows = Vec::with_capacity(values.rows.len());
                for row in &values.rows {
                    if !columns.is_empty() && row.len() != columns.len() {
                        return Err(Error::analyze(format!(
                            "INSERT {}: expected {} values per row, got {}",
                            def.internal_name(),
                            columns.len(),
                            row.len()
                        )));
                    }
                    let mut cells = Vec::with_capacity(row.len());
                    for (column, expr) in columns.iter().zip(row) {
                        cells.push(self.insert_value(def, column, expr)?);
                    }
                    rows.push(format!("({})", cells.join(", ")));
                }
                format!("VALUES {}", rows.join(", "))
            }
            _ => self.rewrite_query(source)?,
        };
        Ok(format!(
            "INSERT INTO {} ({}) {}",
            quote_ident(&def.internal_name()),
            quoted.join(", "),
            body
        ))
    }

    /// One inserted value: parameters coerce when bound, expressions
    /// get a cast onto the declared column type.
    fn insert_value(&self, def: &TableDef, column: &str, expr: &ast::Expr) -> Result<String> {
        let declared = def
            .column(column)
            .map(|c| c.data_type.clone())
            .unwrap_or(DataType::Unknown);
        if let ast::Expr::Value(v) = expr {
            if let ast::Value::Placeholder(p) = &v.value {
                let raw = if let Some(name) = p.strip_prefix('@') {
                    self.binder.borrow_mut().take_named(name)?
                } else {
                    self.binder.borrow_mut().take_positional()?
                };
                let coerced = raw.coerce_to(&declared).map_err(|e| {
                    Error::type_coercion(format!(
                        "INSERT {}.{}: {}",
                        def.internal_name(),
                        column,
                        e
                    ))
                })?;
                return Ok(self.bind(coerced));
            }
        }
        let sql = self.rewrite_expr(expr, &Scope::default())?;
        if declared == DataType::Unknown {
            Ok(sql)
        } else {
            Ok(format!(
                "{}cast({}, {})",
                FUNC_PREFIX,
                sql,
                string_literal(&declared.to_string())
            ))
        }
    }

    pub fn rewrite_update(&self, update: &ast::Statement) -> Result<String> {
        let ast::Statement::Update {
            table,
            assignments,
            selection,
            ..
        } = update
        else {
            return Err(Error::internal("expected UPDATE statement"));
        };
        let (def, alias) = self.dml_target(&table.relation)?;
        let mut scope = Scope::default();
        scope.tables.push(ScopeTable {
            alias: alias.clone(),
            qualifier: quote_ident(&def.internal_name()),
            def: Some(def.clone()),
        });
        let mut sets = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let column = match &assignment.target {
                ast::AssignmentTarget::ColumnName(name) => object_name_parts(name)
                    .last()
                    .cloned()
                    .unwrap_or_default(),
                other => {
                    return Err(Error::analyze(format!(
                        "unsupported assignment target {:?}",
                        other
                    )));
                }
            };
            let declared = def
                .column(&column)
                .map(|c| c.data_type.clone())
                .unwrap_or(DataType::Unknown);
            let value = self.rewrite_expr(&assignment.value, &scope)?;
            let value = if declared == DataType::Unknown {
                value
            } else {
                format!(
                    "{}cast({}, {})",
                    FUNC_PREFIX,
                    value,
                    string_literal(&declared.to_string())
                )
            };
            sets.push(format!("{} = {}", quote_ident(&column), value));
        }
        let mut sql = format!(
            "UPDATE {} SET {}",
            quote_ident(&def.internal_name()),
            sets.join(", ")
        );
        if let Some(selection) = selection {
            sql.push_str(&format!(" WHERE {}", self.rewrite_expr(selection, &scope)?));
        }
        Ok(sql)
    }

    pub fn rewrite_delete(&self, delete: &ast::Delete) -> Result<String> {
        let tables = match &delete.from {
            ast::FromTable::WithFromKeyword(tables) | ast::FromTable::WithoutKeyword(tables) => {
                tables
            }
        };
        let relation = tables
            .first()
            .map(|t| &t.relation)
            .ok_or_else(|| Error::analyze("DELETE requires a target table"))?;
        let (def, alias) = self.dml_target(relation)?;
        let mut scope = Scope::default();
        scope.tables.push(ScopeTable {
            alias,
            qualifier: quote_ident(&def.internal_name()),
            def: Some(def.clone()),
        });
        let mut sql = format!("DELETE FROM {}", quote_ident(&def.internal_name()));
        if let Some(selection) = &delete.selection {
            sql.push_str(&format!(" WHERE {}", self.rewrite_expr(selection, &scope)?));
        }
        Ok(sql)
    }

    /// Resolves a DML target relation to its catalog entry and the
    /// alias expressions may reference it under.
    pub(crate) fn dml_target(&self, relation: &ast::TableFactor) -> Result<(TableDef, String)> {
        match relation {
            ast::TableFactor::Table { name, alias, .. } => {
                let parts = object_name_parts(name);
                let def = self.catalog.require(&parts)?.clone();
                let alias = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| def.table_name().to_string());
                Ok((def, alias))
            }
            other => Err(Error::analyze(format!(
                "unsupported DML target {:?}",
                other
            ))),
        }
    }
}
