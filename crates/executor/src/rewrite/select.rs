//! SELECT lowering: scope construction from FROM (including wildcard
//! tables and UNNEST), projection aliasing, set operations, ORDER
//! BY/LIMIT passthrough.

use std::cell::Cell;

use skiffql_common::{Error, Result};
use skiffql_core::DataType;
use skiffql_functions::FUNC_PREFIX;
use sqlparser::ast;
use tracing::debug;

use super::{Rewriter, Scope, ScopeTable, UnnestAlias, object_name_parts, quote_ident, string_literal};
use crate::catalog::{ColumnDef, TableDef};

thread_local! {
    static GENSYM: Cell<u64> = const { Cell::new(0) };
}

fn gensym(prefix: &str) -> String {
    GENSYM.with(|n| {
        let next = n.get() + 1;
        n.set(next);
        format!("{}_{}", prefix, next)
    })
}

impl Rewriter<'_> {
    pub fn rewrite_query(&self, query: &ast::Query) -> Result<String> {
        self.rewrite_query_in(query, &Scope::default())
    }

    pub fn rewrite_query_in(&self, query: &ast::Query, parent: &Scope) -> Result<String> {
        Ok(self.rewrite_query_with_columns_in(query, parent)?.0)
    }

    pub fn rewrite_query_with_columns(
        &self,
        query: &ast::Query,
        parent: &Scope,
    ) -> Result<(String, Vec<String>)> {
        self.rewrite_query_with_columns_in(query, parent)
    }

    fn rewrite_query_with_columns_in(
        &self,
        query: &ast::Query,
        parent: &Scope,
    ) -> Result<(String, Vec<String>)> {
        let mut out = String::new();
        if let Some(with) = &query.with {
            let mut ctes = Vec::with_capacity(with.cte_tables.len());
            for cte in &with.cte_tables {
                let body = self.rewrite_query_in(&cte.query, parent)?;
                ctes.push(format!("{} AS ({})", quote_ident(&cte.alias.name.value), body));
            }
            out.push_str(&format!(
                "WITH {}{} ",
                if with.recursive { "RECURSIVE " } else { "" },
                ctes.join(", ")
            ));
        }
        let (body, columns) = self.rewrite_set_expr(&query.body, parent)?;
        out.push_str(&body);
        if let Some(order_by) = &query.order_by {
            if let ast::OrderByKind::Expressions(items) = &order_by.kind {
                let keys: Vec<String> = items
                    .iter()
                    .map(|item| self.order_item(item, parent))
                    .collect::<Result<_>>()?;
                out.push_str(&format!(" ORDER BY {}", keys.join(", ")));
            }
        }
        if let Some(limit_clause) = &query.limit_clause {
            match limit_clause {
                ast::LimitClause::LimitOffset { limit, offset, .. } => {
                    if let Some(limit) = limit {
                        out.push_str(&format!(
                            " LIMIT {}",
                            self.rewrite_expr(limit, parent)?
                        ));
                    }
                    if let Some(offset) = offset {
                        out.push_str(&format!(
                            " OFFSET {}",
                            self.rewrite_expr(&offset.value, parent)?
                        ));
                    }
                }
                ast::LimitClause::OffsetCommaLimit { offset, limit } => {
                    out.push_str(&format!(
                        " LIMIT {} OFFSET {}",
                        self.rewrite_expr(limit, parent)?,
                        self.rewrite_expr(offset, parent)?
                    ));
                }
            }
        }
        Ok((out, columns))
    }

    fn order_item(&self, item: &ast::OrderByExpr, scope: &Scope) -> Result<String> {
        let mut out = self.rewrite_expr(&item.expr, scope)?;
        if item.options.asc == Some(false) {
            out.push_str(" DESC");
        }
        match item.options.nulls_first {
            Some(true) => out.push_str(" NULLS FIRST"),
            Some(false) => out.push_str(" NULLS LAST"),
            None => {}
        }
        Ok(out)
    }

    pub(crate) fn rewrite_set_expr(
        &self,
        body: &ast::SetExpr,
        parent: &Scope,
    ) -> Result<(String, Vec<String>)> {
        match body {
            ast::SetExpr::Select(select) => self.rewrite_select(select, parent),
            ast::SetExpr::Query(query) => {
                let (sql, columns) = self.rewrite_query_with_columns_in(query, parent)?;
                Ok((format!("({})", sql), columns))
            }
            ast::SetExpr::SetOperation { op, set_quantifier, left, right } => {
                let (left_sql, columns) = self.rewrite_set_expr(left, parent)?;
                let (right_sql, _) = self.rewrite_set_expr(right, parent)?;
                let keyword = match op {
                    ast::SetOperator::Union => match set_quantifier {
                        ast::SetQuantifier::All => "UNION ALL",
                        _ => "UNION",
                    },
                    ast::SetOperator::Intersect => "INTERSECT",
                    ast::SetOperator::Except => "EXCEPT",
                    other => {
                        return Err(Error::analyze(format!(
                            "unsupported set operation {:?}",
                            other
                        )));
                    }
                };
                Ok((format!("{} {} {}", left_sql, keyword, right_sql), columns))
            }
            ast::SetExpr::Values(values) => {
                let mut rows = Vec::with_capacity(values.rows.len());
                let mut width = 0;
                for row in &values.rows {
                    width = width.max(row.len());
                    let cells: Vec<String> = row
                        .iter()
                        .map(|e| self.rewrite_expr(e, parent))
                        .collect::<Result<_>>()?;
                    rows.push(format!("({})", cells.join(", ")));
                }
                let columns = (0..width).map(|i| format!("f{}_", i)).collect();
                Ok((format!("VALUES {}", rows.join(", ")), columns))
            }
            other => Err(Error::analyze(format!(
                "unsupported query body {:?}",
                other
            ))),
        }
    }

    fn rewrite_select(
        &self,
        select: &ast::Select,
        parent: &Scope,
    ) -> Result<(String, Vec<String>)> {
        let mut scope = parent.child();
        let mut from_parts = Vec::new();
        for table_with_joins in &select.from {
            let mut part = self.relation_sql(&table_with_joins.relation, &mut scope)?;
            for join in &table_with_joins.joins {
                let right = self.relation_sql(&join.relation, &mut scope)?;
                let (keyword, constraint) = match &join.join_operator {
                    ast::JoinOperator::Join(c) | ast::JoinOperator::Inner(c) => ("JOIN", Some(c)),
                    ast::JoinOperator::Left(c) | ast::JoinOperator::LeftOuter(c) => {
                        ("LEFT JOIN", Some(c))
                    }
                    ast::JoinOperator::Right(c) | ast::JoinOperator::RightOuter(c) => {
                        ("RIGHT JOIN", Some(c))
                    }
                    ast::JoinOperator::FullOuter(c) => ("FULL JOIN", Some(c)),
                    ast::JoinOperator::CrossJoin => ("CROSS JOIN", None),
                    other => {
                        return Err(Error::analyze(format!(
                            "unsupported join {:?}",
                            other
                        )));
                    }
                };
                part.push_str(&format!(" {} {}", keyword, right));
                if let Some(constraint) = constraint {
                    match constraint {
                        ast::JoinConstraint::On(expr) => {
                            part.push_str(&format!(" ON {}", self.rewrite_expr(expr, &scope)?));
                        }
                        ast::JoinConstraint::Using(columns) => {
                            let names: Vec<String> = columns
                                .iter()
                                .map(|c| {
                                    object_name_parts(c)
                                        .last()
                                        .map(|s| quote_ident(s))
                                        .unwrap_or_default()
                                })
                                .collect();
                            part.push_str(&format!(" USING ({})", names.join(", ")));
                        }
                        ast::JoinConstraint::Natural | ast::JoinConstraint::None => {}
                    }
                }
            }
            from_parts.push(part);
        }

        let mut columns = Vec::new();
        let mut projections = Vec::new();
        for (i, item) in select.projection.iter().enumerate() {
            match item {
                ast::SelectItem::Wildcard(_) => {
                    projections.push("*".to_string());
                    for table in &scope.tables {
                        if let Some(def) = &table.def {
                            columns.extend(def.column_names());
                        }
                    }
                }
                ast::SelectItem::QualifiedWildcard(kind, _) => {
                    let name = match kind {
                        ast::SelectItemQualifiedWildcardKind::ObjectName(name) => {
                            object_name_parts(name).join(".")
                        }
                        other => {
                            return Err(Error::analyze(format!(
                                "unsupported wildcard {:?}",
                                other
                            )));
                        }
                    };
                    projections.push(format!("{}.*", quote_ident(&name)));
                }
                ast::SelectItem::UnnamedExpr(expr) => {
                    let sql = self.rewrite_expr(expr, &scope)?;
                    let name = derive_name(expr, i);
                    columns.push(name.clone());
                    projections.push(format!("{} AS {}", sql, quote_ident(&name)));
                }
                ast::SelectItem::ExprWithAlias { expr, alias } => {
                    let sql = self.rewrite_expr(expr, &scope)?;
                    columns.push(alias.value.clone());
                    projections.push(format!("{} AS {}", sql, quote_ident(&alias.value)));
                }
            }
        }

        let mut out = String::from("SELECT ");
        if matches!(select.distinct, Some(ast::Distinct::Distinct)) {
            out.push_str("DISTINCT ");
        }
        out.push_str(&projections.join(", "));
        if !from_parts.is_empty() {
            out.push_str(&format!(" FROM {}", from_parts.join(", ")));
        }
        if let Some(selection) = &select.selection {
            out.push_str(&format!(" WHERE {}", self.rewrite_expr(selection, &scope)?));
        }
        if let ast::GroupByExpr::Expressions(exprs, _) = &select.group_by {
            if !exprs.is_empty() {
                let keys: Vec<String> = exprs
                    .iter()
                    .map(|e| self.rewrite_expr(e, &scope))
                    .collect::<Result<_>>()?;
                out.push_str(&format!(" GROUP BY {}", keys.join(", ")));
            }
        }
        if let Some(having) = &select.having {
            out.push_str(&format!(" HAVING {}", self.rewrite_expr(having, &scope)?));
        }
        Ok((out, columns))
    }

    /// Lowers one FROM relation, extending the scope with its alias.
    fn relation_sql(&self, relation: &ast::TableFactor, scope: &mut Scope) -> Result<String> {
        match relation {
            ast::TableFactor::Table { name, alias, .. } => {
                let parts = object_name_parts(name);
                let last = parts.last().cloned().unwrap_or_default();
                if let Some(prefix) = last.strip_suffix('*') {
                    return self.wildcard_table(&parts[..parts.len() - 1], prefix, alias, scope);
                }
                let alias_name = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| last.clone());
                match self.catalog.resolve(&parts) {
                    Some(def) => {
                        let mut sql = quote_ident(&def.internal_name());
                        if alias.is_some() || def.internal_name() != alias_name {
                            sql.push_str(&format!(" AS {}", quote_ident(&alias_name)));
                        }
                        scope.tables.push(ScopeTable {
                            alias: alias_name.clone(),
                            qualifier: quote_ident(&alias_name),
                            def: Some(def.clone()),
                        });
                        Ok(sql)
                    }
                    None => {
                        // CTE names and host-native tables pass through
                        let flat = parts.join(".");
                        let mut sql = quote_ident(&flat);
                        if alias.is_some() {
                            sql.push_str(&format!(" AS {}", quote_ident(&alias_name)));
                        }
                        scope.tables.push(ScopeTable {
                            alias: alias_name.clone(),
                            qualifier: quote_ident(&alias_name),
                            def: None,
                        });
                        Ok(sql)
                    }
                }
            }
            ast::TableFactor::Derived { subquery, alias, .. } => {
                let (sql, columns) = self.rewrite_query_with_columns_in(subquery, scope)?;
                let alias_name = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| gensym("sub"));
                scope.tables.push(ScopeTable {
                    alias: alias_name.clone(),
                    qualifier: quote_ident(&alias_name),
                    def: Some(TableDef {
                        path: vec![alias_name.clone()],
                        columns: columns
                            .into_iter()
                            .map(|name| ColumnDef {
                                name,
                                data_type: DataType::Unknown,
                                not_null: false,
                            })
                            .collect(),
                        primary_key: vec![],
                        temp: false,
                    }),
                });
                Ok(format!("({}) AS {}", sql, quote_ident(&alias_name)))
            }
            ast::TableFactor::UNNEST {
                alias,
                array_exprs,
                with_offset,
                with_offset_alias,
                ..
            } => {
                let array_expr = array_exprs
                    .first()
                    .ok_or_else(|| Error::analyze("UNNEST requires an array argument"))?;
                let alias_name = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| gensym("unnest"));
                let offset_alias = match (with_offset, with_offset_alias) {
                    (_, Some(ident)) => Some(ident.value.clone()),
                    (true, None) => Some("offset".to_string()),
                    (false, None) => None,
                };
                self.unnest_sql(array_expr, alias_name, offset_alias, scope)
            }
            other => Err(Error::analyze(format!(
                "unsupported table factor {:?}",
                other
            ))),
        }
    }

    fn unnest_sql(
        &self,
        array_expr: &ast::Expr,
        alias_name: String,
        offset_alias: Option<String>,
        scope: &mut Scope,
    ) -> Result<String> {
        let array_sql = self.rewrite_expr(array_expr, scope)?;
        // column references unnest in place so the host store's own
        // table-valued correlation applies
        if matches!(
            array_expr,
            ast::Expr::Identifier(_) | ast::Expr::CompoundIdentifier(_)
        ) {
            scope.unnest.push(UnnestAlias {
                value_alias: alias_name.clone(),
                offset_alias,
            });
            return Ok(format!(
                "json_each({}array_json({})) AS {}",
                FUNC_PREFIX,
                array_sql,
                quote_ident(&alias_name)
            ));
        }

        // arrays of structs with a statically known shape expand into
        // one column per field
        if let Some(fields) = struct_shape(array_expr) {
            let mut selected = Vec::with_capacity(fields.len());
            let mut column_defs = Vec::with_capacity(fields.len());
            for (i, field) in fields.iter().enumerate() {
                selected.push(format!(
                    "{}struct_field(j.\"value\", {}) AS {}",
                    FUNC_PREFIX,
                    i,
                    quote_ident(field)
                ));
                column_defs.push(ColumnDef {
                    name: field.clone(),
                    data_type: DataType::Unknown,
                    not_null: false,
                });
            }
            debug!(alias = %alias_name, fields = fields.len(), "expanding struct unnest");
            scope.tables.push(ScopeTable {
                alias: alias_name.clone(),
                qualifier: quote_ident(&alias_name),
                def: Some(TableDef {
                    path: vec![alias_name.clone()],
                    columns: column_defs,
                    primary_key: vec![],
                    temp: false,
                }),
            });
            return Ok(format!(
                "(SELECT {} FROM json_each({}array_json({})) AS j) AS {}",
                selected.join(", "),
                FUNC_PREFIX,
                array_sql,
                quote_ident(&alias_name)
            ));
        }

        let mut selected = vec![format!("j.\"value\" AS {}", quote_ident(&alias_name))];
        let mut column_defs = vec![ColumnDef {
            name: alias_name.clone(),
            data_type: DataType::Unknown,
            not_null: false,
        }];
        if let Some(offset) = &offset_alias {
            selected.push(format!("j.\"key\" AS {}", quote_ident(offset)));
            column_defs.push(ColumnDef {
                name: offset.clone(),
                data_type: DataType::Int64,
                not_null: false,
            });
        }
        scope.tables.push(ScopeTable {
            alias: alias_name.clone(),
            qualifier: quote_ident(&alias_name),
            def: Some(TableDef {
                path: vec![alias_name.clone()],
                columns: column_defs,
                primary_key: vec![],
                temp: false,
            }),
        });
        Ok(format!(
            "(SELECT {} FROM json_each({}array_json({})) AS j) AS {}",
            selected.join(", "),
            FUNC_PREFIX,
            array_sql,
            quote_ident(&alias_name)
        ))
    }

    /// `dataset.prefix_*`: UNION ALL over every matching catalog entry
    /// with a synthesized `_TABLE_SUFFIX`; a table missing a selected
    /// column contributes NULL for it.
    fn wildcard_table(
        &self,
        dataset: &[String],
        prefix: &str,
        alias: Option<&ast::TableAlias>,
        scope: &mut Scope,
    ) -> Result<String> {
        let matches = self.catalog.wildcard_matches(dataset, prefix);
        if matches.is_empty() {
            return Err(Error::catalog_missing(format!(
                "{}.{}*",
                dataset.join("."),
                prefix
            )));
        }
        let mut union_columns: Vec<String> = Vec::new();
        for def in &matches {
            for column in &def.columns {
                if !union_columns
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(&column.name))
                {
                    union_columns.push(column.name.clone());
                }
            }
        }
        debug!(
            dataset = %dataset.join("."),
            prefix,
            tables = matches.len(),
            "expanding wildcard table"
        );
        let mut branches = Vec::with_capacity(matches.len());
        for def in &matches {
            let suffix = def.table_name()[prefix.len()..].to_string();
            let mut selected: Vec<String> = union_columns
                .iter()
                .map(|column| {
                    if def.column(column).is_some() {
                        quote_ident(column)
                    } else {
                        format!("NULL AS {}", quote_ident(column))
                    }
                })
                .collect();
            selected.push(format!(
                "{} AS {}",
                string_literal(&suffix),
                quote_ident("_TABLE_SUFFIX")
            ));
            branches.push(format!(
                "SELECT {} FROM {}",
                selected.join(", "),
                quote_ident(&def.internal_name())
            ));
        }
        let alias_name = alias
            .as_ref()
            .map(|a| a.name.value.clone())
            .unwrap_or_else(|| gensym("wildcard"));
        let mut columns: Vec<ColumnDef> = union_columns
            .iter()
            .map(|name| ColumnDef {
                name: name.clone(),
                data_type: DataType::Unknown,
                not_null: false,
            })
            .collect();
        columns.push(ColumnDef {
            name: "_TABLE_SUFFIX".to_string(),
            data_type: DataType::String,
            not_null: true,
        });
        scope.tables.push(ScopeTable {
            alias: alias_name.clone(),
            qualifier: quote_ident(&alias_name),
            def: Some(TableDef {
                path: vec![alias_name.clone()],
                columns,
                primary_key: vec![],
                temp: false,
            }),
        });
        Ok(format!(
            "({}) AS {}",
            branches.join(" UNION ALL "),
            quote_ident(&alias_name)
        ))
    }
}

/// Output column name for an unaliased projection: identifiers and
/// field paths name the column after their last segment, everything
/// else gets a positional name.
pub fn derive_name(expr: &ast::Expr, index: usize) -> String {
    match expr {
        ast::Expr::Identifier(ident) => ident.value.clone(),
        ast::Expr::CompoundIdentifier(idents) => idents
            .last()
            .map(|i| i.value.clone())
            .unwrap_or_else(|| format!("f{}_", index)),
        ast::Expr::CompoundFieldAccess { access_chain, .. } => {
            for access in access_chain.iter().rev() {
                if let ast::AccessExpr::Dot(ast::Expr::Identifier(ident)) = access {
                    return ident.value.clone();
                }
            }
            format!("f{}_", index)
        }
        ast::Expr::Named { name, .. } => name.value.clone(),
        _ => format!("f{}_", index),
    }
}

/// Statically known struct element shape of an array literal, when the
/// UNNEST should expand into one column per field.
fn struct_shape(expr: &ast::Expr) -> Option<Vec<String>> {
    let first = match expr {
        ast::Expr::Array(array) => array.elem.first()?,
        _ => return None,
    };
    match first {
        ast::Expr::Tuple(items) => {
            Some((0..items.len()).map(|i| format!("f{}_", i)).collect())
        }
        ast::Expr::Struct { values, .. } => Some(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| match v {
                    ast::Expr::Named { name, .. } => name.value.clone(),
                    _ => format!("f{}_", i),
                })
                .collect(),
        ),
        _ => None,
    }
}
