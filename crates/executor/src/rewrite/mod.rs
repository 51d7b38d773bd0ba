//! The statement rewriter: lowers parsed dialect statements into host
//! store SQL that calls the registered function runtime.

pub mod ddl;
pub mod dml;
pub mod expr;
pub mod merge;
pub mod select;

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use skiffql_core::Value;
use sqlparser::ast;

use crate::catalog::{Catalog, TableDef};
use crate::js::JsUdf;
use crate::params::ParamBinder;
use crate::udf::UdfRegistry;

/// One FROM-visible relation: the alias it resolves under and, when the
/// catalog knows it, the declared schema.
#[derive(Debug, Clone)]
pub struct ScopeTable {
    pub alias: String,
    /// SQL to qualify columns with; usually the quoted alias itself,
    /// but MERGE rewrites map aliases onto internal names.
    pub qualifier: String,
    pub def: Option<TableDef>,
}

#[derive(Debug, Clone, Default)]
pub struct UnnestAlias {
    pub value_alias: String,
    pub offset_alias: Option<String>,
}

/// Name-resolution scope for expression rewriting. Subquery scopes
/// clone their parent so correlated references keep resolving.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub tables: Vec<ScopeTable>,
    pub unnest: Vec<UnnestAlias>,
    /// UDF inlining: parameter name (lowercase) -> already-rewritten
    /// argument SQL.
    pub substitutions: HashMap<String, String>,
}

impl Scope {
    pub fn child(&self) -> Scope {
        self.clone()
    }

    pub fn find_table(&self, name: &str) -> Option<&ScopeTable> {
        self.tables
            .iter()
            .find(|t| t.alias.eq_ignore_ascii_case(name))
    }

    pub fn find_unnest(&self, name: &str) -> Option<&UnnestAlias> {
        self.unnest
            .iter()
            .find(|u| u.value_alias.eq_ignore_ascii_case(name))
    }

    pub fn find_offset(&self, name: &str) -> Option<&UnnestAlias> {
        self.unnest.iter().find(|u| {
            u.offset_alias
                .as_deref()
                .is_some_and(|o| o.eq_ignore_ascii_case(name))
        })
    }

    pub fn has_known_column(&self, name: &str) -> bool {
        self.tables
            .iter()
            .any(|t| t.def.as_ref().is_some_and(|d| d.column(name).is_some()))
    }

    pub fn has_unknown_tables(&self) -> bool {
        self.tables
            .iter()
            .any(|t| t.def.as_ref().is_none_or(TableDef::has_unknown_columns))
    }

    /// The declared type of a column visible in this scope, if any
    /// table knows it.
    pub fn column_type(&self, name: &str) -> Option<&skiffql_core::DataType> {
        self.tables.iter().find_map(|t| {
            t.def
                .as_ref()
                .and_then(|d| d.column(name))
                .map(|c| &c.data_type)
        })
    }
}

/// Borrowed session state the rewriter resolves against, plus the bind
/// accumulator for the statement being built.
pub struct Rewriter<'a> {
    pub catalog: &'a Catalog,
    pub vars: &'a IndexMap<String, Value>,
    pub udfs: &'a UdfRegistry,
    pub js_udfs: &'a HashMap<String, Arc<JsUdf>>,
    pub binder: RefCell<ParamBinder>,
}

impl<'a> Rewriter<'a> {
    pub fn new(
        catalog: &'a Catalog,
        vars: &'a IndexMap<String, Value>,
        udfs: &'a UdfRegistry,
        js_udfs: &'a HashMap<String, Arc<JsUdf>>,
        binder: ParamBinder,
    ) -> Rewriter<'a> {
        Rewriter {
            catalog,
            vars,
            udfs,
            js_udfs,
            binder: RefCell::new(binder),
        }
    }

    /// A sibling rewriter with an empty bind list, for statements that
    /// must execute separately (MERGE decomposition).
    pub fn fork(&self) -> Rewriter<'a> {
        Rewriter {
            catalog: self.catalog,
            vars: self.vars,
            udfs: self.udfs,
            js_udfs: self.js_udfs,
            binder: RefCell::new(ParamBinder::new(&[])),
        }
    }

    pub fn bind(&self, value: Value) -> String {
        self.binder.borrow_mut().push(value)
    }

    pub fn take_binds(self) -> Vec<Value> {
        self.binder.into_inner().into_binds()
    }
}

/// Quotes an identifier for the host store.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A single-quoted SQL string literal.
pub fn string_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Flattens an object name into path segments, splitting quoted parts
/// that carry dots (`` `project.dataset.table` ``).
pub fn object_name_parts(name: &ast::ObjectName) -> Vec<String> {
    let mut parts = Vec::new();
    for part in &name.0 {
        let ast::ObjectNamePart::Identifier(ident) = part;
        for piece in ident.value.split('.') {
            if !piece.is_empty() {
                parts.push(piece.to_string());
            }
        }
    }
    parts
}
