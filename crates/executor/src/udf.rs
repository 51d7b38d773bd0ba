//! SQL-bodied user functions. Plain UDFs inline their body at call
//! sites; templated (`ANY TYPE`) functions specialize per concrete
//! argument-type tuple through a session-local cache.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use skiffql_common::{Error, Result};
use skiffql_core::DataType;
use sqlparser::ast;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct UdfParam {
    pub name: String,
    /// `None` for `ANY TYPE` parameters.
    pub data_type: Option<DataType>,
}

#[derive(Debug, Clone)]
pub struct SqlUdf {
    pub name: String,
    pub params: Vec<UdfParam>,
    pub body: Arc<ast::Expr>,
    pub templated: bool,
}

#[derive(Default)]
pub struct UdfRegistry {
    udfs: HashMap<String, Arc<SqlUdf>>,
    specializations: RefCell<HashMap<String, Arc<ast::Expr>>>,
}

impl UdfRegistry {
    /// Registers or replaces a function; redeclaration evicts every
    /// cached specialization of the old definition.
    pub fn define(&mut self, udf: SqlUdf) {
        let name = udf.name.clone();
        self.specializations
            .borrow_mut()
            .retain(|key, _| !key.starts_with(&format!("{}(", name)));
        self.udfs.insert(name, Arc::new(udf));
    }

    pub fn get(&self, name: &str) -> Option<Arc<SqlUdf>> {
        self.udfs.get(&name.to_lowercase()).cloned()
    }

    /// Binds the call's concrete argument types and returns the body to
    /// inline. Non-templated functions resolve once; templated ones go
    /// through the specialization cache.
    pub fn specialize(&self, udf: &SqlUdf, arg_types: &[DataType]) -> Result<Arc<ast::Expr>> {
        if arg_types.len() != udf.params.len() {
            return Err(Error::invalid_argument(format!(
                "{}: expected {} arguments, got {}",
                udf.name.to_uppercase(),
                udf.params.len(),
                arg_types.len()
            )));
        }
        if !udf.templated {
            return Ok(udf.body.clone());
        }
        let key = format!(
            "{}({})",
            udf.name,
            arg_types
                .iter()
                .map(DataType::to_string)
                .collect::<Vec<_>>()
                .join(",")
        );
        if let Some(found) = self.specializations.borrow().get(&key) {
            return Ok(found.clone());
        }
        debug!(specialization = %key, "binding templated function");
        let body = resolve_with_types(udf)?;
        self.specializations.borrow_mut().insert(key, body.clone());
        Ok(body)
    }
}

/// The re-resolution step for a specialization: checks every bare
/// identifier in the body binds to a declared parameter (column-free
/// bodies are the analyzable subset for scalar UDFs) and hands back the
/// resolved body.
fn resolve_with_types(udf: &SqlUdf) -> Result<Arc<ast::Expr>> {
    let mut free = Vec::new();
    collect_free_identifiers(&udf.body, &udf.params, &mut free);
    // identifiers inside subqueries resolve against their own FROM
    // scope, so only report top-level unknowns
    if let Some(unknown) = free.first() {
        return Err(Error::analyze(format!(
            "{}: unknown identifier {} in function body",
            udf.name.to_uppercase(),
            unknown
        )));
    }
    Ok(udf.body.clone())
}

fn collect_free_identifiers(expr: &ast::Expr, params: &[UdfParam], out: &mut Vec<String>) {
    match expr {
        ast::Expr::Identifier(ident) => {
            let known = params
                .iter()
                .any(|p| p.name.eq_ignore_ascii_case(&ident.value));
            if !known {
                out.push(ident.value.clone());
            }
        }
        ast::Expr::BinaryOp { left, right, .. } => {
            collect_free_identifiers(left, params, out);
            collect_free_identifiers(right, params, out);
        }
        ast::Expr::UnaryOp { expr, .. } | ast::Expr::Nested(expr) => {
            collect_free_identifiers(expr, params, out);
        }
        ast::Expr::Cast { expr, .. } => collect_free_identifiers(expr, params, out),
        ast::Expr::Function(f) => {
            if let ast::FunctionArguments::List(list) = &f.args {
                for arg in &list.args {
                    if let ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) = arg {
                        collect_free_identifiers(e, params, out);
                    }
                }
            }
        }
        // subqueries bind their own names
        _ => {}
    }
}
