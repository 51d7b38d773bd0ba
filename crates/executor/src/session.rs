//! One session: one host-store connection, one registered function
//! view, one DECLARE scope. Statements execute in program order;
//! scripts are interpreted over a straight-line statement list with a
//! variable environment.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rusqlite::Connection;
use skiffql_common::{Error, Result};
use skiffql_core::{DataType, Value};
use skiffql_functions::bind::{value_from_raw, value_to_sql};
use skiffql_functions::{SessionClock, from_host_error, register_all};
use sqlparser::ast;
use sqlparser::dialect::BigQueryDialect;
use sqlparser::parser::Parser;
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::js::{self, JsLimits, JsUdf};
use crate::params::{Param, ParamBinder};
use crate::rewrite::{Rewriter, ddl, object_name_parts, quote_ident};
use crate::rows::Rows;
use crate::udf::{SqlUdf, UdfParam, UdfRegistry};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub js_timeout: Duration,
    pub js_heap_bytes: usize,
}

impl Default for SessionOptions {
    fn default() -> SessionOptions {
        SessionOptions {
            js_timeout: Duration::from_secs(1),
            js_heap_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Cooperative cancellation: honored between statements and between row
/// fetches.
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct Session {
    conn: Connection,
    catalog: Catalog,
    vars: IndexMap<String, Value>,
    udfs: UdfRegistry,
    js_udfs: HashMap<String, Arc<JsUdf>>,
    clock: SessionClock,
    options: SessionOptions,
    cancel: Arc<AtomicBool>,
    in_txn: bool,
}

impl Session {
    /// Opens a session against `:memory:` or a file path.
    pub fn open(dsn: &str) -> Result<Session> {
        Session::open_with(dsn, SessionOptions::default())
    }

    pub fn open_with(dsn: &str, options: SessionOptions) -> Result<Session> {
        let conn = if dsn == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(dsn)
        }
        .map_err(from_host_error)?;
        let clock = SessionClock::default();
        register_all(&conn, &clock)?;
        let catalog = Catalog::load(&conn)?;
        Ok(Session {
            conn,
            catalog,
            vars: IndexMap::new(),
            udfs: UdfRegistry::default(),
            js_udfs: HashMap::new(),
            clock,
            options,
            cancel: Arc::new(AtomicBool::new(false)),
            in_txn: false,
        })
    }

    /// Pins "now" for every subsequent statement in this session.
    pub fn set_current_time(&self, t: DateTime<Utc>) {
        self.clock.pin(t);
    }

    pub fn clear_current_time(&self) {
        self.clock.clear();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(Error::Canceled);
        }
        Ok(())
    }

    fn parse(sql: &str) -> Result<Vec<ast::Statement>> {
        Parser::parse_sql(&BigQueryDialect {}, sql).map_err(|e| Error::parse(e.to_string()))
    }

    /// Runs a (possibly multi-statement) script with no expected rows.
    pub fn exec(&mut self, sql: &str, params: &[Param]) -> Result<()> {
        let statements = Session::parse(sql)?;
        let mut binder = ParamBinder::new(params);
        for statement in statements {
            self.check_cancel()?;
            let outcome = self.execute_statement(&statement, &mut binder);
            if let Err(e) = outcome {
                return Err(self.abort_transaction_on(e));
            }
        }
        Ok(())
    }

    /// Runs one statement and returns its rows.
    pub fn query(&mut self, sql: &str, params: &[Param]) -> Result<Rows> {
        let mut statements = Session::parse(sql)?;
        if statements.len() != 1 {
            return Err(Error::invalid_argument(format!(
                "query expects exactly one statement, got {}",
                statements.len()
            )));
        }
        self.check_cancel()?;
        let statement = statements.remove(0);
        let mut binder = ParamBinder::new(params);
        match self.execute_statement(&statement, &mut binder) {
            Ok(Some(rows)) => Ok(rows),
            Ok(None) => Ok(Rows::new(Vec::new(), Vec::new())),
            Err(e) => Err(self.abort_transaction_on(e)),
        }
    }

    /// A failed statement inside a transaction aborts to the enclosing
    /// BEGIN.
    fn abort_transaction_on(&mut self, e: Error) -> Error {
        if self.in_txn {
            warn!(error = %e, "statement failed inside transaction, rolling back");
            if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                return Error::transaction_aborted(format!(
                    "{}; rollback also failed: {}",
                    e, rollback
                ));
            }
            self.in_txn = false;
        }
        e
    }

    fn rewriter<'a>(&'a self, binder: ParamBinder) -> Rewriter<'a> {
        Rewriter::new(
            &self.catalog,
            &self.vars,
            &self.udfs,
            &self.js_udfs,
            binder,
        )
    }

    fn execute_statement(
        &mut self,
        statement: &ast::Statement,
        binder: &mut ParamBinder,
    ) -> Result<Option<Rows>> {
        match statement {
            ast::Statement::Query(query) => {
                let taken = std::mem::replace(binder, ParamBinder::new(&[]));
                let rewriter = self.rewriter(taken);
                let sql = rewriter.rewrite_query(query)?;
                let (binds, rest) = rewriter.binder.into_inner().into_parts();
                *binder = rest;
                self.fetch(&sql, binds).map(Some)
            }
            ast::Statement::Insert(insert) => {
                let taken = std::mem::replace(binder, ParamBinder::new(&[]));
                let rewriter = self.rewriter(taken);
                let sql = rewriter.rewrite_insert(insert)?;
                let (binds, rest) = rewriter.binder.into_inner().into_parts();
                *binder = rest;
                self.run(&sql, binds)?;
                Ok(None)
            }
            ast::Statement::Update { .. } => {
                let taken = std::mem::replace(binder, ParamBinder::new(&[]));
                let rewriter = self.rewriter(taken);
                let sql = rewriter.rewrite_update(statement)?;
                let (binds, rest) = rewriter.binder.into_inner().into_parts();
                *binder = rest;
                self.run(&sql, binds)?;
                Ok(None)
            }
            ast::Statement::Delete(delete) => {
                let taken = std::mem::replace(binder, ParamBinder::new(&[]));
                let rewriter = self.rewriter(taken);
                let sql = rewriter.rewrite_delete(delete)?;
                let (binds, rest) = rewriter.binder.into_inner().into_parts();
                *binder = rest;
                self.run(&sql, binds)?;
                Ok(None)
            }
            ast::Statement::CreateTable(create) => {
                self.execute_create_table(create, binder)?;
                Ok(None)
            }
            ast::Statement::Drop {
                object_type: ast::ObjectType::Table,
                if_exists,
                names,
                ..
            } => {
                for name in names {
                    self.execute_drop_table(name, *if_exists)?;
                }
                Ok(None)
            }
            ast::Statement::Truncate { table_names, .. } => {
                for target in table_names {
                    let parts = object_name_parts(&target.name);
                    let def = self.catalog.require(&parts)?;
                    let sql = format!("DELETE FROM {}", quote_ident(&def.internal_name()));
                    self.run(&sql, Vec::new())?;
                }
                Ok(None)
            }
            ast::Statement::Merge {
                table,
                source,
                on,
                clauses,
                ..
            } => {
                self.execute_merge(table, source, on, clauses)?;
                Ok(None)
            }
            ast::Statement::Declare { stmts } => {
                for declare in stmts {
                    self.execute_declare(declare)?;
                }
                Ok(None)
            }
            ast::Statement::Set(set) => {
                self.execute_set(set)?;
                Ok(None)
            }
            ast::Statement::StartTransaction { .. } => {
                if self.in_txn {
                    return Err(Error::transaction_aborted("BEGIN inside a transaction"));
                }
                self.conn.execute_batch("BEGIN").map_err(from_host_error)?;
                self.in_txn = true;
                Ok(None)
            }
            ast::Statement::Commit { .. } => {
                if !self.in_txn {
                    return Err(Error::transaction_aborted("COMMIT without BEGIN"));
                }
                self.conn.execute_batch("COMMIT").map_err(from_host_error)?;
                self.in_txn = false;
                Ok(None)
            }
            ast::Statement::Rollback { .. } => {
                if !self.in_txn {
                    return Err(Error::transaction_aborted("ROLLBACK without BEGIN"));
                }
                self.conn
                    .execute_batch("ROLLBACK")
                    .map_err(from_host_error)?;
                self.in_txn = false;
                Ok(None)
            }
            ast::Statement::CreateFunction(create) => {
                self.execute_create_function(create)?;
                Ok(None)
            }
            other => Err(Error::analyze(format!(
                "unsupported statement {}",
                statement_kind(other)
            ))),
        }
    }

    fn run(&self, sql: &str, binds: Vec<Value>) -> Result<usize> {
        debug!(%sql, "executing");
        let mut stmt = self.conn.prepare(sql).map_err(from_host_error)?;
        let mut sql_binds = Vec::with_capacity(binds.len());
        for value in &binds {
            sql_binds.push(value_to_sql(value)?);
        }
        stmt.execute(rusqlite::params_from_iter(sql_binds))
            .map_err(from_host_error)
    }

    fn fetch(&self, sql: &str, binds: Vec<Value>) -> Result<Rows> {
        debug!(%sql, "querying");
        let mut stmt = self.conn.prepare(sql).map_err(from_host_error)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut sql_binds = Vec::with_capacity(binds.len());
        for value in &binds {
            sql_binds.push(value_to_sql(value)?);
        }
        let mut host_rows = stmt
            .query(rusqlite::params_from_iter(sql_binds))
            .map_err(from_host_error)?;
        let mut rows = Vec::new();
        loop {
            self.check_cancel()?;
            let Some(row) = host_rows.next().map_err(from_host_error)? else {
                break;
            };
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                let raw = row.get_ref(i).map_err(from_host_error)?;
                values.push(value_from_raw(raw)?);
            }
            rows.push(values);
        }
        Ok(Rows::new(columns, rows))
    }

    /// Evaluates a scalar expression (DECLARE defaults, SET values)
    /// against the current variable environment.
    fn eval_scalar(&self, expr: &ast::Expr) -> Result<Value> {
        let rewriter = self.rewriter(ParamBinder::new(&[]));
        let sql = rewriter.rewrite_expr(expr, &crate::rewrite::Scope::default())?;
        let (binds, _) = rewriter.binder.into_inner().into_parts();
        let mut rows = self.fetch(&format!("SELECT {} AS v", sql), binds)?;
        match rows.next() {
            Some(row) => Ok(row.value(0)?.clone()),
            None => Ok(Value::Null),
        }
    }

    fn execute_declare(&mut self, declare: &ast::Declare) -> Result<()> {
        let declared_type = declare
            .data_type
            .as_ref()
            .map(ddl::convert_type)
            .transpose()?
            .unwrap_or(DataType::Unknown);
        let default = match &declare.assignment {
            Some(ast::DeclareAssignment::Default(expr))
            | Some(ast::DeclareAssignment::Expr(expr)) => Some(expr.as_ref()),
            None => None,
            Some(other) => {
                return Err(Error::analyze(format!(
                    "unsupported DECLARE assignment {:?}",
                    other
                )));
            }
        };
        // strictly left to right: later defaults see earlier variables
        for name in &declare.names {
            let value = match default {
                Some(expr) => {
                    let evaluated = self.eval_scalar(expr)?;
                    evaluated.coerce_to(&declared_type)?
                }
                None => Value::Null,
            };
            debug!(variable = %name.value, "declared session variable");
            self.vars.insert(name.value.to_uppercase(), value);
        }
        Ok(())
    }

    fn execute_set(&mut self, set: &ast::Set) -> Result<()> {
        match set {
            ast::Set::SingleAssignment {
                variable, values, ..
            } => {
                let name = object_name_parts(variable)
                    .last()
                    .cloned()
                    .ok_or_else(|| Error::analyze("SET requires a variable name"))?;
                let expr = values
                    .first()
                    .ok_or_else(|| Error::analyze("SET requires a value"))?;
                let value = self.eval_scalar(expr)?;
                let key = name.to_uppercase();
                if !self.vars.contains_key(&key) {
                    return Err(Error::analyze(format!("undeclared variable {}", name)));
                }
                self.vars.insert(key, value);
                Ok(())
            }
            other => Err(Error::analyze(format!("unsupported SET {:?}", other))),
        }
    }

    fn execute_create_table(
        &mut self,
        create: &ast::CreateTable,
        binder: &mut ParamBinder,
    ) -> Result<()> {
        let mut def = ddl::table_def_from_create(create)?;
        let internal = def.internal_name();
        if def.temp {
            if self.catalog.temp_exists(&internal) {
                // re-declaration of a TEMP table silently replaces it
                self.conn
                    .execute_batch(&format!(
                        "DROP TABLE IF EXISTS temp.{}",
                        quote_ident(&internal)
                    ))
                    .map_err(from_host_error)?;
                self.catalog.remove(&internal);
            }
        } else if self.catalog.persistent_exists(&internal) {
            if !create.or_replace {
                return Err(Error::catalog_conflict(format!(
                    "table {} already exists",
                    internal
                )));
            }
            self.conn
                .execute_batch(&format!(
                    "DROP TABLE IF EXISTS main.{}",
                    quote_ident(&internal)
                ))
                .map_err(from_host_error)?;
            self.catalog.forget(&self.conn, &internal)?;
            self.catalog.remove(&internal);
        }

        match &create.query {
            Some(query) => {
                let taken = std::mem::replace(binder, ParamBinder::new(&[]));
                let rewriter = self.rewriter(taken);
                let (select_sql, columns) =
                    rewriter.rewrite_query_with_columns(query, &crate::rewrite::Scope::default())?;
                let (binds, rest) = rewriter.binder.into_inner().into_parts();
                *binder = rest;
                def.columns = columns
                    .into_iter()
                    .filter(|c| c != "*")
                    .map(|name| crate::catalog::ColumnDef {
                        name,
                        data_type: DataType::Unknown,
                        not_null: false,
                    })
                    .collect();
                let sql = format!(
                    "CREATE {}TABLE {} AS {}",
                    if def.temp { "TEMP " } else { "" },
                    quote_ident(&internal),
                    select_sql
                );
                self.run(&sql, binds)?;
            }
            None => {
                self.run(&ddl::create_table_ddl(&def), Vec::new())?;
            }
        }

        if !def.temp {
            self.catalog.persist(&self.conn, &def)?;
        }
        self.catalog.insert(def);
        Ok(())
    }

    fn execute_drop_table(&mut self, name: &ast::ObjectName, if_exists: bool) -> Result<()> {
        let parts = object_name_parts(name);
        let Some(def) = self.catalog.resolve(&parts).cloned() else {
            if if_exists {
                return Ok(());
            }
            return Err(Error::catalog_missing(parts.join(".")));
        };
        let internal = def.internal_name();
        let schema = if def.temp { "temp" } else { "main" };
        self.conn
            .execute_batch(&format!(
                "DROP TABLE IF EXISTS {}.{}",
                schema,
                quote_ident(&internal)
            ))
            .map_err(from_host_error)?;
        if !def.temp {
            self.catalog.forget(&self.conn, &internal)?;
        }
        self.catalog.remove(&internal);
        Ok(())
    }

    /// MERGE runs its decomposed statements under a savepoint so the
    /// sequence appears atomic even mid-transaction.
    fn execute_merge(
        &mut self,
        table: &ast::TableFactor,
        source: &ast::TableFactor,
        on: &ast::Expr,
        clauses: &[ast::MergeClause],
    ) -> Result<()> {
        let rewriter = self.rewriter(ParamBinder::new(&[]));
        let statements = rewriter.rewrite_merge(table, source, on, clauses)?;
        self.conn
            .execute_batch("SAVEPOINT skiff_merge")
            .map_err(from_host_error)?;
        for (sql, binds) in statements {
            if let Err(e) = self.run(&sql, binds) {
                let _ = self.conn.execute_batch("ROLLBACK TO skiff_merge");
                let _ = self.conn.execute_batch("RELEASE skiff_merge");
                return Err(e);
            }
        }
        self.conn
            .execute_batch("RELEASE skiff_merge")
            .map_err(from_host_error)?;
        Ok(())
    }

    fn execute_create_function(&mut self, create: &ast::CreateFunction) -> Result<()> {
        let name = object_name_parts(&create.name)
            .last()
            .cloned()
            .ok_or_else(|| Error::analyze("CREATE FUNCTION requires a name"))?
            .to_lowercase();
        let body_expr = match &create.function_body {
            Some(ast::CreateFunctionBody::AsBeforeOptions(expr))
            | Some(ast::CreateFunctionBody::AsAfterOptions(expr))
            | Some(ast::CreateFunctionBody::Return(expr)) => expr,
            _ => {
                return Err(Error::analyze(format!(
                    "CREATE FUNCTION {}: missing AS body",
                    name
                )));
            }
        };

        let is_js = create
            .language
            .as_ref()
            .is_some_and(|l| l.value.eq_ignore_ascii_case("js"));
        if is_js {
            let mut params = Vec::new();
            for arg in create.args.as_deref().unwrap_or_default() {
                let param_name = arg
                    .name
                    .as_ref()
                    .map(|i| i.value.clone())
                    .ok_or_else(|| {
                        Error::analyze(format!("CREATE FUNCTION {}: unnamed parameter", name))
                    })?;
                params.push((param_name, ddl::convert_type(&arg.data_type)?));
            }
            let return_type = create
                .return_type
                .as_ref()
                .map(ddl::convert_type)
                .transpose()?
                .ok_or_else(|| {
                    Error::analyze(format!(
                        "CREATE FUNCTION {}: LANGUAGE js requires RETURNS",
                        name
                    ))
                })?;
            let body = match body_expr {
                ast::Expr::Value(v) => crate::rewrite::expr::ast_value_text(&v.value)?,
                other => {
                    return Err(Error::analyze(format!(
                        "CREATE FUNCTION {}: expected a string body, got {:?}",
                        name, other
                    )));
                }
            };
            let udf = Arc::new(JsUdf {
                name: name.clone(),
                params,
                return_type,
                body,
            });
            self.register_js_udf(udf)?;
            return Ok(());
        }

        let mut params = Vec::new();
        let mut templated = false;
        for arg in create.args.as_deref().unwrap_or_default() {
            let param_name = arg
                .name
                .as_ref()
                .map(|i| i.value.clone())
                .ok_or_else(|| {
                    Error::analyze(format!("CREATE FUNCTION {}: unnamed parameter", name))
                })?;
            let data_type = match &arg.data_type {
                ast::DataType::AnyType => {
                    templated = true;
                    None
                }
                other => Some(ddl::convert_type(other)?),
            };
            params.push(UdfParam {
                name: param_name,
                data_type,
            });
        }
        debug!(function = %name, templated, "registered SQL function");
        self.udfs.define(SqlUdf {
            name,
            params,
            body: Arc::new(body_expr.clone()),
            templated,
        });
        Ok(())
    }

    fn register_js_udf(&mut self, udf: Arc<JsUdf>) -> Result<()> {
        let limits = JsLimits {
            timeout: self.options.js_timeout,
            heap_bytes: self.options.js_heap_bytes,
        };
        let for_call = udf.clone();
        self.conn
            .create_scalar_function(
                &udf.name,
                udf.params.len() as i32,
                rusqlite::functions::FunctionFlags::SQLITE_UTF8,
                move |ctx| {
                    let mut args = Vec::with_capacity(ctx.len());
                    for i in 0..ctx.len() {
                        args.push(
                            value_from_raw(ctx.get_raw(i))
                                .map_err(skiffql_functions::engine_error)?,
                        );
                    }
                    let out = js::evaluate(&for_call, &args, limits)
                        .map_err(skiffql_functions::engine_error)?;
                    value_to_sql(&out).map_err(skiffql_functions::engine_error)
                },
            )
            .map_err(from_host_error)?;
        self.js_udfs.insert(udf.name.clone(), udf);
        Ok(())
    }
}

fn statement_kind(statement: &ast::Statement) -> String {
    let text = statement.to_string();
    text.split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
}
