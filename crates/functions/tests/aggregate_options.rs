//! Aggregate and window option behavior exercised through the host
//! store, the way the rewriter drives it: user arguments plus one
//! trailing call-options record.

use rusqlite::Connection;
use skiffql_core::{Cell, Value, decode_cell};
use skiffql_functions::options::CallOptions;
use skiffql_functions::{SessionClock, register_all};

fn open() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    register_all(&conn, &SessionClock::default()).unwrap();
    conn
}

fn query_cells(conn: &Connection, sql: &str) -> Vec<Value> {
    let mut stmt = conn.prepare(sql).unwrap();
    let columns = stmt.column_count();
    let mut rows = stmt.query([]).unwrap();
    let mut out = Vec::new();
    while let Some(row) = rows.next().unwrap() {
        for i in 0..columns {
            let cell = match row.get_ref(i).unwrap() {
                rusqlite::types::ValueRef::Null => Cell::Null,
                rusqlite::types::ValueRef::Integer(v) => Cell::Int(v),
                rusqlite::types::ValueRef::Real(v) => Cell::Real(v),
                rusqlite::types::ValueRef::Text(t) => {
                    Cell::Text(String::from_utf8(t.to_vec()).unwrap())
                }
                rusqlite::types::ValueRef::Blob(b) => Cell::Blob(b.to_vec()),
            };
            out.push(decode_cell(&cell).unwrap());
        }
    }
    out
}

fn opts(distinct: bool, ignore_nulls: bool, limit: Option<i64>, dirs: &[bool]) -> String {
    CallOptions::static_json(distinct, ignore_nulls, limit, dirs, None).replace('\'', "''")
}

#[test]
fn distinct_equals_aggregation_over_deduplicated_input() {
    let conn = open();
    conn.execute_batch(
        "CREATE TABLE t(x); INSERT INTO t VALUES (1),(1),(2),(2),(3),(NULL);",
    )
    .unwrap();
    let distinct = query_cells(
        &conn,
        &format!(
            "SELECT skiff_sum(x, skiff_call_opts('{}')) FROM t",
            opts(true, false, None, &[])
        ),
    );
    let deduplicated = query_cells(&conn, "SELECT skiff_sum(x) FROM (SELECT DISTINCT x FROM t)");
    assert_eq!(distinct, deduplicated);
    assert_eq!(distinct, vec![Value::Int64(6)]);
}

#[test]
fn ignore_nulls_equals_aggregation_over_non_null_input() {
    let conn = open();
    conn.execute_batch(
        "CREATE TABLE t(x); INSERT INTO t VALUES (4),(NULL),(6),(NULL);",
    )
    .unwrap();
    let ignoring = query_cells(
        &conn,
        &format!(
            "SELECT skiff_count(x, skiff_call_opts('{}')) FROM t",
            opts(false, true, None, &[])
        ),
    );
    let filtered = query_cells(&conn, "SELECT skiff_count(x) FROM t WHERE x IS NOT NULL");
    assert_eq!(ignoring, filtered);
}

#[test]
fn string_agg_respects_order_and_limit() {
    let conn = open();
    conn.execute_batch(
        "CREATE TABLE t(word, rank); INSERT INTO t VALUES ('b', 2), ('a', 1), ('c', 3);",
    )
    .unwrap();
    let got = query_cells(
        &conn,
        &format!(
            "SELECT skiff_string_agg(word, '-', skiff_call_opts('{}', rank)) FROM t",
            opts(false, false, Some(2), &[true])
        ),
    );
    assert_eq!(got, vec![Value::from("a-b")]);
}

#[test]
fn empty_group_yields_count_zero_and_sum_null() {
    let conn = open();
    conn.execute_batch("CREATE TABLE t(x);").unwrap();
    assert_eq!(
        query_cells(&conn, "SELECT skiff_count(x) FROM t"),
        vec![Value::Int64(0)]
    );
    assert_eq!(
        query_cells(&conn, "SELECT skiff_sum(x) FROM t"),
        vec![Value::Null]
    );
}

#[test]
fn window_rank_skips_ties_and_row_number_is_monotone() {
    let conn = open();
    conn.execute_batch(
        "CREATE TABLE t(score); INSERT INTO t VALUES (10),(10),(20);",
    )
    .unwrap();
    let over = "OVER (ORDER BY score ROWS BETWEEN UNBOUNDED PRECEDING AND UNBOUNDED FOLLOWING)";
    let rank_opts = CallOptions::static_json(false, false, None, &[true], Some(&None))
        .replace('\'', "''");
    let ranks = query_cells(
        &conn,
        &format!(
            "SELECT skiff_win_rank(skiff_call_opts('{}', score)) {} FROM t ORDER BY score",
            rank_opts, over
        ),
    );
    assert_eq!(
        ranks,
        vec![Value::Int64(1), Value::Int64(1), Value::Int64(3)]
    );
    let row_numbers = query_cells(
        &conn,
        &format!(
            "SELECT skiff_win_row_number(skiff_call_opts('{}', score)) {} FROM t ORDER BY score",
            rank_opts, over
        ),
    );
    assert_eq!(
        row_numbers,
        vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]
    );
}
