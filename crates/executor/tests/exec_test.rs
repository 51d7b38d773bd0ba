use chrono::Utc;
use skiffql_common::Error;
use skiffql_core::Value;
use skiffql_executor::{Param, Session};

fn open() -> Session {
    Session::open(":memory:").unwrap()
}

fn scan_rows<T: skiffql_executor::rows::FromValue>(session: &mut Session, sql: &str) -> Vec<T> {
    let rows = session.query(sql, &[]).unwrap();
    rows.map(|row| row.get::<T>(0).unwrap()).collect()
}

#[test]
fn create_table_with_all_types() {
    let mut session = open();
    session.set_current_time(Utc::now());
    session
        .exec(
            r#"
CREATE TABLE _table_a (
 intValue        INT64,
 boolValue       BOOL,
 doubleValue     DOUBLE,
 floatValue      FLOAT,
 stringValue     STRING,
 bytesValue      BYTES,
 numericValue    NUMERIC,
 bignumericValue BIGNUMERIC,
 intervalValue   INTERVAL,
 dateValue       DATE,
 datetimeValue   DATETIME,
 timeValue       TIME,
 timestampValue  TIMESTAMP
)"#,
            &[],
        )
        .unwrap();
}

#[test]
fn create_table_as_select_with_join() {
    let mut session = open();
    session
        .exec(
            r#"
CREATE TABLE foo ( id STRING PRIMARY KEY NOT NULL, name STRING );
CREATE TABLE bar ( id STRING, name STRING, PRIMARY KEY (id, name) );
CREATE OR REPLACE TABLE new_table_as_select AS (
  SELECT t1.id, t2.name FROM foo t1 JOIN bar t2 ON t1.id = t2.id
);
"#,
            &[],
        )
        .unwrap();
}

#[test]
fn recreate_table() {
    let mut session = open();
    session
        .exec(
            r#"
CREATE OR REPLACE TABLE recreate_table ( a string );
DROP TABLE recreate_table;
CREATE TABLE recreate_table ( b string );
INSERT recreate_table (b) VALUES ('hello');
"#,
            &[],
        )
        .unwrap();
    let names: Vec<String> = scan_rows(&mut session, "SELECT b FROM recreate_table");
    assert_eq!(names, vec!["hello".to_string()]);
}

#[test]
fn insert_select_and_unnest_tuples() {
    let mut session = open();
    session
        .exec(
            r#"
CREATE OR REPLACE TABLE TableA(product string, quantity int64);
INSERT TableA (product, quantity) SELECT 'top load washer', 10;
INSERT INTO TableA (product, quantity) SELECT * FROM UNNEST([('microwave', 20), ('dishwasher', 30)]);
"#,
            &[],
        )
        .unwrap();
    let mut rows = session
        .query(
            "SELECT product, quantity FROM TableA ORDER BY quantity",
            &[],
        )
        .unwrap();
    let mut got = Vec::new();
    while let Some(row) = rows.next() {
        got.push((row.get::<String>(0).unwrap(), row.get::<i64>(1).unwrap()));
    }
    assert_eq!(
        got,
        vec![
            ("top load washer".to_string(), 10),
            ("microwave".to_string(), 20),
            ("dishwasher".to_string(), 30),
        ]
    );
}

#[test]
fn transaction_with_temp_table_merge_and_truncate() {
    let mut session = open();
    session
        .exec(
            r#"
CREATE OR REPLACE TABLE Inventory
(
 product string,
 quantity int64,
 supply_constrained bool
);

CREATE OR REPLACE TABLE NewArrivals
(
 product string,
 quantity int64,
 warehouse string
);

INSERT Inventory (product, quantity)
VALUES('top load washer', 10),
     ('front load washer', 20),
     ('dryer', 30),
     ('refrigerator', 10),
     ('microwave', 20),
     ('dishwasher', 30);

INSERT NewArrivals (product, quantity, warehouse)
VALUES('top load washer', 100, 'warehouse #1'),
     ('dryer', 200, 'warehouse #2'),
     ('oven', 300, 'warehouse #1');

BEGIN TRANSACTION;

CREATE TEMP TABLE tmp AS SELECT * FROM NewArrivals WHERE warehouse = 'warehouse #1';
DELETE NewArrivals WHERE warehouse = 'warehouse #1';
MERGE Inventory AS I
USING tmp AS T
ON I.product = T.product
WHEN NOT MATCHED THEN
 INSERT(product, quantity, supply_constrained)
 VALUES(product, quantity, false)
WHEN MATCHED THEN
 UPDATE SET quantity = I.quantity + T.quantity;

TRUNCATE TABLE tmp;

COMMIT TRANSACTION;
"#,
            &[],
        )
        .unwrap();

    let mut rows = session
        .query(
            "SELECT product, quantity FROM Inventory ORDER BY product",
            &[],
        )
        .unwrap();
    let mut got = Vec::new();
    while let Some(row) = rows.next() {
        got.push((row.get::<String>(0).unwrap(), row.get::<i64>(1).unwrap()));
    }
    assert_eq!(
        got,
        vec![
            ("dishwasher".to_string(), 30),
            ("dryer".to_string(), 30),
            ("front load washer".to_string(), 20),
            ("microwave".to_string(), 20),
            ("oven".to_string(), 300),
            ("refrigerator".to_string(), 10),
            ("top load washer".to_string(), 110),
        ]
    );
    let remaining: Vec<i64> = scan_rows(&mut session, "SELECT COUNT(*) FROM NewArrivals");
    assert_eq!(remaining, vec![1]);
    let tmp_count: Vec<i64> = scan_rows(&mut session, "SELECT COUNT(*) FROM tmp");
    assert_eq!(tmp_count, vec![0]);
}

#[test]
fn nested_struct_field_access() {
    let mut session = open();
    session
        .exec(
            r#"
CREATE TABLE items (
  id INT64,
  value STRUCT<fieldA STRING, fieldB STRUCT<fieldX STRING, fieldY STRING>>
)"#,
            &[],
        )
        .unwrap();
    let nested = Value::Struct(vec![(
        "fieldB".to_string(),
        Value::Struct(vec![("fieldY".to_string(), Value::from("bar"))]),
    )]);
    session
        .exec(
            "INSERT items (id, value) VALUES (?, ?)",
            &[Param::from(123i64), Param::from(nested)],
        )
        .unwrap();

    let mut rows = session
        .query(
            "SELECT value, value.fieldB, value.fieldB.fieldY FROM items",
            &[],
        )
        .unwrap();
    let row = rows.next().unwrap();
    assert!(rows.next().is_none());

    let whole = row.get::<Value>(0).unwrap();
    assert_eq!(
        whole,
        Value::Struct(vec![
            ("fieldA".to_string(), Value::Null),
            (
                "fieldB".to_string(),
                Value::Struct(vec![
                    ("fieldX".to_string(), Value::Null),
                    ("fieldY".to_string(), Value::from("bar")),
                ]),
            ),
        ])
    );
    let field_b = row.get::<Value>(1).unwrap();
    assert_eq!(
        field_b,
        Value::Struct(vec![
            ("fieldX".to_string(), Value::Null),
            ("fieldY".to_string(), Value::from("bar")),
        ])
    );
    assert_eq!(row.get::<String>(2).unwrap(), "bar");
}

#[test]
fn temp_table_shadowing_and_conflict() {
    let mut session = open();
    session
        .exec("CREATE TEMP TABLE tmp_table (id INT64)", &[])
        .unwrap();
    session
        .exec("CREATE TEMP TABLE tmp_table (id INT64)", &[])
        .unwrap();
    session
        .exec("CREATE TABLE tmp_table (id INT64)", &[])
        .unwrap();
    let err = session
        .exec("CREATE TABLE tmp_table (id INT64)", &[])
        .unwrap_err();
    assert!(matches!(err, Error::CatalogConflict(_)), "got {:?}", err);
}

#[test]
fn declare_defaults_evaluate_left_to_right() {
    let mut session = open();
    session
        .exec(
            r#"
CREATE TABLE ledger (business_date DATE);
INSERT ledger (business_date) VALUES ('2024-03-14'), ('2024-03-15'), ('2024-02-29');
"#,
            &[],
        )
        .unwrap();
    session
        .exec(
            r#"
DECLARE last_date DATE DEFAULT (SELECT MAX(business_date) FROM ledger);
DECLARE plus1 DATE DEFAULT DATE_ADD(last_date, INTERVAL 1 DAY);
"#,
            &[],
        )
        .unwrap();
    let got: Vec<String> = scan_rows(&mut session, "SELECT plus1");
    assert_eq!(got, vec!["2024-03-16".to_string()]);
}

#[test]
fn wildcard_table_with_table_suffix() {
    let mut session = open();
    session
        .exec(
            "CREATE TABLE `project.dataset.table_a` AS SELECT specialName FROM UNNEST (['alice_a', 'bob_a']) as specialName",
            &[],
        )
        .unwrap();
    session
        .exec(
            "CREATE TABLE `project.dataset.table_b` AS SELECT name FROM UNNEST(['alice_b', 'bob_b']) as name",
            &[],
        )
        .unwrap();
    session
        .exec(
            "CREATE TABLE `project.dataset.table_c` AS SELECT name FROM UNNEST(['alice_c', 'bob_c']) as name",
            &[],
        )
        .unwrap();
    session
        .exec(
            "CREATE TABLE `project.dataset.other_d` AS SELECT name FROM UNNEST(['alice_d', 'bob_d']) as name",
            &[],
        )
        .unwrap();

    for from in ["`project.dataset.table_*`", "`dataset.table_*`"] {
        let sql = format!(
            "SELECT name, _TABLE_SUFFIX FROM {} WHERE name LIKE 'alice%' OR name IS NULL",
            from
        );
        let mut rows = session.query(&sql, &[]).unwrap();
        let mut got = Vec::new();
        while let Some(row) = rows.next() {
            got.push((
                row.get::<Option<String>>(0).unwrap(),
                row.get::<String>(1).unwrap(),
            ));
        }
        assert_eq!(
            got,
            vec![
                (Some("alice_c".to_string()), "c".to_string()),
                (Some("alice_b".to_string()), "b".to_string()),
                (None, "a".to_string()),
                (None, "a".to_string()),
            ],
            "from {}",
            from
        );
    }
}

#[test]
fn wildcard_count_matches_per_table_sum() {
    let mut session = open();
    session
        .exec(
            r#"
CREATE TABLE `d.t_x` AS SELECT v FROM UNNEST([1, 2, 3]) AS v;
CREATE TABLE `d.t_y` AS SELECT v FROM UNNEST([4, 5]) AS v;
"#,
            &[],
        )
        .unwrap();
    let total: Vec<i64> = scan_rows(&mut session, "SELECT COUNT(*) FROM `d.t_*`");
    let x: Vec<i64> = scan_rows(&mut session, "SELECT COUNT(*) FROM `d.t_x`");
    let y: Vec<i64> = scan_rows(&mut session, "SELECT COUNT(*) FROM `d.t_y`");
    assert_eq!(total[0], x[0] + y[0]);
}

#[test]
fn templated_function_specializes_per_argument_types() {
    let mut session = open();
    session
        .exec(
            "CREATE FUNCTION ANY_ADD(x ANY TYPE, y ANY TYPE) AS ((x + 4) / y)",
            &[],
        )
        .unwrap();
    let ints: Vec<f64> = scan_rows(&mut session, "SELECT ANY_ADD(3, 4)");
    assert_eq!(ints, vec![1.75]);
    let floats: Vec<f64> = scan_rows(&mut session, "SELECT ANY_ADD(18.22, 11.11)");
    assert_eq!(floats, vec![2.0]);

    session
        .exec(
            "CREATE FUNCTION MAX_FROM_ARRAY(arr ANY TYPE) as (( SELECT MAX(x) FROM UNNEST(arr) as x ))",
            &[],
        )
        .unwrap();
    let max_int: Vec<i64> = scan_rows(&mut session, "SELECT MAX_FROM_ARRAY([1, 4, 2, 3])");
    assert_eq!(max_int, vec![4]);
    let max_float: Vec<f64> =
        scan_rows(&mut session, "SELECT MAX_FROM_ARRAY([1.234, 3.456, 4.567, 2.345])");
    assert_eq!(max_float, vec![4.567]);
}

#[test]
fn javascript_udf_multiplies_inputs() {
    let mut session = open();
    session
        .exec(
            r##"
CREATE FUNCTION multiplyInputs(x FLOAT64, y FLOAT64)
RETURNS FLOAT64
LANGUAGE js
AS r"""
  return x*y;
"""
"##,
            &[],
        )
        .unwrap();
    let mut rows = session
        .query(
            r#"
WITH numbers AS
  (SELECT 1 AS x, 5 as y UNION ALL SELECT 2 AS x, 10 as y UNION ALL SELECT 3 as x, 15 as y)
  SELECT x, y, multiplyInputs(x, y) AS product FROM numbers"#,
            &[],
        )
        .unwrap();
    let mut got = Vec::new();
    while let Some(row) = rows.next() {
        got.push((
            row.get::<f64>(0).unwrap(),
            row.get::<f64>(1).unwrap(),
            row.get::<f64>(2).unwrap(),
        ));
    }
    assert_eq!(got, vec![(1.0, 5.0, 5.0), (2.0, 10.0, 20.0), (3.0, 15.0, 45.0)]);
}

#[test]
fn javascript_udf_struct_to_array() {
    let mut session = open();
    session
        .exec(
            r#"
CREATE FUNCTION structToArray(obj STRUCT<idx INT64, name STRING>)
RETURNS ARRAY<STRING>
LANGUAGE js AS """
  let result = []

  result.push(obj["idx"])
  result.push(obj["name"])
  return result;
""";
"#,
            &[],
        )
        .unwrap();
    let got: Vec<String> = scan_rows(
        &mut session,
        r#"SELECT * FROM UNNEST(structToArray(STRUCT(1,"A")))"#,
    );
    assert_eq!(got, vec!["1".to_string(), "A".to_string()]);
}

#[test]
fn merge_matches_update_plus_insert_decomposition() {
    let setup = r#"
CREATE TABLE target (id INT64, amount INT64);
CREATE TABLE source (id INT64, amount INT64);
INSERT target (id, amount) VALUES (1, 10), (2, 20);
INSERT source (id, amount) VALUES (2, 200), (3, 300);
"#;
    let mut merged = open();
    merged.exec(setup, &[]).unwrap();
    merged
        .exec(
            r#"
MERGE target T
USING source S
ON T.id = S.id
WHEN MATCHED THEN UPDATE SET amount = T.amount + S.amount
WHEN NOT MATCHED THEN INSERT (id, amount) VALUES (id, amount);
"#,
            &[],
        )
        .unwrap();

    let mut manual = open();
    manual.exec(setup, &[]).unwrap();
    manual
        .exec(
            r#"
UPDATE target SET amount = amount + (SELECT amount FROM source S WHERE target.id = S.id)
WHERE id IN (SELECT id FROM source);
INSERT INTO target (id, amount)
SELECT id, amount FROM source S WHERE id NOT IN (SELECT id FROM target);
"#,
            &[],
        )
        .unwrap();

    let read = |session: &mut Session| -> Vec<(i64, i64)> {
        let mut rows = session
            .query("SELECT id, amount FROM target ORDER BY id", &[])
            .unwrap();
        let mut out = Vec::new();
        while let Some(row) = rows.next() {
            out.push((row.get::<i64>(0).unwrap(), row.get::<i64>(1).unwrap()));
        }
        out
    };
    let merged_rows = read(&mut merged);
    assert_eq!(merged_rows, read(&mut manual));
    assert_eq!(merged_rows, vec![(1, 10), (2, 220), (3, 300)]);
}

#[test]
fn file_backed_catalog_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("skiff.db");
    let dsn = path.to_str().unwrap();
    {
        let mut session = Session::open(dsn).unwrap();
        session
            .exec(
                r#"
CREATE TABLE `p.d.events` (name STRING, total NUMERIC);
INSERT `p.d.events` (name, total) VALUES ('a', 1.5), ('b', 2.25);
"#,
                &[],
            )
            .unwrap();
    }
    let mut session = Session::open(dsn).unwrap();
    let mut rows = session
        .query("SELECT name, total FROM `p.d.events` ORDER BY name", &[])
        .unwrap();
    let mut got = Vec::new();
    while let Some(row) = rows.next() {
        got.push((row.get::<String>(0).unwrap(), row.get::<f64>(1).unwrap()));
    }
    assert_eq!(got, vec![("a".to_string(), 1.5), ("b".to_string(), 2.25)]);
}

#[test]
fn cancellation_stops_between_statements() {
    let mut session = open();
    let handle = session.cancel_handle();
    handle.cancel();
    let err = session.exec("SELECT 1", &[]).unwrap_err();
    assert!(matches!(err, Error::Canceled));
}

#[test]
fn safe_prefix_and_null_propagation() {
    let mut session = open();
    let safe: Vec<Value> = scan_rows(&mut session, "SELECT SAFE.SUBSTR('x', 0, -1)");
    assert_eq!(safe, vec![Value::Null]);
    let nulls: Vec<Value> = scan_rows(&mut session, "SELECT UPPER(CAST(NULL AS STRING))");
    assert_eq!(nulls, vec![Value::Null]);
    let division: Vec<Value> = scan_rows(&mut session, "SELECT SAFE_DIVIDE(1, 0)");
    assert_eq!(division, vec![Value::Null]);
    let err = session.query("SELECT 1 / 0", &[]).unwrap_err();
    assert!(matches!(err, Error::DivisionByZero(_)), "got {:?}", err);
}

#[test]
fn named_and_positional_parameters() {
    let mut session = open();
    session
        .exec("CREATE TABLE prefs (name STRING, rank INT64)", &[])
        .unwrap();
    session
        .exec(
            "INSERT prefs (name, rank) VALUES (@name, ?)",
            &[Param::named("name", "alice"), Param::from(1i64)],
        )
        .unwrap();
    let got: Vec<String> = scan_rows(&mut session, "SELECT name FROM prefs WHERE rank = 1");
    assert_eq!(got, vec!["alice".to_string()]);
}

#[test]
fn array_parameter_cast_accepts_empty_markers() {
    let mut session = open();
    for param in [
        Param::named("tags", Value::Null),
        Param::named("tags", Value::from("")),
        Param::named(
            "tags",
            Value::Array(vec![Value::from("a"), Value::from("b")]),
        ),
    ] {
        let mut rows = session
            .query(
                "SELECT ARRAY_LENGTH(CAST(@tags AS ARRAY<STRING>))",
                &[param],
            )
            .unwrap();
        let row = rows.next().unwrap();
        let n = row.get::<i64>(0).unwrap();
        assert!(n == 0 || n == 2);
    }
}
