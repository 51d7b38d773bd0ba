use criterion::{Criterion, black_box, criterion_group, criterion_main};
use skiffql::{Param, Session};

fn setup() -> Session {
    let mut session = Session::open(":memory:").unwrap();
    session
        .exec(
            "CREATE TABLE bench_rows (id INT64, name STRING, score NUMERIC)",
            &[],
        )
        .unwrap();
    for i in 0..1_000i64 {
        session
            .exec(
                "INSERT bench_rows (id, name, score) VALUES (?, ?, ?)",
                &[
                    Param::from(i),
                    Param::from(format!("row-{}", i)),
                    Param::from(i as f64 / 7.0),
                ],
            )
            .unwrap();
    }
    session
}

fn bench_point_select(c: &mut Criterion) {
    let mut session = setup();
    c.bench_function("point_select", |b| {
        b.iter(|| {
            let rows = session
                .query("SELECT name FROM bench_rows WHERE id = 500", &[])
                .unwrap();
            black_box(rows.remaining());
        })
    });
}

fn bench_aggregate(c: &mut Criterion) {
    let mut session = setup();
    c.bench_function("sum_numeric", |b| {
        b.iter(|| {
            let mut rows = session
                .query("SELECT SUM(score) FROM bench_rows", &[])
                .unwrap();
            black_box(rows.next());
        })
    });
}

fn bench_window(c: &mut Criterion) {
    let mut session = setup();
    c.bench_function("row_number_over", |b| {
        b.iter(|| {
            let rows = session
                .query(
                    "SELECT id, ROW_NUMBER() OVER (ORDER BY id) FROM bench_rows",
                    &[],
                )
                .unwrap();
            black_box(rows.remaining());
        })
    });
}

criterion_group!(benches, bench_point_select, bench_aggregate, bench_window);
criterion_main!(benches);
