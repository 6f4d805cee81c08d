use bencher::{benchmark_group, benchmark_main, Bencher};
use sqlite_connection_core::{Handle, OpenFlags, Registry, Step};

fn setup() -> (Registry, Handle) {
    let db = Registry::builder().capacity(1).build().unwrap();
    let h = db.open(":memory:", OpenFlags::default()).unwrap();
    db.begin(h, "CREATE TABLE t(a INTEGER, b TEXT)").unwrap();
    db.step(h).unwrap();
    db.end(h).unwrap();
    (db, h)
}

fn bench_select_one(b: &mut Bencher) {
    let (db, h) = setup();
    b.iter(|| {
        db.begin(h, "SELECT 1, 'test', 3.14").unwrap();
        assert_eq!(db.step(h).unwrap(), Step::Row);
        let v = db.column_long(h, 0).unwrap();
        db.end(h).unwrap();
        v
    });
}

fn bench_insert_bound(b: &mut Bencher) {
    let (db, h) = setup();
    let mut n = 0i64;
    b.iter(|| {
        db.begin(h, "INSERT INTO t VALUES (?, ?)").unwrap();
        db.bind_long(h, 1, n).unwrap();
        db.bind_text(h, 2, "some text").unwrap();
        db.step(h).unwrap();
        db.end(h).unwrap();
        n += 1;
    });
}

fn bench_read_columns(b: &mut Bencher) {
    let (db, h) = setup();
    b.iter(|| {
        db.begin(h, "SELECT 42, 'forty-two', 42.0").unwrap();
        db.step(h).unwrap();
        let row = (
            db.column_long(h, 0).unwrap(),
            db.column_text(h, 1).unwrap(),
            db.column_double(h, 2).unwrap(),
        );
        db.end(h).unwrap();
        row
    });
}

benchmark_group!(step_benches, bench_select_one, bench_insert_bound, bench_read_columns);
benchmark_main!(step_benches);
