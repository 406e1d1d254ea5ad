//! B-tree benchmarks for PDOM
//!
//! Records hold a 4-byte key and are compared by reading it back through
//! the chunk cache, so every comparison pays a typed read.
//!
//! - Insert: sequential and shuffled keys
//! - Lookup: range visit of a single key
//! - Full scan through `accept`

use std::cmp::Ordering;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use eyre::Result;
use pdom::btree::for_each;
use pdom::config::DATA_AREA;
use pdom::{BTree, BTreeVisitor, ChunkCache, Database, RecordPtr};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::{tempdir, TempDir};

const ROOT: u64 = DATA_AREA as u64;

fn open_exclusive() -> (TempDir, Database) {
    let dir = tempdir().unwrap();
    let db = Database::open(
        dir.path().join("bench.pdom"),
        Arc::new(ChunkCache::with_capacity(4096)),
    )
    .unwrap();
    db.set_exclusive_lock().unwrap();
    (dir, db)
}

fn by_key(db: &Database) -> impl Fn(RecordPtr, RecordPtr) -> Result<Ordering> + '_ {
    move |a, b| Ok(db.get_int(a.offset())?.cmp(&db.get_int(b.offset())?))
}

fn new_records(db: &Database, keys: &[i32]) -> Vec<RecordPtr> {
    keys.iter()
        .map(|&k| {
            let r = db.malloc(4).unwrap();
            db.put_int(r.offset(), k).unwrap();
            r
        })
        .collect()
}

struct Exact<'a> {
    db: &'a Database,
    key: i32,
    found: Option<RecordPtr>,
}

impl BTreeVisitor for Exact<'_> {
    fn compare(&mut self, record: RecordPtr) -> Result<Ordering> {
        Ok(self.db.get_int(record.offset())?.cmp(&self.key))
    }

    fn visit(&mut self, record: RecordPtr) -> Result<bool> {
        self.found = Some(record);
        Ok(false)
    }
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_insert");

    for count in [1_000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));

        for (name, shuffle) in [("sequential", false), ("random", true)] {
            group.bench_with_input(BenchmarkId::new(name, count), &count, |b, &count| {
                b.iter_with_setup(
                    || {
                        let (dir, db) = open_exclusive();
                        let mut keys: Vec<i32> = (0..count).collect();
                        if shuffle {
                            keys.shuffle(&mut StdRng::seed_from_u64(7));
                        }
                        let records = new_records(&db, &keys);
                        (dir, db, records)
                    },
                    |(dir, db, records)| {
                        {
                            let tree = BTree::new(&db, ROOT, by_key(&db));
                            for r in &records {
                                tree.insert(*r).unwrap();
                            }
                        }
                        (dir, db)
                    },
                );
            });
        }
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_lookup");
    let count = 10_000;

    let (_dir, db) = open_exclusive();
    let keys: Vec<i32> = (0..count).collect();
    let tree = BTree::new(&db, ROOT, by_key(&db));
    for r in new_records(&db, &keys) {
        tree.insert(r).unwrap();
    }

    group.bench_function("point", |b| {
        let mut key = 0;
        b.iter(|| {
            key = (key + 7919) % count;
            let mut search = Exact {
                db: &db,
                key: black_box(key),
                found: None,
            };
            tree.accept(&mut search).unwrap();
            black_box(search.found)
        });
    });

    group.throughput(Throughput::Elements(count as u64));
    group.bench_function("full_scan", |b| {
        b.iter(|| {
            let mut n = 0u32;
            tree.accept(&mut for_each(|_| {
                n += 1;
                Ok(true)
            }))
            .unwrap();
            black_box(n)
        });
    });

    group.finish();
}

fn bench_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_delete");
    let count = 5_000;
    group.throughput(Throughput::Elements(count as u64));

    group.bench_function("all_shuffled", |b| {
        b.iter_with_setup(
            || {
                let (dir, db) = open_exclusive();
                let keys: Vec<i32> = (0..count).collect();
                let mut records = new_records(&db, &keys);
                {
                    let tree = BTree::new(&db, ROOT, by_key(&db));
                    for r in &records {
                        tree.insert(*r).unwrap();
                    }
                }
                records.shuffle(&mut StdRng::seed_from_u64(11));
                (dir, db, records)
            },
            |(dir, db, records)| {
                {
                    let tree = BTree::new(&db, ROOT, by_key(&db));
                    for r in &records {
                        tree.delete(*r).unwrap();
                    }
                }
                (dir, db)
            },
        );
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup, bench_delete);
criterion_main!(benches);
