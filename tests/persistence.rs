//! # Persistence Tests
//!
//! Data written under the exclusive lock must reach the file on flush and
//! read back after reopening. An interrupted session leaves the version
//! field zeroed so the next open can tell the file is incomplete.

use std::cmp::Ordering;
use std::sync::Arc;

use pdom::config::{CHUNK_SIZE, DATA_AREA, DEFAULT_DB_VERSION};
use pdom::{BTree, ChunkCache, Database, DbProperties, RecordPtr};
use tempfile::tempdir;

fn by_offset(a: RecordPtr, b: RecordPtr) -> eyre::Result<Ordering> {
    Ok(a.offset().cmp(&b.offset()))
}

fn open(path: &std::path::Path) -> Database {
    Database::open(path, Arc::new(ChunkCache::with_capacity(32))).unwrap()
}

mod reopen {
    use super::*;

    #[test]
    fn int_written_before_flush_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.pdom");

        let ptr = {
            let db = open(&path);
            db.set_exclusive_lock().unwrap();
            let ptr = db.malloc(10).unwrap();
            db.put_int(ptr.offset(), 42).unwrap();
            db.flush().unwrap();
            ptr
        };

        let db = open(&path);
        assert!(!db.was_incomplete());
        assert_eq!(db.get_int(ptr.offset()).unwrap(), 42);
    }

    #[test]
    fn tree_and_properties_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.pdom");
        let root = DATA_AREA as u64;
        let props_slot = root + 4;

        {
            let db = open(&path);
            db.set_exclusive_lock().unwrap();
            let tree = BTree::new(&db, root, by_offset);
            for _ in 0..500 {
                tree.insert(db.malloc(12).unwrap()).unwrap();
            }
            let props = DbProperties::create(&db).unwrap();
            props.set_property("format", "pdom").unwrap();
            db.put_rec_ptr(props_slot, props.record()).unwrap();
            db.close().unwrap();
        }

        let db = open(&path);
        let tree = BTree::new(&db, root, by_offset);
        assert_eq!(tree.invariants_error_report().unwrap(), "");
        let mut count = 0;
        tree.accept(&mut pdom::btree::for_each(|_| {
            count += 1;
            Ok(true)
        }))
        .unwrap();
        assert_eq!(count, 500);

        let props = DbProperties::open(&db, db.get_rec_ptr(props_slot).unwrap());
        assert_eq!(props.get_property("format").unwrap().as_deref(), Some("pdom"));
    }

    #[test]
    fn data_survives_cache_smaller_than_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.pdom");
        let db = Database::open(&path, Arc::new(ChunkCache::with_capacity(4))).unwrap();
        db.set_exclusive_lock().unwrap();

        let ptrs: Vec<_> = (0..40)
            .map(|i| {
                let p = db.malloc(4000).unwrap();
                db.put_int(p.offset(), i).unwrap();
                p
            })
            .collect();
        db.give_up_exclusive_lock(true).unwrap();

        for (i, p) in ptrs.iter().enumerate() {
            assert_eq!(db.get_int(p.offset()).unwrap(), i as i32);
        }
        assert!(db.cache().len() <= 4);
    }
}

mod completeness {
    use super::*;

    #[test]
    fn unflushed_session_is_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.pdom");

        {
            let db = open(&path);
            db.set_exclusive_lock().unwrap();
            db.malloc(10).unwrap();
            db.flush().unwrap();
            db.malloc(10).unwrap();
            // Releases the lock without a complete flush, then drops.
            db.give_up_exclusive_lock(false).unwrap();
        }

        let db = open(&path);
        assert!(db.was_incomplete());
        assert_eq!(db.version(), 0);
    }

    #[test]
    fn clean_close_is_complete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("e.pdom");
        {
            let db = open(&path);
            db.set_exclusive_lock().unwrap();
            db.malloc(100).unwrap();
            db.close().unwrap();
        }
        let db = open(&path);
        assert!(!db.was_incomplete());
        assert_eq!(db.version(), DEFAULT_DB_VERSION);
    }

    #[test]
    fn clear_truncates_to_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.pdom");
        let db = open(&path);
        db.set_exclusive_lock().unwrap();
        for _ in 0..10 {
            db.malloc(3000).unwrap();
        }
        db.clear(7).unwrap();
        db.flush().unwrap();
        assert_eq!(db.chunk_count(), 1);
        assert_eq!(db.version(), 7);
        drop(db);

        assert_eq!(std::fs::metadata(&path).unwrap().len(), CHUNK_SIZE as u64);
        let db = open(&path);
        assert_eq!(db.version(), 7);
    }

    #[test]
    fn transfer_copies_flushed_file() {
        let dir = tempdir().unwrap();
        let db = open(&dir.path().join("g.pdom"));
        db.set_exclusive_lock().unwrap();
        let p = db.malloc(8).unwrap();
        db.put_long(p.offset(), 0x0102_0304_0506_0708).unwrap();
        db.flush().unwrap();

        let mut out = Vec::new();
        let n = db.transfer_to(&mut out).unwrap();
        assert_eq!(n as usize, out.len());
        let at = p.offset() as usize;
        assert_eq!(&out[at..at + 8], &0x0102_0304_0506_0708i64.to_be_bytes());
    }
}
