//! # String Storage Tests
//!
//! Round trips through both string layouts and both character encodings,
//! comparison across layouts, and persistence across a reopen.

use std::cmp::Ordering;
use std::sync::Arc;

use pdom::strings::{MAX_BYTE_LENGTH, NUM_CHARS1, NUM_CHARSN};
use pdom::{ChunkCache, Database};
use tempfile::tempdir;

fn open_exclusive(path: &std::path::Path) -> Database {
    let db = Database::open(path, Arc::new(ChunkCache::with_capacity(128))).unwrap();
    db.set_exclusive_lock().unwrap();
    db
}

fn latin1(n: usize) -> Vec<u16> {
    (0..n).map(|i| 0x20 + (i % 0xD0) as u16).collect()
}

fn wide(n: usize) -> Vec<u16> {
    (0..n).map(|i| 0x100 + (i % 0x3000) as u16).collect()
}

mod round_trip {
    use super::*;

    #[test]
    fn every_layout_and_encoding_reproduces_input() {
        let dir = tempdir().unwrap();
        let db = open_exclusive(&dir.path().join("s.pdom"));

        let cases = [
            (latin1(0), false),
            (latin1(17), false),
            (latin1(MAX_BYTE_LENGTH), false),
            (latin1(MAX_BYTE_LENGTH + 1), true),
            (latin1(3 * NUM_CHARSN * 2 + 5), true),
            (wide(3), false),
            (wide(MAX_BYTE_LENGTH / 2), false),
            (wide(MAX_BYTE_LENGTH / 2 + 1), true),
            (wide(NUM_CHARS1 + 2 * NUM_CHARSN + 1), true),
        ];

        for (chars, long) in cases {
            let ptr = {
                let s = db.new_string_utf16(&chars).unwrap();
                assert_eq!(s.is_long(), long, "{} chars", chars.len());
                s.record()
            };
            let loaded = db.get_string(ptr).unwrap();
            assert_eq!(loaded.is_long(), long);
            assert_eq!(loaded.get_chars().unwrap(), chars);
            assert_eq!(loaded.len().unwrap(), chars.len());
        }
    }

    #[test]
    fn tail_exactly_fills_a_record() {
        let dir = tempdir().unwrap();
        let db = open_exclusive(&dir.path().join("s.pdom"));

        let chars = wide(NUM_CHARS1 + NUM_CHARSN);
        let ptr = db.new_string_utf16(&chars).unwrap().record();
        assert_eq!(db.get_string(ptr).unwrap().get_chars().unwrap(), chars);
    }

    #[test]
    fn strings_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.pdom");
        let text = "persisted \u{3b1}\u{3b2}\u{3b3} ".repeat(400);

        let ptr = {
            let db = open_exclusive(&path);
            let ptr = db.new_string(&text).unwrap().record();
            db.close().unwrap();
            ptr
        };

        let db = Database::open(&path, Arc::new(ChunkCache::default())).unwrap();
        assert_eq!(db.get_string(ptr).unwrap().get_string().unwrap(), text);
    }
}

mod comparison {
    use super::*;

    #[test]
    fn separately_stored_long_strings_compare_equal() {
        let dir = tempdir().unwrap();
        let db = open_exclusive(&dir.path().join("s.pdom"));

        let chars = wide(NUM_CHARS1 + 3 * NUM_CHARSN);
        let a = db.new_string_utf16(&chars).unwrap();
        let b = db.new_string_utf16(&chars).unwrap();
        assert_ne!(a.record(), b.record());
        assert_eq!(a.compare(&b, true).unwrap(), Ordering::Equal);
        assert_eq!(a.compare_compatible_with_ignore_case(&b).unwrap(), Ordering::Equal);
        assert!(a.equals(&b).unwrap());
    }

    #[test]
    fn difference_in_last_segment_is_found() {
        let dir = tempdir().unwrap();
        let db = open_exclusive(&dir.path().join("s.pdom"));

        let chars = latin1(10_000);
        let mut bumped = chars.clone();
        *bumped.last_mut().unwrap() += 1;

        let a = db.new_string_utf16(&chars).unwrap();
        let b = db.new_string_utf16(&bumped).unwrap();
        assert_eq!(a.compare(&b, true).unwrap(), Ordering::Less);
        assert_eq!(b.compare(&a, true).unwrap(), Ordering::Greater);
        assert!(!a.equals(&b).unwrap());
    }

    #[test]
    fn short_and_long_order_by_content() {
        let dir = tempdir().unwrap();
        let db = open_exclusive(&dir.path().join("s.pdom"));

        let long = db.new_string(&"b".repeat(6000)).unwrap();
        let short_before = db.new_string("a").unwrap();
        let short_prefix = db.new_string("bbb").unwrap();
        let short_after = db.new_string("c").unwrap();

        assert_eq!(short_before.compare(&long, true).unwrap(), Ordering::Less);
        assert_eq!(short_prefix.compare(&long, true).unwrap(), Ordering::Less);
        assert_eq!(short_after.compare(&long, true).unwrap(), Ordering::Greater);
        assert_eq!(
            long.compare_prefix(&"BBB".encode_utf16().collect::<Vec<_>>(), false)
                .unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn ignore_case_order_is_total_and_compatible() {
        let dir = tempdir().unwrap();
        let db = open_exclusive(&dir.path().join("s.pdom"));

        let words = ["apple", "Apple", "APPLE", "banana", "Banana", "app"];
        let stored: Vec<_> = words.iter().map(|w| db.new_string(w).unwrap()).collect();

        for (i, a) in stored.iter().enumerate() {
            for (j, b) in stored.iter().enumerate() {
                let compat = a.compare_compatible_with_ignore_case(b).unwrap();
                let insensitive = a.compare(b, false).unwrap();
                if insensitive != Ordering::Equal {
                    assert_eq!(compat, insensitive, "{} vs {}", words[i], words[j]);
                }
                assert_eq!(compat == Ordering::Equal, i == j);
            }
        }
    }

    #[test]
    fn hash_code_is_content_based() {
        let dir = tempdir().unwrap();
        let db = open_exclusive(&dir.path().join("s.pdom"));

        let text = "h".repeat(5000);
        let a = db.new_string(&text).unwrap();
        let b = db.new_string(&text).unwrap();
        let c = db.new_string("h").unwrap();
        assert_eq!(a.hash_code().unwrap(), b.hash_code().unwrap());
        assert_ne!(a.hash_code().unwrap(), c.hash_code().unwrap());
    }
}

mod deletion {
    use super::*;

    #[test]
    fn deleting_strings_returns_all_blocks() {
        let dir = tempdir().unwrap();
        let db = open_exclusive(&dir.path().join("s.pdom"));

        let strings: Vec<_> = [
            latin1(5),
            wide(40),
            latin1(9000),
            wide(NUM_CHARS1 + NUM_CHARSN + 77),
        ]
        .iter()
        .map(|c| db.new_string_utf16(c).unwrap())
        .collect();

        for s in strings {
            s.delete().unwrap();
        }
        assert_eq!(db.bytes_allocated(), db.bytes_freed());
    }
}
