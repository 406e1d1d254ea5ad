//! # Database Properties
//!
//! A persistent string-to-string map. The map record holds the root pointer
//! of a B-tree whose records are key/value pairs ordered by key:
//!
//! ```text
//! map record:       | index root ptr |
//!                   0                4
//! property record:  | key string ptr | value string ptr |
//!                   0                4                  8
//! ```
//!
//! Setting a key replaces any existing pair; the old strings are freed.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use eyre::Result;
use tracing::debug;

use crate::btree::{for_each, BTree, BTreeComparator, BTreeVisitor};
use crate::config::PTR_SIZE;
use crate::storage::{Database, RecordPtr};
use crate::strings::DbString;

const PROP_INDEX: usize = 0;
/// Size of the map record.
pub const RECORD_SIZE: usize = PTR_SIZE;

const KEY: usize = 0;
const VALUE: usize = 4;
const PROPERTY_SIZE: usize = 2 * PTR_SIZE;

/// Orders property records by their key strings, case-sensitively.
pub struct PropertyKeyComparator<'a> {
    db: &'a Database,
}

impl BTreeComparator for PropertyKeyComparator<'_> {
    fn compare(&self, a: RecordPtr, b: RecordPtr) -> Result<Ordering> {
        let left = property_key(self.db, a)?;
        let right = property_key(self.db, b)?;
        left.compare(&right, true)
    }
}

fn property_key(db: &Database, property: RecordPtr) -> Result<DbString<'_>> {
    db.get_string(db.get_rec_ptr(property.field(KEY))?)
}

fn property_value(db: &Database, property: RecordPtr) -> Result<DbString<'_>> {
    db.get_string(db.get_rec_ptr(property.field(VALUE))?)
}

fn delete_property(db: &Database, property: RecordPtr) -> Result<()> {
    property_key(db, property)?.delete()?;
    property_value(db, property)?.delete()?;
    db.free(property)
}

/// Finds the property record whose key equals `key`.
struct KeySearch<'a, 'k> {
    db: &'a Database,
    key: &'k [u16],
    found: Option<RecordPtr>,
}

impl BTreeVisitor for KeySearch<'_, '_> {
    fn compare(&mut self, record: RecordPtr) -> Result<Ordering> {
        property_key(self.db, record)?.compare_chars(self.key, true)
    }

    fn visit(&mut self, record: RecordPtr) -> Result<bool> {
        self.found = Some(record);
        Ok(false)
    }
}

pub struct DbProperties<'a> {
    db: &'a Database,
    record: RecordPtr,
}

impl<'a> DbProperties<'a> {
    /// Allocates an empty map.
    pub fn create(db: &'a Database) -> Result<Self> {
        let record = db.malloc(RECORD_SIZE)?;
        Ok(Self { db, record })
    }

    /// Opens the map stored at `record`.
    pub fn open(db: &'a Database, record: RecordPtr) -> Self {
        Self { db, record }
    }

    pub fn record(&self) -> RecordPtr {
        self.record
    }

    fn index(&self) -> BTree<'a, PropertyKeyComparator<'a>> {
        BTree::new(
            self.db,
            self.record.field(PROP_INDEX),
            PropertyKeyComparator { db: self.db },
        )
    }

    fn search(&self, key: &str) -> Result<Option<RecordPtr>> {
        let key: Vec<u16> = key.encode_utf16().collect();
        let mut search = KeySearch {
            db: self.db,
            key: &key,
            found: None,
        };
        self.index().accept(&mut search)?;
        Ok(search.found)
    }

    pub fn get_property(&self, key: &str) -> Result<Option<String>> {
        match self.search(key)? {
            Some(property) => Ok(Some(property_value(self.db, property)?.get_string()?)),
            None => Ok(None),
        }
    }

    pub fn get_property_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_property(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// All keys, in sorted order.
    pub fn get_key_set(&self) -> Result<BTreeSet<String>> {
        let mut keys = BTreeSet::new();
        self.index().accept(&mut for_each(|record| {
            keys.insert(property_key(self.db, record)?.get_string()?);
            Ok(true)
        }))?;
        Ok(keys)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set_property(&self, key: &str, value: &str) -> Result<()> {
        self.remove_property(key)?;

        let property = self.db.malloc(PROPERTY_SIZE)?;
        let key_string = self.db.new_string(key)?;
        let value_string = self.db.new_string(value)?;
        self.db.put_rec_ptr(property.field(KEY), key_string.record())?;
        self.db.put_rec_ptr(property.field(VALUE), value_string.record())?;
        self.index().insert(property)?;

        debug!(target: "pdom::db", event = "set_property", map = %self.record, key);
        Ok(())
    }

    /// Returns whether a pair was removed.
    pub fn remove_property(&self, key: &str) -> Result<bool> {
        let Some(property) = self.search(key)? else {
            return Ok(false);
        };
        self.index().delete(property)?;
        delete_property(self.db, property)?;
        debug!(target: "pdom::db", event = "remove_property", map = %self.record, key);
        Ok(true)
    }

    /// Removes every pair and frees the index nodes.
    pub fn clear(&self) -> Result<()> {
        let index = self.index();
        let mut properties = Vec::new();
        index.accept(&mut for_each(|record| {
            properties.push(record);
            Ok(true)
        }))?;
        index.destroy()?;
        for property in properties {
            delete_property(self.db, property)?;
        }
        Ok(())
    }

    /// Clears the map and frees its record.
    pub fn delete(self) -> Result<()> {
        self.clear()?;
        self.db.free(self.record)
    }
}
