//! # External Reference Lists
//!
//! Tracks, per group, the first record of a chain of references that live
//! outside the owning record. Each group with at least one reference has a
//! node in a singly linked list:
//!
//! ```text
//! node:  | next ptr | group id u16 | first ref ptr |
//!        0          4              6               10
//! ```
//!
//! New groups are pushed at the head. Setting a group's first reference to
//! null unlinks and frees its node. The references themselves are chained by
//! the caller; [`ExternalReferencesList::accept_references`] follows them
//! with a caller-supplied successor function.

use eyre::{bail, Result};
use tracing::trace;

use crate::error::DbError;
use crate::storage::{Database, RecordPtr};

const NODE_NEXT: usize = 0;
const NODE_GROUP_ID: usize = 4;
const NODE_REF: usize = 6;
pub const NODE_SIZE: usize = 10;

/// Size of the head slot an owner reserves for the list.
pub const RECORD_SIZE: usize = 4;

pub struct ExternalReferencesList<'a> {
    db: &'a Database,
    head: u64,
}

impl<'a> ExternalReferencesList<'a> {
    pub fn new(db: &'a Database, head: u64) -> Self {
        Self { db, head }
    }

    fn group_id(&self, node: RecordPtr) -> Result<u16> {
        Ok(self.db.get_short(node.field(NODE_GROUP_ID))? as u16)
    }

    fn find_node(&self, group: u16) -> Result<Option<(RecordPtr, RecordPtr)>> {
        let mut prev = RecordPtr::NULL;
        let mut node = self.db.get_rec_ptr(self.head)?;
        while !node.is_null() {
            if self.group_id(node)? == group {
                return Ok(Some((prev, node)));
            }
            prev = node;
            node = self.db.get_rec_ptr(node.field(NODE_NEXT))?;
        }
        Ok(None)
    }

    /// First reference recorded for `group`, or null.
    pub fn first_reference(&self, group: u16) -> Result<RecordPtr> {
        match self.find_node(group)? {
            Some((_, node)) => self.db.get_rec_ptr(node.field(NODE_REF)),
            None => Ok(RecordPtr::NULL),
        }
    }

    /// Records `reference` as the first of `group`. A null reference removes
    /// the group.
    pub fn set_first_reference(&self, group: u16, reference: RecordPtr) -> Result<()> {
        if let Some((prev, node)) = self.find_node(group)? {
            if reference.is_null() {
                let next = self.db.get_rec_ptr(node.field(NODE_NEXT))?;
                if prev.is_null() {
                    self.db.put_rec_ptr(self.head, next)?;
                } else {
                    self.db.put_rec_ptr(prev.field(NODE_NEXT), next)?;
                }
                self.db.free(node)?;
                trace!(target: "pdom::db", event = "drop_reference_group", group);
            } else {
                self.db.put_rec_ptr(node.field(NODE_REF), reference)?;
            }
            return Ok(());
        }

        if reference.is_null() {
            return Ok(());
        }

        let node = self.db.malloc(NODE_SIZE)?;
        self.db
            .put_rec_ptr(node.field(NODE_NEXT), self.db.get_rec_ptr(self.head)?)?;
        self.db.put_short(node.field(NODE_GROUP_ID), group as i16)?;
        self.db.put_rec_ptr(node.field(NODE_REF), reference)?;
        self.db.put_rec_ptr(self.head, node)?;
        Ok(())
    }

    /// Groups and their first references, most recently added group first.
    pub fn groups(&self) -> Result<Vec<(u16, RecordPtr)>> {
        let mut groups = Vec::new();
        let mut node = self.db.get_rec_ptr(self.head)?;
        while !node.is_null() {
            let first = self.db.get_rec_ptr(node.field(NODE_REF))?;
            if first.is_null() {
                bail!(DbError::corrupted(format!(
                    "reference group node {} has no first reference",
                    node
                )));
            }
            groups.push((self.group_id(node)?, first));
            node = self.db.get_rec_ptr(node.field(NODE_NEXT))?;
        }
        Ok(groups)
    }

    /// Visits every reference of every group. `next` returns the reference
    /// following a given one within its group, or null at the end of the
    /// chain; `f` returns false to stop.
    pub fn accept_references<N, F>(&self, mut next: N, mut f: F) -> Result<()>
    where
        N: FnMut(RecordPtr) -> Result<RecordPtr>,
        F: FnMut(u16, RecordPtr) -> Result<bool>,
    {
        for (group, first) in self.groups()? {
            let mut reference = first;
            while !reference.is_null() {
                if !f(group, reference)? {
                    return Ok(());
                }
                reference = next(reference)?;
            }
        }
        Ok(())
    }

    /// Frees every group node. The references are left alone.
    pub fn delete(&self) -> Result<()> {
        let mut node = self.db.get_rec_ptr(self.head)?;
        while !node.is_null() {
            let next = self.db.get_rec_ptr(node.field(NODE_NEXT))?;
            self.db.free(node)?;
            node = next;
        }
        self.db.put_rec_ptr(self.head, RecordPtr::NULL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ChunkCache;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Database) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("x.pdom"), Arc::new(ChunkCache::default())).unwrap();
        db.set_exclusive_lock().unwrap();
        (dir, db)
    }

    #[test]
    fn groups_are_independent() {
        let (_dir, db) = setup();
        let owner = db.malloc(RECORD_SIZE).unwrap();
        let list = ExternalReferencesList::new(&db, owner.offset());
        let (a, b) = (db.malloc(8).unwrap(), db.malloc(8).unwrap());

        list.set_first_reference(1, a).unwrap();
        list.set_first_reference(2, b).unwrap();
        assert_eq!(list.first_reference(1).unwrap(), a);
        assert_eq!(list.first_reference(2).unwrap(), b);
        assert_eq!(list.first_reference(3).unwrap(), RecordPtr::NULL);
        assert_eq!(list.groups().unwrap(), vec![(2, b), (1, a)]);

        list.set_first_reference(1, b).unwrap();
        assert_eq!(list.first_reference(1).unwrap(), b);
    }

    #[test]
    fn null_reference_removes_group() {
        let (_dir, db) = setup();
        let owner = db.malloc(RECORD_SIZE).unwrap();
        let list = ExternalReferencesList::new(&db, owner.offset());
        let r = db.malloc(8).unwrap();
        for group in [1, 2, 3] {
            list.set_first_reference(group, r).unwrap();
        }

        list.set_first_reference(2, RecordPtr::NULL).unwrap();
        list.set_first_reference(3, RecordPtr::NULL).unwrap();
        list.set_first_reference(9, RecordPtr::NULL).unwrap();
        assert_eq!(list.groups().unwrap(), vec![(1, r)]);
    }

    #[test]
    fn accept_follows_reference_chains() {
        let (_dir, db) = setup();
        let owner = db.malloc(RECORD_SIZE).unwrap();
        let list = ExternalReferencesList::new(&db, owner.offset());

        // Each reference record stores the next one at offset 0.
        let refs: Vec<_> = (0..3).map(|_| db.malloc(4).unwrap()).collect();
        db.put_rec_ptr(refs[0].offset(), refs[1]).unwrap();
        list.set_first_reference(7, refs[0]).unwrap();
        list.set_first_reference(8, refs[2]).unwrap();

        let mut seen = Vec::new();
        list.accept_references(
            |r| db.get_rec_ptr(r.offset()),
            |group, r| {
                seen.push((group, r));
                Ok(true)
            },
        )
        .unwrap();
        assert_eq!(seen, vec![(8, refs[2]), (7, refs[0]), (7, refs[1])]);
    }

    #[test]
    fn delete_frees_nodes() {
        let (_dir, db) = setup();
        let owner = db.malloc(RECORD_SIZE).unwrap();
        let list = ExternalReferencesList::new(&db, owner.offset());
        let r = db.malloc(8).unwrap();
        list.set_first_reference(1, r).unwrap();
        list.set_first_reference(2, r).unwrap();

        let freed = db.bytes_freed();
        list.delete().unwrap();
        assert_eq!(db.bytes_freed() - freed, 2 * 16);
        assert!(list.groups().unwrap().is_empty());
    }
}
