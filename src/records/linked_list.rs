//! # Membership Lists
//!
//! A circular doubly linked list of record pointers. The list itself is a
//! single head slot inside some owning record; each member lives in its own
//! item record:
//!
//! ```text
//! head slot ──> item ──> item ──> item ─┐
//!               ^ <──────────────────────┘ (prev/next wrap around)
//!
//! item:  | next ptr | prev ptr | element ptr |
//!        0          4          8             12
//! ```
//!
//! Members are appended at the tail, which is the head's `prev`, so walking
//! from the head yields insertion order.

use eyre::{bail, Result};

use crate::error::DbError;
use crate::storage::{Database, RecordPtr};

const NEXT: usize = 0;
const PREV: usize = 4;
const ELEMENT: usize = 8;
pub const ITEM_SIZE: usize = 12;

/// Size of the head slot an owner reserves for a list.
pub const RECORD_SIZE: usize = 4;

pub struct RecordList<'a> {
    db: &'a Database,
    head: u64,
    allows_null: bool,
}

impl<'a> RecordList<'a> {
    /// A list whose head pointer lives at `head`.
    pub fn new(db: &'a Database, head: u64) -> Self {
        Self {
            db,
            head,
            allows_null: false,
        }
    }

    /// A list that also stores null members.
    pub fn allowing_null(db: &'a Database, head: u64) -> Self {
        Self {
            db,
            head,
            allows_null: true,
        }
    }

    pub fn allows_null(&self) -> bool {
        self.allows_null
    }

    fn first_item(&self) -> Result<RecordPtr> {
        self.db.get_rec_ptr(self.head)
    }

    /// Upper bound on the number of items the file can hold.
    fn max_items(&self) -> u64 {
        self.db.database_size() / ITEM_SIZE as u64
    }

    fn cycle_error(&self) -> DbError {
        DbError::corrupted(format!("list at {} contains a cycle", self.head))
    }

    fn next_item(&self, item: RecordPtr) -> Result<RecordPtr> {
        let next = self.db.get_rec_ptr(item.field(NEXT))?;
        if next.is_null() {
            bail!(DbError::corrupted(format!(
                "list item {} has no successor",
                item
            )));
        }
        Ok(next)
    }

    /// Appends `member`.
    pub fn add_member(&self, member: RecordPtr) -> Result<()> {
        if member.is_null() && !self.allows_null {
            bail!("list at {} does not accept null members", self.head);
        }

        let item = self.db.malloc(ITEM_SIZE)?;
        self.db.put_rec_ptr(item.field(ELEMENT), member)?;

        let first = self.first_item()?;
        if first.is_null() {
            self.db.put_rec_ptr(item.field(NEXT), item)?;
            self.db.put_rec_ptr(item.field(PREV), item)?;
            self.db.put_rec_ptr(self.head, item)?;
        } else {
            let last = self.db.get_rec_ptr(first.field(PREV))?;
            self.db.put_rec_ptr(last.field(NEXT), item)?;
            self.db.put_rec_ptr(first.field(PREV), item)?;
            self.db.put_rec_ptr(item.field(PREV), last)?;
            self.db.put_rec_ptr(item.field(NEXT), first)?;
        }
        Ok(())
    }

    /// Hands each member to `f` in insertion order until it returns false.
    pub fn accept<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(RecordPtr) -> Result<bool>,
    {
        let first = self.first_item()?;
        if first.is_null() {
            return Ok(());
        }
        let limit = self.max_items();
        let mut steps = 0;
        let mut item = first;
        loop {
            steps += 1;
            if steps > limit {
                bail!(self.cycle_error());
            }
            let element = self.db.get_rec_ptr(item.field(ELEMENT))?;
            if element.is_null() && !self.allows_null {
                bail!(DbError::corrupted(format!(
                    "list item {} holds a null member",
                    item
                )));
            }
            if !f(element)? {
                return Ok(());
            }
            item = self.next_item(item)?;
            if item == first {
                return Ok(());
            }
        }
    }

    pub fn members(&self) -> Result<Vec<RecordPtr>> {
        let mut members = Vec::new();
        self.accept(|m| {
            members.push(m);
            Ok(true)
        })?;
        Ok(members)
    }

    pub fn len(&self) -> Result<usize> {
        let mut count = 0;
        self.accept(|_| {
            count += 1;
            Ok(true)
        })?;
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.first_item()?.is_null())
    }

    /// The member at `pos`, or `None` past the end.
    pub fn get_at(&self, pos: usize) -> Result<Option<RecordPtr>> {
        let mut index = 0;
        let mut found = None;
        self.accept(|m| {
            if index == pos {
                found = Some(m);
                return Ok(false);
            }
            index += 1;
            Ok(true)
        })?;
        Ok(found)
    }

    /// Frees every item and empties the list. Members are left alone.
    pub fn delete_list_items(&self) -> Result<()> {
        let first = self.first_item()?;
        if first.is_null() {
            return Ok(());
        }
        let limit = self.max_items();
        let mut steps = 0;
        let mut item = first;
        loop {
            steps += 1;
            if steps > limit {
                bail!(self.cycle_error());
            }
            let next = self.next_item(item)?;
            self.db.free(item)?;
            if next == first {
                break;
            }
            item = next;
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
        let db = Database::open(dir.path().join("l.pdom"), Arc::new(ChunkCache::default())).unwrap();
        db.set_exclusive_lock().unwrap();
        (dir, db)
    }

    #[test]
    fn members_come_back_in_insertion_order() {
        let (_dir, db) = setup();
        let owner = db.malloc(RECORD_SIZE).unwrap();
        let list = RecordList::new(&db, owner.offset());
        let members: Vec<_> = (0..5).map(|_| db.malloc(4).unwrap()).collect();
        for m in &members {
            list.add_member(*m).unwrap();
        }

        assert_eq!(list.members().unwrap(), members);
        assert_eq!(list.len().unwrap(), 5);
        assert_eq!(list.get_at(2).unwrap(), Some(members[2]));
        assert_eq!(list.get_at(5).unwrap(), None);
    }

    #[test]
    fn single_item_links_to_itself() {
        let (_dir, db) = setup();
        let owner = db.malloc(RECORD_SIZE).unwrap();
        let list = RecordList::new(&db, owner.offset());
        list.add_member(db.malloc(4).unwrap()).unwrap();

        let item = db.get_rec_ptr(owner.offset()).unwrap();
        assert_eq!(db.get_rec_ptr(item.field(NEXT)).unwrap(), item);
        assert_eq!(db.get_rec_ptr(item.field(PREV)).unwrap(), item);
    }

    #[test]
    fn null_members_need_permission() {
        let (_dir, db) = setup();
        let owner = db.malloc(2 * RECORD_SIZE).unwrap();
        assert!(RecordList::new(&db, owner.offset())
            .add_member(RecordPtr::NULL)
            .is_err());

        let list = RecordList::allowing_null(&db, owner.field(RECORD_SIZE));
        list.add_member(RecordPtr::NULL).unwrap();
        assert_eq!(list.members().unwrap(), vec![RecordPtr::NULL]);
    }

    #[test]
    fn cycle_that_skips_the_head_is_corruption() {
        let (_dir, db) = setup();
        let owner = db.malloc(RECORD_SIZE).unwrap();
        let list = RecordList::new(&db, owner.offset());
        for _ in 0..3 {
            list.add_member(db.malloc(4).unwrap()).unwrap();
        }
        let first = db.get_rec_ptr(owner.offset()).unwrap();
        let second = db.get_rec_ptr(first.field(NEXT)).unwrap();
        let third = db.get_rec_ptr(second.field(NEXT)).unwrap();
        db.put_rec_ptr(third.field(NEXT), second).unwrap();

        let err = list.len().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DbError>(),
            Some(DbError::Corrupted { .. })
        ));
        assert!(list.get_at(1).unwrap().is_some());
    }

    #[test]
    fn delete_list_items_frees_items_only() {
        let (_dir, db) = setup();
        let owner = db.malloc(RECORD_SIZE).unwrap();
        let list = RecordList::new(&db, owner.offset());
        for _ in 0..3 {
            list.add_member(RecordPtr::from_offset(owner.offset())).unwrap();
        }
        let freed_before = db.bytes_freed();
        list.delete_list_items().unwrap();

        assert_eq!(db.bytes_freed() - freed_before, 3 * 16);
        assert!(list.is_empty().unwrap());
    }
}
