//! # B-Tree Operations
//!
//! Insert, delete and ordered visitation over [`super::node`] nodes.
//!
//! ## Insert
//!
//! Single top-down pass with preemptive splitting: every full node met on
//! the way down is split around its median before the descent continues, so
//! the parent of the node being split always has room for the median.
//!
//! ```text
//! before:   parent [ .. a .. ]          node [ x0 x1 M x3 x4 ]   (full)
//! after:    parent [ .. a  M .. ]       node [ x0 x1 ]  new [ x3 x4 ]
//! ```
//!
//! A full root is split into a fresh root holding only the median. Records
//! equal to an existing record under the comparator are not inserted; the
//! existing record is returned instead.
//!
//! ## Delete
//!
//! Single top-down pass guaranteeing that every node entered below the root
//! has more than the minimum number of keys, so removing from a leaf never
//! underflows:
//!
//! ```text
//! case 1     leaf holding the key           remove in place
//! case 2a    inner node holding the key     replace with successor
//! case 2b                                   replace with predecessor
//! case 2c                                   merge both children around the key
//! case 3a    key below a minimal child      borrow from right, else left sibling
//! case 3b                                   merge with a sibling
//! ```
//!
//! The key is found in a node by pointer identity; the subtree to descend
//! into is picked with the comparator. A key that is not in the tree is
//! reported internally and turned into a no-op.
//!
//! When a merge pulls the last key out of the root, the merged child becomes
//! the root and the old root block is freed.

use std::cmp::Ordering;

use eyre::{bail, ensure, Result};
use tracing::trace;

use super::node::{Node, NodeLayout};
use super::visitor::{BTreeComparator, BTreeVisitor};
use crate::config::{DEFAULT_BTREE_DEGREE, MAX_MALLOC_SIZE, MIN_BTREE_DEGREE};
use crate::error::DbError;
use crate::storage::{Database, RecordPtr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeleteMode {
    Normal,
    Minimum,
    Maximum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deleted {
    Removed(RecordPtr),
    KeyNotFound,
}

/// Ordered index of record pointers whose root pointer lives at a fixed
/// offset in the database.
pub struct BTree<'a, C> {
    db: &'a Database,
    root_pointer: u64,
    layout: NodeLayout,
    cmp: C,
}

impl<'a, C: BTreeComparator> BTree<'a, C> {
    pub fn new(db: &'a Database, root_pointer: u64, cmp: C) -> Self {
        Self {
            db,
            root_pointer,
            layout: NodeLayout::new(DEFAULT_BTREE_DEGREE),
            cmp,
        }
    }

    pub fn with_degree(db: &'a Database, root_pointer: u64, degree: usize, cmp: C) -> Result<Self> {
        ensure!(
            degree >= MIN_BTREE_DEGREE,
            "b-tree degree must be at least {}, got {}",
            MIN_BTREE_DEGREE,
            degree
        );
        let layout = NodeLayout::new(degree);
        ensure!(
            layout.node_size() <= MAX_MALLOC_SIZE,
            "b-tree degree {} needs {} byte nodes, larger than a block",
            degree,
            layout.node_size()
        );
        Ok(Self {
            db,
            root_pointer,
            layout,
            cmp,
        })
    }

    pub fn degree(&self) -> usize {
        self.layout.degree
    }

    pub fn layout(&self) -> NodeLayout {
        self.layout
    }

    pub fn database(&self) -> &'a Database {
        self.db
    }

    pub fn comparator(&self) -> &C {
        &self.cmp
    }

    pub fn root(&self) -> Result<RecordPtr> {
        self.db.get_rec_ptr(self.root_pointer)
    }

    /// True when the tree holds no records. Deleting the last record keeps
    /// an empty root node allocated.
    pub fn is_empty(&self) -> Result<bool> {
        let root = self.root()?;
        if root.is_null() {
            return Ok(true);
        }
        Ok(self.load(root)?.key_count == 0)
    }

    fn set_root(&self, root: RecordPtr) -> Result<()> {
        self.db.put_rec_ptr(self.root_pointer, root)
    }

    fn allocate_node(&self) -> Result<Node> {
        let ptr = self.db.malloc(self.layout.node_size())?;
        Node::load(self.db, self.layout, ptr)
    }

    pub(super) fn load(&self, ptr: RecordPtr) -> Result<Node> {
        Node::load(self.db, self.layout, ptr)
    }

    /// Inserts `record` and returns it, or returns the record already stored
    /// that compares equal to it.
    pub fn insert(&self, record: RecordPtr) -> Result<RecordPtr> {
        ensure!(!record.is_null(), "cannot insert a null record");
        let root = self.root()?;
        if root.is_null() {
            let node = self.allocate_node()?;
            self.set_root(node.ptr)?;
            node.set_record(0, record);
            trace!(target: "pdom::btree", event = "first_insert", root = %node.ptr);
            return Ok(record);
        }

        let mut parent: Option<(Node, usize)> = None;
        let mut node = self.load(root)?;
        loop {
            if node.is_full() {
                let median = node.record(self.layout.median_record);
                if self.cmp.compare(median, record)? == Ordering::Equal {
                    return Ok(median);
                }
                let new_node = self.split(&node, median, parent.as_ref())?;
                if self.cmp.compare(median, record)? == Ordering::Less {
                    node = self.load(new_node)?;
                } else {
                    node = self.load(node.ptr)?;
                }
            }

            let mut lower = 0;
            let mut upper = self.layout.max_records - 1;
            while lower < upper && node.record(upper - 1).is_null() {
                upper -= 1;
            }
            while lower < upper {
                let middle = (lower + upper) / 2;
                let check = node.record(middle);
                if check.is_null() {
                    upper = middle;
                    continue;
                }
                match self.cmp.compare(check, record)? {
                    Ordering::Greater => upper = middle,
                    Ordering::Less => lower = middle + 1,
                    Ordering::Equal => return Ok(check),
                }
            }

            let i = lower;
            let child = node.child(i);
            if child.is_null() {
                for j in (i..self.layout.max_records - 1).rev() {
                    let r = node.record(j);
                    if !r.is_null() {
                        node.set_record(j + 1, r);
                    }
                }
                node.set_record(i, record);
                return Ok(record);
            }

            let next = self.load(child)?;
            parent = Some((node, i));
            node = next;
        }
    }

    /// Splits the full `node` around `median`, moving the upper half into a
    /// new node and the median into the parent (or a new root).
    fn split(&self, node: &Node, median: RecordPtr, parent: Option<&(Node, usize)>) -> Result<RecordPtr> {
        let m = self.layout.median_record;
        let max = self.layout.max_records;
        let new_node = self.allocate_node()?;
        for i in 0..m {
            new_node.set_record(i, node.record(m + 1 + i));
            node.set_record(m + 1 + i, RecordPtr::NULL);
            new_node.set_child(i, node.child(m + 1 + i));
            node.set_child(m + 1 + i, RecordPtr::NULL);
        }
        new_node.set_child(m, node.child(max));
        node.set_child(max, RecordPtr::NULL);

        match parent {
            Some((parent, index)) => {
                let index = *index;
                for i in (index..max - 1).rev() {
                    let r = parent.record(i);
                    if !r.is_null() {
                        parent.set_record(i + 1, r);
                        parent.set_child(i + 2, parent.child(i + 1));
                    }
                }
                parent.set_record(index, median);
                parent.set_child(index + 1, new_node.ptr);
            }
            None => {
                let root = self.allocate_node()?;
                self.set_root(root.ptr)?;
                root.set_child(0, node.ptr);
                root.set_record(0, median);
                root.set_child(1, new_node.ptr);
                trace!(target: "pdom::btree", event = "new_root", root = %root.ptr);
            }
        }
        node.set_record(m, RecordPtr::NULL);
        Ok(new_node.ptr)
    }

    /// Removes `record` from the tree. Removing a record that is not stored
    /// (by pointer identity) leaves the key set unchanged.
    pub fn delete(&self, record: RecordPtr) -> Result<()> {
        let root = self.root()?;
        if root.is_null() || record.is_null() {
            return Ok(());
        }
        if self.delete_imp(record, root, DeleteMode::Normal)? == Deleted::KeyNotFound {
            trace!(target: "pdom::btree", event = "delete_not_found", record = %record);
        }
        Ok(())
    }

    fn delete_imp(&self, key: RecordPtr, node_ptr: RecordPtr, mode: DeleteMode) -> Result<Deleted> {
        let node = self.load(node_ptr)?;

        let key_index = if mode == DeleteMode::Normal {
            (0..node.key_count).find(|&i| node.record(i) == key)
        } else {
            None
        };

        if node.is_leaf() {
            // Case 1
            return Ok(match (key_index, mode) {
                (Some(index), _) => {
                    self.node_content_delete(&node, index, 1);
                    Deleted::Removed(key)
                }
                (None, DeleteMode::Minimum) if node.key_count > 0 => {
                    let subst = node.record(0);
                    self.node_content_delete(&node, 0, 1);
                    Deleted::Removed(subst)
                }
                (None, DeleteMode::Maximum) if node.key_count > 0 => {
                    let subst = node.record(node.key_count - 1);
                    self.node_content_delete(&node, node.key_count - 1, 1);
                    Deleted::Removed(subst)
                }
                _ => Deleted::KeyNotFound,
            });
        }

        if let Some(index) = key_index {
            // Case 2: inner node holding the key
            if let Some(succ) = node.child_node(self.db, index + 1)? {
                if succ.key_count > self.layout.min_records {
                    // 2a
                    return Ok(match self.delete_imp(RecordPtr::NULL, succ.ptr, DeleteMode::Minimum)? {
                        Deleted::Removed(subst) => {
                            node.set_record(index, subst);
                            Deleted::Removed(key)
                        }
                        Deleted::KeyNotFound => Deleted::KeyNotFound,
                    });
                }
            }

            let pred = node.child_node(self.db, index)?;
            if let Some(pred) = &pred {
                if pred.key_count > self.layout.min_records {
                    // 2b
                    return Ok(match self.delete_imp(RecordPtr::NULL, pred.ptr, DeleteMode::Maximum)? {
                        Deleted::Removed(subst) => {
                            node.set_record(index, subst);
                            Deleted::Removed(key)
                        }
                        Deleted::KeyNotFound => Deleted::KeyNotFound,
                    });
                }
            }

            // 2c
            let succ = node.child_node(self.db, index + 1)?;
            return match (pred, succ) {
                (Some(pred), Some(succ)) => {
                    self.merge_nodes(&succ, &node, index, &pred)?;
                    self.delete_imp(key, pred.ptr, mode)
                }
                _ => Ok(Deleted::Removed(key)),
            };
        }

        // Case 3: inner node not holding the key
        let subtree = match mode {
            DeleteMode::Normal => {
                let mut subtree = node.key_count;
                for i in 0..node.key_count {
                    if self.cmp.compare(node.record(i), key)? == Ordering::Greater {
                        subtree = i;
                        break;
                    }
                }
                subtree
            }
            DeleteMode::Minimum => 0,
            DeleteMode::Maximum => node.key_count,
        };

        let Some(child) = node.child_node(self.db, subtree)? else {
            bail!(DbError::corrupted(format!(
                "b-tree node {} has no child {}",
                node.ptr, subtree
            )));
        };

        if child.key_count > self.layout.min_records {
            return self.delete_imp(key, child.ptr, mode);
        }

        let sib_right = node.child_node(self.db, subtree + 1)?;
        if let Some(sib_r) = &sib_right {
            if sib_r.key_count > self.layout.min_records {
                // 3a(i): rotate the separator down into child, sibling's first key up
                let right_key = node.record(subtree);
                let leftmost = sib_r.record(0);
                self.append(&child, right_key, sib_r.child(0));
                self.node_content_delete(sib_r, 0, 1);
                node.set_record(subtree, leftmost);
                return self.delete_imp(key, child.ptr, mode);
            }
        }

        let sib_left = match subtree.checked_sub(1) {
            Some(i) => node.child_node(self.db, i)?,
            None => None,
        };
        if let Some(sib_l) = &sib_left {
            if sib_l.key_count > self.layout.min_records {
                // 3a(ii)
                let left_key = node.record(subtree - 1);
                self.prepend(&child, left_key, sib_l.child(sib_l.key_count));
                let rightmost = sib_l.record(sib_l.key_count - 1);
                sib_l.set_record(sib_l.key_count - 1, RecordPtr::NULL);
                sib_l.set_child(sib_l.key_count, RecordPtr::NULL);
                node.set_record(subtree - 1, rightmost);
                return self.delete_imp(key, child.ptr, mode);
            }
        }

        // 3b
        if let Some(sib_l) = sib_left {
            self.merge_nodes(&child, &node, subtree - 1, &sib_l)?;
            return self.delete_imp(key, sib_l.ptr, mode);
        }
        if let Some(sib_r) = sib_right {
            self.merge_nodes(&sib_r, &node, subtree, &child)?;
            return self.delete_imp(key, child.ptr, mode);
        }

        Ok(Deleted::KeyNotFound)
    }

    /// Moves `src` and the separator at `k_index` of `key_provider` to the
    /// end of `dst`, then frees `src`.
    fn merge_nodes(&self, src: &Node, key_provider: &Node, k_index: usize, dst: &Node) -> Result<()> {
        self.node_content_copy(src, 0, dst, dst.key_count + 1, src.key_count + 1);
        let mid_key = key_provider.record(k_index);
        dst.set_record(dst.key_count, mid_key);
        let key_succ = if k_index + 1 == self.layout.max_records {
            RecordPtr::NULL
        } else {
            key_provider.record(k_index + 1)
        };
        self.db.free(src.ptr)?;
        self.node_content_delete(key_provider, k_index + 1, 1);
        key_provider.set_record(k_index, key_succ);

        if k_index == 0 && key_succ.is_null() {
            // The root may run out of keys; its only child takes over.
            let root = self.root()?;
            if root == key_provider.ptr {
                self.set_root(dst.ptr)?;
                self.db.free(root)?;
                trace!(target: "pdom::btree", event = "root_collapse", root = %dst.ptr);
            }
        }
        Ok(())
    }

    fn append(&self, node: &Node, key: RecordPtr, child: RecordPtr) {
        node.set_record(node.key_count, key);
        node.set_child(node.key_count + 1, child);
    }

    fn prepend(&self, node: &Node, key: RecordPtr, child: RecordPtr) {
        self.node_content_copy(node, 0, node, 1, node.key_count + 1);
        node.set_record(0, key);
        node.set_child(0, child);
    }

    /// Copies `length` (child, key) pairs. The child past the last key is
    /// copied as if followed by a null key. Copies back to front so
    /// overlapping ranges within one node are safe.
    fn node_content_copy(&self, src: &Node, src_pos: usize, dst: &Node, dst_pos: usize, length: usize) {
        for i in (0..length).rev() {
            let src_index = src_pos + i;
            let dst_index = dst_pos + i;
            if src_index < src.key_count + 1 {
                dst.set_child(dst_index, src.child(src_index));
                if src_index < src.key_count {
                    dst.set_record(dst_index, src.record(src_index));
                }
            }
        }
    }

    /// Removes `length` (key, child) pairs starting at `index`, shifting the
    /// rest of the node left.
    fn node_content_delete(&self, node: &Node, index: usize, length: usize) {
        for i in index..=self.layout.max_records {
            let new_key = if i + length < node.key_count {
                node.record(i + length)
            } else {
                RecordPtr::NULL
            };
            let new_child = if i + length < node.key_count + 1 {
                node.child(i + length)
            } else {
                RecordPtr::NULL
            };
            if i < self.layout.max_records {
                node.set_record(i, new_key);
            }
            if i < self.layout.max_children {
                node.set_child(i, new_child);
            }
        }
    }

    /// Walks the records the visitor selects, in order.
    pub fn accept<V: BTreeVisitor + ?Sized>(&self, visitor: &mut V) -> Result<()> {
        let root = self.root()?;
        self.accept_node(root, visitor)?;
        Ok(())
    }

    fn accept_node<V: BTreeVisitor + ?Sized>(&self, node: RecordPtr, visitor: &mut V) -> Result<bool> {
        if node.is_null() {
            return Ok(true);
        }
        visitor.pre_node(node)?;
        let result = self.accept_records(node, visitor);
        let post = visitor.post_node(node);
        let keep_going = result?;
        post?;
        Ok(keep_going)
    }

    fn accept_records<V: BTreeVisitor + ?Sized>(&self, ptr: RecordPtr, visitor: &mut V) -> Result<bool> {
        let node = self.load(ptr)?;
        let max = self.layout.max_records;

        // Binary search for the first record not before the range.
        let mut lower = 0;
        let mut upper = max - 1;
        while lower < upper && node.record(upper - 1).is_null() {
            upper -= 1;
        }
        while lower < upper {
            let middle = (lower + upper) / 2;
            let check = node.record(middle);
            if check.is_null() {
                upper = middle;
            } else if visitor.compare(check)? != Ordering::Less {
                upper = middle;
            } else {
                lower = middle + 1;
            }
        }

        let mut i = lower;
        while i < max {
            let record = node.record(i);
            if record.is_null() {
                break;
            }
            match visitor.compare(record)? {
                Ordering::Greater => return self.accept_node(node.child(i), visitor),
                Ordering::Equal => {
                    if !self.accept_node(node.child(i), visitor)? {
                        return Ok(false);
                    }
                    if !visitor.visit(record)? {
                        return Ok(false);
                    }
                }
                Ordering::Less => {}
            }
            i += 1;
        }
        self.accept_node(node.child(i), visitor)
    }

    /// Frees every node. Records referenced by the tree are left alone.
    pub fn destroy(&self) -> Result<()> {
        let root = self.root()?;
        if !root.is_null() {
            self.destroy_node(root)?;
            self.set_root(RecordPtr::NULL)?;
        }
        Ok(())
    }

    fn destroy_node(&self, ptr: RecordPtr) -> Result<()> {
        let node = self.load(ptr)?;
        if !node.is_leaf() {
            for i in 0..=node.key_count {
                let child = node.child(i);
                if !child.is_null() {
                    self.destroy_node(child)?;
                }
            }
        }
        self.db.free(ptr)
    }
}
