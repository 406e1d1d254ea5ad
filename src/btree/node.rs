//! # B-Tree Node Handles
//!
//! A node is one allocator block holding the record array followed by the
//! child array:
//!
//! ```text
//! +-------------------------------+  node
//! | record[0] .. record[2t-2]     |  4-byte compressed record pointers
//! +-------------------------------+  node + (2t-1) * 4
//! | child[0]  .. child[2t-1]      |  4-byte compressed node pointers
//! +-------------------------------+  node + (4t-1) * 4
//! ```
//!
//! Records are packed from index 0; the first null record ends the node's
//! keys. A leaf has a null `child[0]`.
//!
//! ## Handles
//!
//! [`Node`] is a short-lived view: the node address, the chunk holding it and
//! the key count observed when the handle was made. The count is not updated
//! by writes through the handle. Two handles may refer to the same node, so
//! the tree re-creates handles after structural changes instead of keeping
//! them across calls.

use std::sync::Arc;

use eyre::Result;

use crate::config::{MIN_BTREE_DEGREE, PTR_SIZE};
use crate::storage::{Chunk, Database, RecordPtr};

/// Node geometry derived from the tree degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    pub degree: usize,
    pub min_records: usize,
    pub max_records: usize,
    pub max_children: usize,
    pub median_record: usize,
    children_offset: usize,
}

impl NodeLayout {
    pub const fn new(degree: usize) -> Self {
        Self {
            degree,
            min_records: degree - 1,
            max_records: 2 * degree - 1,
            max_children: 2 * degree,
            median_record: degree - 1,
            children_offset: (2 * degree - 1) * PTR_SIZE,
        }
    }

    /// Bytes allocated per node.
    pub const fn node_size(&self) -> usize {
        (self.max_records + self.max_children) * PTR_SIZE
    }

    pub const fn is_valid(&self) -> bool {
        self.degree >= MIN_BTREE_DEGREE
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub ptr: RecordPtr,
    pub chunk: Arc<Chunk>,
    pub key_count: usize,
    layout: NodeLayout,
}

impl Node {
    pub fn load(db: &Database, layout: NodeLayout, ptr: RecordPtr) -> Result<Self> {
        let chunk = db.get_chunk(ptr.offset())?;
        let mut key_count = 0;
        while key_count < layout.max_records
            && !chunk.get_rec_ptr(ptr.field(key_count * PTR_SIZE)).is_null()
        {
            key_count += 1;
        }
        Ok(Self {
            ptr,
            chunk,
            key_count,
            layout,
        })
    }

    #[inline]
    pub fn record(&self, index: usize) -> RecordPtr {
        debug_assert!(index < self.layout.max_records);
        self.chunk.get_rec_ptr(self.ptr.field(index * PTR_SIZE))
    }

    #[inline]
    pub fn set_record(&self, index: usize, record: RecordPtr) {
        debug_assert!(index < self.layout.max_records);
        self.chunk
            .put_rec_ptr(self.ptr.field(index * PTR_SIZE), record);
    }

    #[inline]
    pub fn child(&self, index: usize) -> RecordPtr {
        debug_assert!(index < self.layout.max_children);
        self.chunk
            .get_rec_ptr(self.ptr.field(self.layout.children_offset + index * PTR_SIZE))
    }

    #[inline]
    pub fn set_child(&self, index: usize, child: RecordPtr) {
        debug_assert!(index < self.layout.max_children);
        self.chunk.put_rec_ptr(
            self.ptr.field(self.layout.children_offset + index * PTR_SIZE),
            child,
        );
    }

    pub fn is_leaf(&self) -> bool {
        self.child(0).is_null()
    }

    pub fn is_full(&self) -> bool {
        !self.record(self.layout.max_records - 1).is_null()
    }

    /// Loads the child at `index` when it exists.
    pub fn child_node(&self, db: &Database, index: usize) -> Result<Option<Node>> {
        if index >= self.layout.max_children {
            return Ok(None);
        }
        let child = self.child(index);
        if child.is_null() {
            return Ok(None);
        }
        Node::load(db, self.layout, child).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_degree_layout() {
        let layout = NodeLayout::new(8);
        assert_eq!(layout.max_records, 15);
        assert_eq!(layout.max_children, 16);
        assert_eq!(layout.min_records, 7);
        assert_eq!(layout.median_record, 7);
        assert_eq!(layout.node_size(), 124);
    }

    #[test]
    fn degree_two_layout() {
        let layout = NodeLayout::new(2);
        assert_eq!(layout.max_records, 3);
        assert_eq!(layout.node_size(), 28);
        assert_eq!(layout.children_offset, 12);
    }
}
