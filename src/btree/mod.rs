//! # B-Tree Index Implementation
//!
//! This module implements a classic B-tree over record pointers. The tree
//! never interprets records: ordering comes from a caller-supplied
//! [`BTreeComparator`], lookups and scans from a [`BTreeVisitor`].
//!
//! ## Architecture Overview
//!
//! A tree is identified by the database offset of its root pointer, usually
//! a slot in the caller's data area of chunk 0 or a field of another record.
//! [`BTree`] is a cheap, borrowed view: creating one does not touch the file.
//!
//! ```text
//! root pointer ──> [ r3 | r7 ]
//!                 /     |     \
//!      [ r1 | r2 ] [ r4 | r5 | r6 ] [ r8 | r9 ]
//! ```
//!
//! ## Degree
//!
//! With degree `t`, every node except the root holds between `t-1` and
//! `2t-1` records and inner nodes have one more child than records. The
//! default degree is 8, giving 124-byte nodes.
//!
//! ## Duplicates
//!
//! Records comparing equal are never stored twice: `insert` returns the
//! record already present. Deletion, by contrast, matches by pointer
//! identity; deleting an equal but distinct record leaves the tree's
//! contents unchanged.
//!
//! ## Usage Example
//!
//! ```ignore
//! let by_value = |a: RecordPtr, b: RecordPtr| -> Result<Ordering> {
//!     Ok(db.get_int(a.offset())?.cmp(&db.get_int(b.offset())?))
//! };
//! let tree = BTree::new(&db, ROOT_SLOT, by_value);
//! tree.insert(record)?;
//! tree.accept(&mut for_each(|r| { println!("{}", r); Ok(true) }))?;
//! ```
//!
//! ## Thread Safety
//!
//! Mutations require the database's exclusive lock. Visitation only reads
//! and may run concurrently with other readers.

mod checker;
mod node;
mod tree;
mod visitor;

pub use checker::IntegrityViolation;
pub use node::NodeLayout;
pub use tree::BTree;
pub use visitor::{for_each, BTreeComparator, BTreeVisitor, ForEach};
