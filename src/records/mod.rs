//! # Record Structures
//!
//! Small persistent structures built purely on [`Database`] allocation and
//! the [`BTree`] index:
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`DbProperties`] | string-to-string map backed by a B-tree |
//! | [`RecordList`] | circular doubly linked membership list |
//! | [`ExternalReferencesList`] | per-group first-reference table |
//!
//! All of them are views: they hold a database reference plus the offset of
//! their head record, and creating one (other than `DbProperties::create`)
//! performs no I/O.
//!
//! [`Database`]: crate::storage::Database
//! [`BTree`]: crate::btree::BTree

pub mod external_refs;
pub mod linked_list;
pub mod properties;

pub use external_refs::ExternalReferencesList;
pub use linked_list::RecordList;
pub use properties::{DbProperties, PropertyKeyComparator};
