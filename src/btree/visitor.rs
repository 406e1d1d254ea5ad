//! # Comparators and Visitors
//!
//! The tree stores record pointers and never looks at record contents; the
//! caller supplies the ordering through a [`BTreeComparator`] and walks the
//! tree with a [`BTreeVisitor`].
//!
//! ## Visitor Protocol
//!
//! `compare(record)` positions a record relative to the range the visitor is
//! interested in:
//!
//! ```text
//! Less     record lies before the range, skip it
//! Equal    record is inside the range, visit it
//! Greater  record lies after the range, stop
//! ```
//!
//! `visit` returns `false` to end the walk early. A visitor that returns
//! `Equal` for everything visits every record in order.

use std::cmp::Ordering;

use eyre::Result;

use crate::storage::RecordPtr;

/// Total order over the records stored in a tree.
pub trait BTreeComparator {
    fn compare(&self, a: RecordPtr, b: RecordPtr) -> Result<Ordering>;
}

impl<F> BTreeComparator for F
where
    F: Fn(RecordPtr, RecordPtr) -> Result<Ordering>,
{
    fn compare(&self, a: RecordPtr, b: RecordPtr) -> Result<Ordering> {
        self(a, b)
    }
}

pub trait BTreeVisitor {
    fn compare(&mut self, record: RecordPtr) -> Result<Ordering>;

    fn visit(&mut self, record: RecordPtr) -> Result<bool>;

    /// Called before the records of `node` are examined.
    fn pre_node(&mut self, _node: RecordPtr) -> Result<()> {
        Ok(())
    }

    /// Called once `node` has been left, also when the walk failed inside it.
    fn post_node(&mut self, _node: RecordPtr) -> Result<()> {
        Ok(())
    }
}

/// Visits every record, handing each to a closure.
///
/// The closure returns `false` to stop.
pub struct ForEach<F>(pub F);

pub fn for_each<F>(f: F) -> ForEach<F>
where
    F: FnMut(RecordPtr) -> Result<bool>,
{
    ForEach(f)
}

impl<F> BTreeVisitor for ForEach<F>
where
    F: FnMut(RecordPtr) -> Result<bool>,
{
    fn compare(&mut self, _record: RecordPtr) -> Result<Ordering> {
        Ok(Ordering::Equal)
    }

    fn visit(&mut self, record: RecordPtr) -> Result<bool> {
        (self.0)(record)
    }
}
