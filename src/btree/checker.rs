//! # Invariant Checker
//!
//! Walks a whole tree and reports structural defects. Used by tests and
//! diagnostics, never during normal operation.
//!
//! Checked per node:
//!
//! - Keys are packed from index 0 and end at the first null slot
//! - A node has either no children or exactly one more child than keys
//! - Non-root nodes hold between `t-1` and `2t-1` keys
//! - All leaves below the root sit at the same depth
//!
//! and across the whole tree, that an in-order walk sees strictly increasing
//! records under the tree's comparator.

use std::cmp::Ordering;
use std::fmt;

use eyre::Result;
use smallvec::SmallVec;

use super::tree::BTree;
use super::visitor::{BTreeComparator, BTreeVisitor};
use crate::storage::RecordPtr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityViolation {
    BlanksInconsistent {
        node: RecordPtr,
        first_blank: usize,
        last_non_blank: usize,
    },
    ChildCountMismatch {
        node: RecordPtr,
        keys: usize,
        children: usize,
    },
    KeyCountOutOfRange {
        node: RecordPtr,
        keys: usize,
    },
    LeafDepthMismatch {
        node: RecordPtr,
        depth: usize,
        expected: usize,
    },
    OutOfOrder {
        previous: RecordPtr,
        record: RecordPtr,
    },
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityViolation::BlanksInconsistent {
                node,
                first_blank,
                last_non_blank,
            } => write!(
                f,
                "[{} blanks inconsistent b={} nb={}]",
                node, first_blank, last_non_blank
            ),
            IntegrityViolation::ChildCountMismatch {
                node,
                keys,
                children,
            } => write!(
                f,
                "[{} wrong number of children with respect to key count: {} keys, {} children]",
                node, keys, children
            ),
            IntegrityViolation::KeyCountOutOfRange { node, keys } => {
                write!(f, "[{} key count out of range: {}]", node, keys)
            }
            IntegrityViolation::LeafDepthMismatch {
                node,
                depth,
                expected,
            } => write!(
                f,
                "[{} leaf at depth {}, other leaves at depth {}]",
                node, depth, expected
            ),
            IntegrityViolation::OutOfOrder { previous, record } => {
                write!(f, "[{} not ordered after {}]", record, previous)
            }
        }
    }
}

struct InvariantsChecker<'t, 'a, C> {
    tree: &'t BTree<'a, C>,
    root: RecordPtr,
    leaf_depth: Option<usize>,
    previous: Option<RecordPtr>,
    path: SmallVec<[RecordPtr; 16]>,
    violations: Vec<IntegrityViolation>,
}

impl<C: BTreeComparator> BTreeVisitor for InvariantsChecker<'_, '_, C> {
    fn compare(&mut self, _record: RecordPtr) -> Result<Ordering> {
        Ok(Ordering::Equal)
    }

    fn visit(&mut self, record: RecordPtr) -> Result<bool> {
        if let Some(previous) = self.previous {
            if self.tree.comparator().compare(previous, record)? != Ordering::Less {
                self.violations
                    .push(IntegrityViolation::OutOfOrder { previous, record });
            }
        }
        self.previous = Some(record);
        Ok(true)
    }

    fn pre_node(&mut self, ptr: RecordPtr) -> Result<()> {
        self.path.push(ptr);

        let layout = self.tree.layout();
        let node = self.tree.load(ptr)?;

        let mut keys = 0;
        let mut first_blank = layout.max_records;
        let mut last_non_blank = 0;
        for i in 0..layout.max_records {
            if !node.record(i).is_null() {
                keys += 1;
                last_non_blank = i;
            } else if first_blank == layout.max_records {
                first_blank = i;
            }
        }
        let children = (0..layout.max_children)
            .filter(|&i| !node.child(i).is_null())
            .count();

        if first_blank != last_non_blank + 1 {
            let full = first_blank == layout.max_records && last_non_blank == layout.max_records - 1;
            let empty = first_blank == 0 && last_non_blank == 0;
            if !full && !empty {
                self.violations.push(IntegrityViolation::BlanksInconsistent {
                    node: ptr,
                    first_blank,
                    last_non_blank,
                });
            }
        }

        if children != 0 && children != keys + 1 {
            self.violations.push(IntegrityViolation::ChildCountMismatch {
                node: ptr,
                keys,
                children,
            });
        }

        if ptr == self.root {
            return Ok(());
        }

        if keys < layout.min_records || keys > layout.max_records {
            self.violations
                .push(IntegrityViolation::KeyCountOutOfRange { node: ptr, keys });
        }

        if children == 0 {
            let depth = self.path.len();
            let expected = *self.leaf_depth.get_or_insert(depth);
            if depth != expected {
                self.violations.push(IntegrityViolation::LeafDepthMismatch {
                    node: ptr,
                    depth,
                    expected,
                });
            }
        }
        Ok(())
    }

    fn post_node(&mut self, ptr: RecordPtr) -> Result<()> {
        debug_assert_eq!(self.path.last(), Some(&ptr));
        self.path.pop();
        Ok(())
    }
}

impl<C: BTreeComparator> BTree<'_, C> {
    /// Walks the whole tree and returns every violated invariant.
    pub fn check_invariants(&self) -> Result<Vec<IntegrityViolation>> {
        let mut checker = InvariantsChecker {
            tree: self,
            root: self.root()?,
            leaf_depth: None,
            previous: None,
            path: SmallVec::new(),
            violations: Vec::new(),
        };
        self.accept(&mut checker)?;
        Ok(checker.violations)
    }

    /// Human-readable form of [`Self::check_invariants`]; empty when the
    /// tree is sound.
    pub fn invariants_error_report(&self) -> Result<String> {
        Ok(self
            .check_invariants()?
            .iter()
            .map(ToString::to_string)
            .collect())
    }
}
