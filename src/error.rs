//! # Database Errors
//!
//! Operations return `eyre::Result`. Failures a caller may want to react to
//! programmatically are raised as [`DbError`] values inside the report, so
//! they can be recovered with `report.downcast_ref::<DbError>()`:
//!
//! ```ignore
//! match db.free(ptr) {
//!     Err(e) if matches!(e.downcast_ref::<DbError>(), Some(DbError::DoubleFree { .. })) => {}
//!     other => other?,
//! }
//! ```
//!
//! Plain I/O failures keep their `std::io::Error` source and are wrapped
//! with context describing the offset or operation that failed.

/// Structured failure kinds raised by the storage layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// A block whose size field is already positive was freed again.
    DoubleFree { offset: u64 },
    /// Growing the file would exceed the addressable range.
    TooLarge { location: String, max: u64 },
    /// The file content is inconsistent with what the caller expects.
    Corrupted { reason: String },
    /// An operation requiring a writable database was attempted on a
    /// read-only one.
    ReadOnly,
}

impl DbError {
    pub fn corrupted(reason: impl Into<String>) -> Self {
        DbError::Corrupted {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::DoubleFree { offset } => {
                write!(f, "block at offset {} is already free", offset)
            }
            DbError::TooLarge { location, max } => write!(
                f,
                "database {} would exceed the maximum size of {} bytes",
                location, max
            ),
            DbError::Corrupted { reason } => write!(f, "corrupted database: {}", reason),
            DbError::ReadOnly => write!(f, "database is opened read-only"),
        }
    }
}

impl std::error::Error for DbError {}

/// Returns true when `report` carries a [`DbError`] matching `pred`.
pub fn is_db_error(report: &eyre::Report, pred: impl FnOnce(&DbError) -> bool) -> bool {
    report.downcast_ref::<DbError>().is_some_and(pred)
}
