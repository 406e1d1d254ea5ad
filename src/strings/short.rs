//! # Short Strings
//!
//! A string whose encoded characters fit in one record.
//!
//! ```text
//! +--------+-------------------------------+
//! | length | characters                    |
//! | i32 BE | 1 byte (length < 0) or 2 each |
//! +--------+-------------------------------+
//! 0        4
//! ```
//!
//! A negative length means every code unit was below 0x100 and is stored as
//! a single byte.

use std::cell::OnceCell;

use eyre::{bail, Result};

use super::compare::SliceCursor;
use crate::config::MAX_MALLOC_SIZE;
use crate::error::DbError;
use crate::storage::{Database, RecordPtr};

pub(crate) const LENGTH: usize = 0;
pub(crate) const CHARS: usize = 4;

/// Largest encoded character payload a short string holds.
pub const MAX_BYTE_LENGTH: usize = MAX_MALLOC_SIZE - CHARS;

pub struct ShortString<'a> {
    db: &'a Database,
    record: RecordPtr,
    chars: OnceCell<Vec<u16>>,
}

impl<'a> ShortString<'a> {
    pub(crate) fn create(db: &'a Database, chars: &[u16], use_bytes: bool) -> Result<Self> {
        let n = chars.len();
        let payload = if use_bytes { n } else { 2 * n };
        debug_assert!(payload <= MAX_BYTE_LENGTH);

        let record = db.malloc(CHARS + payload)?;
        let chunk = db.get_chunk(record.offset())?;
        chunk.put_int(record.field(LENGTH), if use_bytes { -(n as i32) } else { n as i32 });
        if use_bytes {
            chunk.put_chars_as_bytes(record.field(CHARS), chars);
        } else {
            chunk.put_chars(record.field(CHARS), chars);
        }

        Ok(Self {
            db,
            record,
            chars: OnceCell::from(chars.to_vec()),
        })
    }

    pub(crate) fn open(db: &'a Database, record: RecordPtr) -> Self {
        Self {
            db,
            record,
            chars: OnceCell::new(),
        }
    }

    pub fn record(&self) -> RecordPtr {
        self.record
    }

    /// Number of UTF-16 code units.
    pub fn len(&self) -> Result<usize> {
        Ok(self.chars()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The decoded code units, read from the record on first use.
    pub fn chars(&self) -> Result<&[u16]> {
        if let Some(chars) = self.chars.get() {
            return Ok(chars);
        }
        let chars = self.read_chars()?;
        Ok(self.chars.get_or_init(|| chars))
    }

    fn read_chars(&self) -> Result<Vec<u16>> {
        let chunk = self.db.get_chunk(self.record.offset())?;
        let length = chunk.get_int(self.record.field(LENGTH));
        let use_bytes = length < 0;
        let n = length.unsigned_abs() as usize;
        let payload = if use_bytes { n } else { 2 * n };
        if payload > MAX_BYTE_LENGTH {
            bail!(DbError::corrupted(format!(
                "short string {} claims {} bytes of characters",
                self.record, payload
            )));
        }

        let mut chars = vec![0u16; n];
        if use_bytes {
            chunk.get_chars_from_bytes(self.record.field(CHARS), &mut chars);
        } else {
            chunk.get_chars(self.record.field(CHARS), &mut chars);
        }
        Ok(chars)
    }

    pub(crate) fn cursor(&self) -> Result<SliceCursor<'_>> {
        Ok(SliceCursor::new(self.chars()?))
    }

    pub fn delete(self) -> Result<()> {
        self.db.free(self.record)
    }
}
