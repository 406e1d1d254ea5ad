//! # Long Strings
//!
//! Strings too large for one record are split across a chain of maximum-size
//! records. The first record repeats the short-string length field so a
//! reader can tell the two kinds apart from the first four bytes alone.
//!
//! ```text
//! first:  | length i32 | next ptr | chars ...          |
//!         0            4          8
//! others: | next ptr   | chars ...                      |
//!         0            4
//! ```
//!
//! Every record but the last is full. The last one is sized to the
//! characters that remain and its `next` pointer is null.

use eyre::{bail, Result};

use super::compare::CharCursor;
use super::short::MAX_BYTE_LENGTH;
use crate::config::MAX_MALLOC_SIZE;
use crate::error::DbError;
use crate::storage::{Database, RecordPtr};

const LENGTH: usize = 0;
const NEXT1: usize = 4;
const CHARS1: usize = 8;
const NEXTN: usize = 0;
const CHARSN: usize = 4;

/// Two-byte characters held by the first record.
pub const NUM_CHARS1: usize = (MAX_MALLOC_SIZE - CHARS1) / 2;

/// Two-byte characters held by each following record.
pub const NUM_CHARSN: usize = (MAX_MALLOC_SIZE - CHARSN) / 2;

fn capacities(use_bytes: bool) -> (usize, usize) {
    if use_bytes {
        (NUM_CHARS1 * 2, NUM_CHARSN * 2)
    } else {
        (NUM_CHARS1, NUM_CHARSN)
    }
}

fn put_segment(db: &Database, at: u64, chars: &[u16], use_bytes: bool) -> Result<()> {
    let chunk = db.get_chunk(at)?;
    if use_bytes {
        chunk.put_chars_as_bytes(at, chars);
    } else {
        chunk.put_chars(at, chars);
    }
    Ok(())
}

pub struct LongString<'a> {
    db: &'a Database,
    record: RecordPtr,
}

impl<'a> LongString<'a> {
    pub(crate) fn create(db: &'a Database, chars: &[u16], use_bytes: bool) -> Result<Self> {
        let (num_chars1, num_charsn) = capacities(use_bytes);
        let length = chars.len();
        debug_assert!(length > num_chars1);

        let record = db.malloc(MAX_MALLOC_SIZE)?;
        db.put_int(
            record.field(LENGTH),
            if use_bytes { -(length as i32) } else { length as i32 },
        )?;
        put_segment(db, record.field(CHARS1), &chars[..num_chars1], use_bytes)?;

        let mut last_next = record.field(NEXT1);
        let mut start = num_chars1;
        while length - start > num_charsn {
            let next = db.malloc(MAX_MALLOC_SIZE)?;
            db.put_rec_ptr(last_next, next)?;
            put_segment(db, next.field(CHARSN), &chars[start..start + num_charsn], use_bytes)?;
            start += num_charsn;
            last_next = next.field(NEXTN);
        }

        let remaining = length - start;
        let tail = db.malloc(CHARSN + if use_bytes { remaining } else { remaining * 2 })?;
        db.put_rec_ptr(last_next, tail)?;
        put_segment(db, tail.field(CHARSN), &chars[start..], use_bytes)?;

        Ok(Self { db, record })
    }

    pub(crate) fn open(db: &'a Database, record: RecordPtr) -> Self {
        Self { db, record }
    }

    pub fn record(&self) -> RecordPtr {
        self.record
    }

    fn header(&self) -> Result<(usize, bool)> {
        let length = self.db.get_int(self.record.field(LENGTH))?;
        let use_bytes = length < 0;
        let n = length.unsigned_abs() as usize;
        let byte_len = if use_bytes { n } else { 2 * n };
        if byte_len <= MAX_BYTE_LENGTH {
            bail!(DbError::corrupted(format!(
                "long string {} has short length {}",
                self.record, length
            )));
        }
        Ok((n, use_bytes))
    }

    /// Number of UTF-16 code units.
    pub fn len(&self) -> Result<usize> {
        Ok(self.header()?.0)
    }

    pub fn chars(&self) -> Result<Vec<u16>> {
        let mut cursor = self.cursor()?;
        let mut out = Vec::with_capacity(cursor.remaining);
        while cursor.fill()? {
            out.extend_from_slice(&cursor.segment);
            cursor.segment.clear();
        }
        Ok(out)
    }

    pub(crate) fn cursor(&self) -> Result<ChainCursor<'a>> {
        let (length, use_bytes) = self.header()?;
        Ok(ChainCursor {
            db: self.db,
            next: self.record,
            first: true,
            use_bytes,
            remaining: length,
            segment: Vec::new(),
            pos: 0,
        })
    }

    /// Frees every record of the chain.
    pub fn delete(self) -> Result<()> {
        let mut next = self.db.get_rec_ptr(self.record.field(NEXT1))?;
        self.db.free(self.record)?;
        while !next.is_null() {
            let following = self.db.get_rec_ptr(next.field(NEXTN))?;
            self.db.free(next)?;
            next = following;
        }
        Ok(())
    }
}

/// Streams the characters of a chain one record at a time.
pub(crate) struct ChainCursor<'a> {
    db: &'a Database,
    next: RecordPtr,
    first: bool,
    use_bytes: bool,
    remaining: usize,
    segment: Vec<u16>,
    pos: usize,
}

impl ChainCursor<'_> {
    /// Loads the next record's characters into `segment`. Returns false once
    /// the whole string has been read.
    fn fill(&mut self) -> Result<bool> {
        if self.remaining == 0 {
            return Ok(false);
        }
        if self.next.is_null() {
            bail!(DbError::corrupted(format!(
                "long string chain ends with {} characters unread",
                self.remaining
            )));
        }

        let (num_chars1, num_charsn) = capacities(self.use_bytes);
        let record = self.next;
        let (next_field, chars_field, capacity) = if self.first {
            (NEXT1, CHARS1, num_chars1)
        } else {
            (NEXTN, CHARSN, num_charsn)
        };
        self.first = false;

        let chunk = self.db.get_chunk(record.offset())?;
        let n = capacity.min(self.remaining);
        self.segment.resize(n, 0);
        if self.use_bytes {
            chunk.get_chars_from_bytes(record.field(chars_field), &mut self.segment);
        } else {
            chunk.get_chars(record.field(chars_field), &mut self.segment);
        }
        self.next = chunk.get_rec_ptr(record.field(next_field));
        self.remaining -= n;
        self.pos = 0;
        Ok(true)
    }
}

impl CharCursor for ChainCursor<'_> {
    fn next_char(&mut self) -> Result<Option<u16>> {
        if self.pos == self.segment.len() && !self.fill()? {
            return Ok(None);
        }
        let c = self.segment[self.pos];
        self.pos += 1;
        Ok(Some(c))
    }
}
