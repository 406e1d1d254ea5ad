//! # Persistent Strings
//!
//! Strings are stored as UTF-16 code units in one of two layouts:
//!
//! - [`ShortString`]: a single record, for up to [`MAX_BYTE_LENGTH`] bytes
//!   of encoded characters
//! - [`LongString`]: a chain of records for anything larger
//!
//! Both start with the same signed length field, so [`Database::get_string`]
//! picks the layout from the record itself. When every code unit is below
//! 0x100 the characters are stored one byte each and the length is negated.
//!
//! ## Comparison
//!
//! All comparisons are lexicographic over code units with proper prefixes
//! sorting first. Case-insensitive variants fold ASCII letters only. Long
//! strings are compared one record at a time rather than decoded whole.

mod compare;
mod long;
mod short;

use std::cmp::Ordering;

use eyre::Result;
use tracing::trace;

use compare::{
    compare_cursor_prefix, compare_cursors, compare_cursors_compatible_with_ignore_case,
    hash_cursor, CharCursor, SliceCursor,
};
use crate::storage::{Database, RecordPtr};

pub use compare::{compare_chars, fold_ascii};
pub use long::{LongString, NUM_CHARS1, NUM_CHARSN};
pub use short::{ShortString, MAX_BYTE_LENGTH};

/// A string record in either layout.
pub enum DbString<'a> {
    Short(ShortString<'a>),
    Long(LongString<'a>),
}

fn fits_in_bytes(chars: &[u16]) -> bool {
    chars.iter().all(|&c| c & 0xff00 == 0)
}

impl Database {
    /// Stores `s` and returns a handle to the new record.
    pub fn new_string(&self, s: &str) -> Result<DbString<'_>> {
        let chars: Vec<u16> = s.encode_utf16().collect();
        self.new_string_utf16(&chars)
    }

    pub fn new_string_utf16(&self, chars: &[u16]) -> Result<DbString<'_>> {
        let use_bytes = fits_in_bytes(chars);
        let byte_len = if use_bytes { chars.len() } else { 2 * chars.len() };
        let string = if byte_len > MAX_BYTE_LENGTH {
            DbString::Long(LongString::create(self, chars, use_bytes)?)
        } else {
            DbString::Short(ShortString::create(self, chars, use_bytes)?)
        };
        trace!(
            target: "pdom::db",
            event = "new_string",
            record = %string.record(),
            chars = chars.len(),
            use_bytes,
            long = matches!(string, DbString::Long(_))
        );
        Ok(string)
    }

    /// Opens the string stored at `ptr`, choosing the layout from its length
    /// field.
    pub fn get_string(&self, ptr: RecordPtr) -> Result<DbString<'_>> {
        let length = self.get_int(ptr.offset())?;
        let n = length.unsigned_abs() as usize;
        let byte_len = if length < 0 { n } else { 2 * n };
        Ok(if byte_len > MAX_BYTE_LENGTH {
            DbString::Long(LongString::open(self, ptr))
        } else {
            DbString::Short(ShortString::open(self, ptr))
        })
    }
}

/// Runs `f` with a cursor over the string's characters.
macro_rules! with_cursor {
    ($s:expr, |$c:ident| $body:expr) => {
        match $s {
            DbString::Short(s) => {
                let mut cursor = s.cursor()?;
                let $c: &mut dyn CharCursor = &mut cursor;
                $body
            }
            DbString::Long(s) => {
                let mut cursor = s.cursor()?;
                let $c: &mut dyn CharCursor = &mut cursor;
                $body
            }
        }
    };
}

impl<'a> DbString<'a> {
    pub fn record(&self) -> RecordPtr {
        match self {
            DbString::Short(s) => s.record(),
            DbString::Long(s) => s.record(),
        }
    }

    pub fn is_long(&self) -> bool {
        matches!(self, DbString::Long(_))
    }

    /// Number of UTF-16 code units.
    pub fn len(&self) -> Result<usize> {
        match self {
            DbString::Short(s) => s.len(),
            DbString::Long(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get_chars(&self) -> Result<Vec<u16>> {
        match self {
            DbString::Short(s) => Ok(s.chars()?.to_vec()),
            DbString::Long(s) => s.chars(),
        }
    }

    /// The string decoded to Rust form. Unpaired surrogates become U+FFFD.
    pub fn get_string(&self) -> Result<String> {
        Ok(String::from_utf16_lossy(&self.get_chars()?))
    }

    /// Frees the record, or every record of a long string's chain.
    pub fn delete(self) -> Result<()> {
        match self {
            DbString::Short(s) => s.delete(),
            DbString::Long(s) => s.delete(),
        }
    }

    pub fn compare(&self, other: &DbString<'_>, case_sensitive: bool) -> Result<Ordering> {
        with_cursor!(self, |a| with_cursor!(other, |b| compare_cursors(
            a,
            b,
            case_sensitive
        )))
    }

    pub fn compare_str(&self, other: &str, case_sensitive: bool) -> Result<Ordering> {
        let other: Vec<u16> = other.encode_utf16().collect();
        self.compare_chars(&other, case_sensitive)
    }

    pub fn compare_chars(&self, other: &[u16], case_sensitive: bool) -> Result<Ordering> {
        let mut b = SliceCursor::new(other);
        with_cursor!(self, |a| compare_cursors(a, &mut b, case_sensitive))
    }

    /// Case-insensitive order with case-sensitive tie breaking.
    pub fn compare_compatible_with_ignore_case(&self, other: &DbString<'_>) -> Result<Ordering> {
        with_cursor!(self, |a| with_cursor!(other, |b| {
            compare_cursors_compatible_with_ignore_case(a, b)
        }))
    }

    pub fn compare_compatible_with_ignore_case_chars(&self, other: &[u16]) -> Result<Ordering> {
        let mut b = SliceCursor::new(other);
        with_cursor!(self, |a| compare_cursors_compatible_with_ignore_case(a, &mut b))
    }

    /// `Equal` when this string starts with `prefix`.
    pub fn compare_prefix(&self, prefix: &[u16], case_sensitive: bool) -> Result<Ordering> {
        with_cursor!(self, |a| compare_cursor_prefix(a, prefix, case_sensitive))
    }

    /// Polynomial hash of the code units, stable across sessions.
    pub fn hash_code(&self) -> Result<i32> {
        with_cursor!(self, |a| hash_cursor(a))
    }

    /// Content equality. Two handles to the same record are equal without
    /// reading it.
    pub fn equals(&self, other: &DbString<'_>) -> Result<bool> {
        if self.record() == other.record() {
            return Ok(true);
        }
        if self.len()? != other.len()? {
            return Ok(false);
        }
        Ok(self.compare(other, true)? == Ordering::Equal)
    }

    pub fn equals_str(&self, other: &str) -> Result<bool> {
        Ok(self.compare_str(other, true)? == Ordering::Equal)
    }
}

impl std::fmt::Debug for DbString<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_long() { "Long" } else { "Short" };
        f.debug_struct("DbString")
            .field("kind", &kind)
            .field("record", &self.record())
            .finish()
    }
}
