//! # Type Marshal Buffer
//!
//! An in-memory staging buffer for serializing structured values before
//! they are stored as an opaque blob. Nothing here touches the database
//! except the record pointer encoding, which matches the compressed 4-byte
//! form used on disk.
//!
//! ## Encodings
//!
//! | Method | Format |
//! |--------|--------|
//! | `put_byte` | 1 byte |
//! | `put_short` | 2 bytes big-endian |
//! | `put_fixed_int` | 4 bytes big-endian |
//! | `put_int` / `put_long` | LEB128 of the two's-complement bits |
//! | `put_char_array` | LEB128 length, then 2 bytes per code unit |
//! | `put_record_pointer` | compressed 4-byte pointer |
//! | `put_type_reference` | tag byte, see below |
//!
//! ## Type References
//!
//! ```text
//! Null         | 0x00 |
//! Unstorable   | 0xFD |
//! Record(ptr)  | 0xFE | 0x00 | ptr (4 bytes) |
//! ```
//!
//! 0xFF ([`INDIRECT_TYPE`]) is reserved for blobs stored out of line.
//! Any other leading byte belongs to a caller-defined serialized value.

use eyre::{bail, Result};

use super::varint::{decode_varint, encode_varint, MAX_VARINT_LEN};
use crate::config::PTR_SIZE;
use crate::error::DbError;
use crate::storage::pointer::{compress_rec_ptr, expand_rec_ptr};
use crate::storage::RecordPtr;

pub const NULL_TYPE: u8 = 0x00;
pub const INDIRECT_TYPE: u8 = 0xFF;
pub const BINDING_TYPE: u8 = 0xFE;
pub const UNSTORABLE_TYPE: u8 = 0xFD;

/// A nullable reference to a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeReference {
    Null,
    /// The value exists but could not be stored.
    Unstorable,
    Record(RecordPtr),
}

#[derive(Debug, Default, Clone)]
pub struct TypeMarshalBuffer {
    buf: Vec<u8>,
    pos: usize,
}

fn unmarshalling_error(what: &str, pos: usize) -> DbError {
    DbError::corrupted(format!("unmarshalling error: {} at position {}", what, pos))
}

impl TypeMarshalBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer for reading `data` from the start.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { buf: data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            bail!(
                "position {} is past the end of a {}-byte buffer",
                pos,
                self.buf.len()
            );
        }
        self.pos = pos;
        Ok(())
    }

    /// Bytes written so far, or the loaded bytes consumed so far.
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    /// The whole underlying buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn request(&mut self, n: usize) -> &mut [u8] {
        let end = self.pos + n;
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        let start = self.pos;
        self.pos = end;
        &mut self.buf[start..end]
    }

    /// Exhausts the buffer and reports a malformed value starting at `pos`.
    fn fail(&mut self, what: &str, pos: usize) -> eyre::Report {
        self.pos = self.buf.len();
        eyre::Report::new(unmarshalling_error(what, pos))
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            let pos = self.pos;
            return Err(self.fail("buffer underflow", pos));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..start + n])
    }

    pub fn put_byte(&mut self, value: u8) {
        self.request(1)[0] = value;
    }

    pub fn get_byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn peek_byte(&self) -> Result<u8> {
        match self.buf.get(self.pos) {
            Some(&b) => Ok(b),
            None => bail!(unmarshalling_error("buffer underflow", self.pos)),
        }
    }

    pub fn put_short(&mut self, value: i16) {
        self.request(2).copy_from_slice(&value.to_be_bytes());
    }

    pub fn get_short(&mut self) -> Result<i16> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    pub fn put_fixed_int(&mut self, value: i32) {
        self.request(4).copy_from_slice(&value.to_be_bytes());
    }

    pub fn get_fixed_int(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn put_varint(&mut self, value: u64) {
        let mut tmp = [0u8; MAX_VARINT_LEN];
        let n = encode_varint(value, &mut tmp);
        self.request(n).copy_from_slice(&tmp[..n]);
    }

    fn get_varint(&mut self) -> Result<u64> {
        let pos = self.pos;
        match decode_varint(&self.buf[pos..]) {
            Ok((value, n)) => {
                self.pos += n;
                Ok(value)
            }
            Err(e) => {
                self.pos = self.buf.len();
                Err(e.wrap_err(unmarshalling_error("bad varint", pos)))
            }
        }
    }

    pub fn put_int(&mut self, value: i32) {
        self.put_varint(value as u32 as u64);
    }

    pub fn get_int(&mut self) -> Result<i32> {
        let pos = self.pos;
        let value = self.get_varint()?;
        match u32::try_from(value) {
            Ok(v) => Ok(v as i32),
            Err(_) => Err(self.fail("int varint overflows 32 bits", pos)),
        }
    }

    pub fn put_long(&mut self, value: i64) {
        self.put_varint(value as u64);
    }

    pub fn get_long(&mut self) -> Result<i64> {
        Ok(self.get_varint()? as i64)
    }

    pub fn put_char_array(&mut self, chars: &[u16]) {
        self.put_int(chars.len() as i32);
        for &c in chars {
            self.request(2).copy_from_slice(&c.to_be_bytes());
        }
    }

    pub fn get_char_array(&mut self) -> Result<Vec<u16>> {
        let pos = self.pos;
        let len = self.get_int()?;
        if len < 0 || len as usize * 2 > self.remaining() {
            return Err(self.fail("char array length out of range", pos));
        }
        let bytes = self.take(len as usize * 2)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect())
    }

    pub fn put_record_pointer(&mut self, ptr: RecordPtr) {
        let stored = compress_rec_ptr(ptr.offset());
        self.request(PTR_SIZE).copy_from_slice(&stored.to_be_bytes());
    }

    pub fn get_record_pointer(&mut self) -> Result<RecordPtr> {
        let b = self.take(PTR_SIZE)?;
        let stored = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        Ok(RecordPtr::from_offset(expand_rec_ptr(stored)))
    }

    pub fn put_type_reference(&mut self, reference: TypeReference) {
        match reference {
            TypeReference::Null => self.put_byte(NULL_TYPE),
            TypeReference::Unstorable => self.put_byte(UNSTORABLE_TYPE),
            TypeReference::Record(ptr) if ptr.is_null() => self.put_byte(NULL_TYPE),
            TypeReference::Record(ptr) => {
                self.put_byte(BINDING_TYPE);
                self.put_byte(0);
                self.put_record_pointer(ptr);
            }
        }
    }

    /// Reads a type reference. Returns `None` without consuming anything
    /// when the next byte starts some other serialized value.
    pub fn get_type_reference(&mut self) -> Result<Option<TypeReference>> {
        match self.peek_byte()? {
            NULL_TYPE => {
                self.pos += 1;
                Ok(Some(TypeReference::Null))
            }
            UNSTORABLE_TYPE => {
                self.pos += 1;
                Ok(Some(TypeReference::Unstorable))
            }
            BINDING_TYPE => {
                self.take(2)?;
                Ok(Some(TypeReference::Record(self.get_record_pointer()?)))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_fields_are_big_endian() {
        let mut buf = TypeMarshalBuffer::new();
        buf.put_short(0x0102);
        buf.put_fixed_int(-2);
        assert_eq!(buf.written(), &[0x01, 0x02, 0xFF, 0xFF, 0xFF, 0xFE]);
    }

    #[test]
    fn mixed_values_read_back_in_order() {
        let mut buf = TypeMarshalBuffer::new();
        buf.put_byte(7);
        buf.put_int(-1);
        buf.put_long(1 << 40);
        buf.put_char_array(&[0x41, 0x3b1]);
        buf.put_record_pointer(RecordPtr::from_offset(4098));

        let mut r = TypeMarshalBuffer::from_bytes(buf.written().to_vec());
        assert_eq!(r.get_byte().unwrap(), 7);
        assert_eq!(r.get_int().unwrap(), -1);
        assert_eq!(r.get_long().unwrap(), 1 << 40);
        assert_eq!(r.get_char_array().unwrap(), vec![0x41, 0x3b1]);
        assert_eq!(r.get_record_pointer().unwrap(), RecordPtr::from_offset(4098));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn record_pointer_is_compressed() {
        let mut buf = TypeMarshalBuffer::new();
        buf.put_record_pointer(RecordPtr::from_offset(4098));
        assert_eq!(buf.written(), &512u32.to_be_bytes());
    }

    #[test]
    fn type_reference_tags() {
        let mut buf = TypeMarshalBuffer::new();
        buf.put_type_reference(TypeReference::Null);
        buf.put_type_reference(TypeReference::Unstorable);
        buf.put_type_reference(TypeReference::Record(RecordPtr::from_offset(4098)));
        buf.put_byte(0x42);
        assert_eq!(&buf.written()[..4], &[NULL_TYPE, UNSTORABLE_TYPE, BINDING_TYPE, 0]);

        let mut r = TypeMarshalBuffer::from_bytes(buf.written().to_vec());
        assert_eq!(r.get_type_reference().unwrap(), Some(TypeReference::Null));
        assert_eq!(r.get_type_reference().unwrap(), Some(TypeReference::Unstorable));
        assert_eq!(
            r.get_type_reference().unwrap(),
            Some(TypeReference::Record(RecordPtr::from_offset(4098)))
        );
        assert_eq!(r.get_type_reference().unwrap(), None);
        assert_eq!(r.get_byte().unwrap(), 0x42);
    }

    #[test]
    fn underflow_is_unmarshalling_error() {
        let mut r = TypeMarshalBuffer::from_bytes(vec![0x01]);
        let err = r.get_fixed_int().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DbError>(),
            Some(DbError::Corrupted { .. })
        ));
        assert_eq!(r.position(), 1);
    }

    #[test]
    fn set_position_rewrites_in_place() {
        let mut buf = TypeMarshalBuffer::new();
        buf.put_fixed_int(0);
        buf.put_byte(9);
        buf.set_position(0).unwrap();
        buf.put_fixed_int(5);
        assert_eq!(buf.position(), 4);
        assert_eq!(buf.as_bytes(), &[0, 0, 0, 5, 9]);
        assert!(buf.set_position(6).is_err());
    }
}
