//! # Blob Slots
//!
//! Stores a marshalled buffer in a fixed-size slot of some record. Small
//! buffers are written inline; anything larger goes into a chain of records
//! and the slot keeps a pointer to it:
//!
//! ```text
//! inline:    | buffer bytes ... (at most max_inline)        |
//! indirect:  | 0xFF | chain ptr (4 bytes) |
//!
//! chain:     | next ptr | varint total length | bytes ... |  first record
//!            | next ptr | bytes ...                      |  following records
//! ```
//!
//! An inline buffer never starts with [`INDIRECT_TYPE`]; one that would is
//! stored indirectly. Slots must be at least `1 + PTR_SIZE` bytes.

use eyre::{bail, ensure, Result};
use tracing::trace;

use super::marshal::{TypeMarshalBuffer, INDIRECT_TYPE};
use super::varint::{decode_varint, encode_varint, MAX_VARINT_LEN};
use crate::config::{MAX_MALLOC_SIZE, PTR_SIZE};
use crate::error::DbError;
use crate::storage::{Database, RecordPtr};

const CHAIN_NEXT: usize = 0;
const CHAIN_DATA: usize = PTR_SIZE;
const CHAIN_CAPACITY: usize = MAX_MALLOC_SIZE - CHAIN_DATA;

/// Writes the bytes written to `buf` into the slot at `offset`. An empty
/// buffer leaves the slot untouched.
pub fn store_buffer(
    db: &Database,
    offset: u64,
    buf: &TypeMarshalBuffer,
    max_inline: usize,
) -> Result<()> {
    ensure!(
        max_inline > PTR_SIZE,
        "blob slot of {} bytes cannot hold an indirect pointer",
        max_inline
    );
    let data = buf.written();
    if data.is_empty() {
        return Ok(());
    }
    if data.len() <= max_inline && data[0] != INDIRECT_TYPE {
        return db.put_bytes(offset, data);
    }

    let mut header = [0u8; MAX_VARINT_LEN];
    let header_len = encode_varint(data.len() as u64, &mut header);
    let mut payload = Vec::with_capacity(header_len + data.len());
    payload.extend_from_slice(&header[..header_len]);
    payload.extend_from_slice(data);

    let mut link = offset + 1;
    for segment in payload.chunks(CHAIN_CAPACITY) {
        let record = db.malloc(CHAIN_DATA + segment.len())?;
        db.put_bytes(record.field(CHAIN_DATA), segment)?;
        db.put_rec_ptr(link, record)?;
        link = record.field(CHAIN_NEXT);
    }
    db.put_byte(offset, INDIRECT_TYPE as i8)?;

    trace!(
        target: "pdom::db",
        event = "store_indirect_blob",
        offset,
        len = data.len()
    );
    Ok(())
}

/// Reads the slot at `offset` back into a buffer positioned at its start.
/// For an inline slot the buffer holds all `max_inline` bytes; trailing
/// bytes past the stored value are whatever the slot contained.
pub fn load_buffer(db: &Database, offset: u64, max_inline: usize) -> Result<TypeMarshalBuffer> {
    if db.get_byte(offset)? as u8 != INDIRECT_TYPE {
        let mut data = vec![0u8; max_inline];
        db.get_bytes(offset, &mut data)?;
        return Ok(TypeMarshalBuffer::from_bytes(data));
    }

    let first = db.get_rec_ptr(offset + 1)?;
    let mut header = [0u8; MAX_VARINT_LEN];
    let mut header_len = 0;
    loop {
        let b = db.get_byte(first.field(CHAIN_DATA + header_len))? as u8;
        header[header_len] = b;
        header_len += 1;
        if b & 0x80 == 0 || header_len == MAX_VARINT_LEN {
            break;
        }
    }
    let (len, _) = decode_varint(&header[..header_len])?;
    if len > db.database_size() {
        bail!(DbError::corrupted(format!(
            "blob chain at {} claims {} bytes",
            offset, len
        )));
    }
    let len = len as usize;

    let mut data = vec![0u8; len];
    let mut filled = 0;
    let mut record = first;
    let mut skip = header_len;
    loop {
        let n = (CHAIN_CAPACITY - skip).min(len - filled);
        db.get_bytes(record.field(CHAIN_DATA + skip), &mut data[filled..filled + n])?;
        filled += n;
        if filled == len {
            break;
        }
        record = db.get_rec_ptr(record.field(CHAIN_NEXT))?;
        if record.is_null() {
            bail!(DbError::corrupted(format!(
                "blob chain at {} ends after {} of {} bytes",
                offset, filled, len
            )));
        }
        skip = 0;
    }
    Ok(TypeMarshalBuffer::from_bytes(data))
}

/// Frees an indirect chain and zeroes the slot.
pub fn delete_buffer(db: &Database, offset: u64, max_inline: usize) -> Result<()> {
    if db.get_byte(offset)? as u8 == INDIRECT_TYPE {
        let mut record = db.get_rec_ptr(offset + 1)?;
        while !record.is_null() {
            let next = db.get_rec_ptr(record.field(CHAIN_NEXT))?;
            db.free(record)?;
            record = next;
        }
    }
    db.clear_bytes(offset, max_inline)
}

/// Pointer to the first chain record, or null for an inline slot.
pub fn indirect_record(db: &Database, offset: u64) -> Result<RecordPtr> {
    if db.get_byte(offset)? as u8 == INDIRECT_TYPE {
        db.get_rec_ptr(offset + 1)
    } else {
        Ok(RecordPtr::NULL)
    }
}
