//! # Variable-Length Integer Encoding
//!
//! LEB128: seven value bits per byte, least significant group first, with
//! the high bit set on every byte except the last.
//!
//! | Value Range                | Bytes |
//! |----------------------------|-------|
//! | 0 - 127                    | 1     |
//! | 128 - 16383                | 2     |
//! | 16384 - 2097151            | 3     |
//! | ...                        | ...   |
//! | 2^63 - u64::MAX            | 10    |
//!
//! Signed values are encoded through their two's-complement bit pattern, so
//! a negative 32-bit int always takes five bytes and a negative 64-bit long
//! always takes ten.
//!
//! ## Usage Example
//!
//! ```rust
//! use pdom::encoding::varint::{decode_varint, encode_varint, varint_len};
//!
//! let mut buf = [0u8; 10];
//! let written = encode_varint(300, &mut buf);
//! assert_eq!(written, varint_len(300));
//! assert_eq!(&buf[..written], &[0xAC, 0x02]);
//!
//! let (value, read) = decode_varint(&buf).unwrap();
//! assert_eq!((value, read), (300, 2));
//! ```
//!
//! ## Error Handling
//!
//! `decode_varint` fails on an empty or truncated buffer and on encodings
//! longer than [`MAX_VARINT_LEN`] bytes.

use eyre::{bail, ensure, Result};

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

pub fn varint_len(value: u64) -> usize {
    let bits = (u64::BITS - value.leading_zeros()).max(1) as usize;
    bits.div_ceil(7)
}

/// Writes `value` at the start of `buf` and returns the bytes written.
/// `buf` must hold at least [`varint_len`] bytes.
pub fn encode_varint(mut value: u64, buf: &mut [u8]) -> usize {
    let mut i = 0;
    loop {
        let mut b = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            b |= 0x80;
        }
        buf[i] = b;
        i += 1;
        if value == 0 {
            return i;
        }
    }
}

pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize)> {
    ensure!(!buf.is_empty(), "empty buffer for varint decode");

    let mut value = 0u64;
    for (i, &b) in buf.iter().enumerate().take(MAX_VARINT_LEN) {
        let bits = (b & 0x7F) as u64;
        let shift = 7 * i as u32;
        if i == MAX_VARINT_LEN - 1 && bits > 1 {
            bail!("varint overflows 64 bits");
        }
        value |= bits << shift;
        if b & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    if buf.len() < MAX_VARINT_LEN {
        bail!("truncated {}-byte varint", buf.len());
    }
    bail!("varint longer than {} bytes", MAX_VARINT_LEN)
}
