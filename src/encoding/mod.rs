//! # Encoding Module
//!
//! Serialization helpers layered over the database:
//!
//! - **Varint encoding**: LEB128 integers used by the marshal buffer
//! - **Type marshalling**: [`TypeMarshalBuffer`], an in-memory staging buffer
//!   for structured values and tagged record references
//! - **Blob slots**: storing a marshalled buffer inline in a record field, or
//!   out of line in a record chain when it does not fit

pub mod blob;
pub mod marshal;
pub mod varint;

pub use blob::{delete_buffer, load_buffer, store_buffer};
pub use marshal::{TypeMarshalBuffer, TypeReference};
pub use varint::{decode_varint, encode_varint, varint_len, MAX_VARINT_LEN};
