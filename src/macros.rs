//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate.
//!
//! ## be_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! big-endian wrapper types (I32, U32). The database file stores every
//! multi-byte integer big-endian, so header structs are declared with
//! `zerocopy::big_endian` field types and exposed through native integers.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::big_endian::{I32, U32};
//!
//! #[repr(C)]
//! struct Header {
//!     version: I32,
//!     flags: U32,
//! }
//!
//! impl Header {
//!     be_accessors! {
//!         version: i32,
//!         flags: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn version(&self) -> i32 { self.version.get() }
//! // pub fn set_version(&mut self, val: i32) { self.version = I32::new(val); }
//! // pub fn flags(&self) -> u32 { self.flags.get() }
//! // pub fn set_flags(&mut self, val: u32) { self.flags = U32::new(val); }
//! ```

/// Generates getter and setter methods for zerocopy big-endian fields.
#[macro_export]
macro_rules! be_accessors {
    (@impl $field:ident, i32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> i32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: i32) {
                self.$field = ::zerocopy::big_endian::I32::new(val);
            }
        }
    };
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::big_endian::U32::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::be_accessors!(@impl $field, $ty);
        )*
    };
}
