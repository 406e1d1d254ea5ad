//! # PDOM Configuration Module
//!
//! This module centralizes all configuration constants for the storage engine.
//! Constants are grouped by their functional area and interdependencies are
//! documented and enforced through compile-time assertions.
//!
//! ## Why Centralization?
//!
//! The file layout is defined almost entirely by derived values: the number of
//! free lists follows from the chunk size and block alignment, the header size
//! follows from the number of free lists, and the addressable file size
//! follows from the alignment. Keeping them in one place keeps those
//! derivations visible.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency documentation
//!
//! ## Runtime Configuration
//!
//! Runtime settings (cache size, database version, read-only mode, filler
//! chunks) are supplied through [`crate::storage::DatabaseBuilder`]. The only
//! environment input is the debug tunable named by
//! [`constants::SETASIDE_CHUNKS_ENV`], read by [`setaside_chunks_from_env`].

pub mod constants;
pub use constants::*;

use tracing::warn;

/// Reads the filler-chunk count from [`SETASIDE_CHUNKS_ENV`].
///
/// Returns 0 when the variable is unset. An unparsable value is logged and
/// treated as unset.
pub fn setaside_chunks_from_env() -> u32 {
    match std::env::var(SETASIDE_CHUNKS_ENV) {
        Ok(raw) => match raw.trim().parse::<u32>() {
            Ok(count) => count,
            Err(err) => {
                warn!(
                    target: "pdom::config",
                    variable = SETASIDE_CHUNKS_ENV,
                    value = %raw,
                    error = %err,
                    "ignoring unparsable setaside chunk count"
                );
                0
            }
        },
        Err(_) => 0,
    }
}
