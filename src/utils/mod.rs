//! Utility module for store sync.
//!
//! Re-exports JSON-RPC quantity helpers for use throughout the codebase.
/// Hex quantity parsing and formatting
pub mod quantity;

pub use quantity::{format_quantity, parse_optional_quantity, parse_quantity};
