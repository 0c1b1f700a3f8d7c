//! Request handlers for import operations.

mod imports;

pub use imports::*;
