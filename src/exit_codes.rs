//! Exit codes for the loader binary
//!
//! The loader reports failures uniformly: every fatal condition, including a
//! panic, exits with `EXIT_ERROR`.

/// Successful execution
pub const EXIT_SUCCESS: i32 = 0;

/// Any fatal condition
pub const EXIT_ERROR: i32 = 1;
