//! Generic utility primitives with zero domain knowledge.
//!
//! - `shell` - Shell escaping and quoting
//! - `suggest` - Fuzzy "did you mean" matching
//! - `validation` - Input validation helpers

pub mod shell;
pub mod suggest;
pub mod validation;
