//! Input validation primitives.
//!
//! Strings that end up in shell commands are checked here first.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Require a string to be non-empty after trimming.
///
/// Returns a reference to the trimmed string on success.
pub fn require_non_empty<'a>(value: &'a str, field: &str, message: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::validation_invalid_argument(field, message, None, None))
    } else {
        Ok(trimmed)
    }
}

static REF_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/+@-]*$").unwrap());

/// Require a plausible git ref name (tag or branch).
///
/// Stricter than `git check-ref-format`: no whitespace, no shell
/// metacharacters other than `+` and `@`, no `..`, no `@{`, no trailing
/// `/`, `.` or `.lock`.
pub fn require_ref_name<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let value = require_non_empty(value, field, "must not be empty")?;

    let invalid = !REF_NAME_PATTERN.is_match(value)
        || value.contains("..")
        || value.contains("//")
        || value.ends_with('/')
        || value.ends_with('.')
        || value.ends_with(".lock");

    if invalid {
        return Err(Error::validation_invalid_argument(
            field,
            format!("'{}' is not a valid git ref name", value),
            Some(value.to_string()),
            None,
        ));
    }

    Ok(value)
}
