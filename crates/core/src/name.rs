//! Database and collection name validation.
//!
//! Scope hints arrive from the routing layer shape-checked but not
//! domain-checked; these rules are the sandbox's last line before a name is
//! interpolated into driver calls.

use crate::error::{ErrorCode, ExecutionError};

/// Maximum accepted name length. MongoDB caps database names at 64 bytes;
/// Postgres identifiers at 63. The lower bound keeps both happy.
pub const MAX_NAME_LEN: usize = 63;

/// Characters MongoDB forbids in database names on all platforms.
const MONGO_FORBIDDEN: &[char] = &['/', '\\', '.', ' ', '"', '$'];

/// Validate a database name from a scope hint.
pub fn validate_database_name(name: &str) -> Result<(), ExecutionError> {
    validate(name, "database")?;
    if let Some(bad) = name.chars().find(|c| MONGO_FORBIDDEN.contains(c)) {
        return Err(invalid(format!(
            "database name contains forbidden character '{bad}'"
        )));
    }
    Ok(())
}

/// Validate a collection name passed to `collection(name)`.
pub fn validate_collection_name(name: &str) -> Result<(), ExecutionError> {
    validate(name, "collection")?;
    if name.starts_with("system.") {
        return Err(invalid("collection names in 'system.' are reserved"));
    }
    if name.contains('$') {
        return Err(invalid("collection name contains forbidden character '$'"));
    }
    Ok(())
}

fn validate(name: &str, what: &str) -> Result<(), ExecutionError> {
    if name.is_empty() {
        return Err(invalid(format!("{what} name cannot be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid(format!(
            "{what} name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid(format!("{what} name contains control characters")));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> ExecutionError {
    ExecutionError::new(ErrorCode::InvalidScope, message)
}
