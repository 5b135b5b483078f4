//! Execution requests and scope hints.

use serde::Deserialize;

use crate::instance::InstanceId;
use crate::name::validate_database_name;
use crate::error::ExecutionError;

/// Optional narrowing of which database a script may touch.
///
/// Postgres needs none; the database is selected by the connection itself.
/// MongoDB resolves the target database from the hint, falling back to the
/// instance's configured default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScopeHint {
    /// Target database name, if the request narrows it.
    #[serde(default)]
    pub database: Option<String>,
}

impl ScopeHint {
    /// A hint targeting one database.
    pub fn database(name: impl Into<String>) -> Self {
        Self {
            database: Some(name.into()),
        }
    }

    /// Validate the hinted names.
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if let Some(db) = &self.database {
            validate_database_name(db)?;
        }
        Ok(())
    }
}

/// One request to run a script against a managed instance.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionRequest {
    /// Which instance the script targets. Must resolve via the directory.
    pub instance_id: InstanceId,
    /// The uploaded script source.
    pub script: String,
    /// Optional database scope.
    #[serde(default)]
    pub scope: ScopeHint,
}

impl ExecutionRequest {
    /// Build a request with no scope hint.
    pub fn new(instance_id: InstanceId, script: impl Into<String>) -> Self {
        Self {
            instance_id,
            script: script.into(),
            scope: ScopeHint::default(),
        }
    }

    /// Narrow the request to one database.
    #[must_use]
    pub fn with_scope(mut self, scope: ScopeHint) -> Self {
        self.scope = scope;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_hint_validates_database_name() {
        assert!(ScopeHint::database("orders").validate().is_ok());
        assert!(ScopeHint::database("bad$name").validate().is_err());
        assert!(ScopeHint::default().validate().is_ok());
    }

    #[test]
    fn request_deserializes_without_scope() {
        let raw = format!(
            r#"{{"instance_id": "{}", "script": "return 1"}}"#,
            InstanceId::random()
        );
        let request: ExecutionRequest = serde_json::from_str(&raw).unwrap();
        assert_eq!(request.scope, ScopeHint::default());
    }
}
