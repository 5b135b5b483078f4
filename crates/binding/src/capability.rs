//! The capability binding builder.
//!
//! `build` is pure: it validates the instance kind and scope and fixes the
//! target database, opening no connection. `install` runs after the scope
//! manager has produced this execution's connection, and is the only place
//! host objects are constructed: one set per execution, never shared.

use std::sync::Arc;

use quasar_core::{ErrorCode, ExecutionError, Instance, InstanceKind, ScopeHint};
use quasar_core::name::validate_database_name;
use quasar_script::{Bindings, ScriptValue};

use crate::connection::ScopedConnection;
use crate::hosts::{ClientHandle, CollectionFn, DbHandle, QueryFn};

/// The type-tagged plan for what one script execution may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityBinding {
    /// Postgres: `query(sql, params)` and `client`.
    Postgres,
    /// MongoDB: `db` and `collection(name)`, scoped to one database.
    Mongo {
        /// The resolved target database.
        database: String,
    },
}

impl CapabilityBinding {
    /// Build the binding plan for an instance and scope hint.
    ///
    /// For MongoDB the target database resolves from the hint, falling
    /// back to the instance's configured default; neither existing is an
    /// `InvalidScope` failure. No connection is opened here.
    pub fn build(instance: &Instance, scope: &ScopeHint) -> Result<Self, ExecutionError> {
        scope.validate()?;

        match instance.kind {
            InstanceKind::Postgres => Ok(Self::Postgres),
            InstanceKind::Mongodb => {
                let database = scope
                    .database
                    .clone()
                    .or_else(|| instance.connection.default_database.clone())
                    .ok_or_else(|| {
                        ExecutionError::new(
                            ErrorCode::InvalidScope,
                            "no target database: request gave no scope hint and the \
                             instance has no default database",
                        )
                    })?;
                validate_database_name(&database)?;
                Ok(Self::Mongo { database })
            }
        }
    }

    /// Install this binding's host objects over `conn`.
    ///
    /// The handles capture the execution's own connection; they become dead
    /// weight the moment the worker task ends.
    pub fn install(
        &self,
        conn: &ScopedConnection,
        bindings: &mut Bindings,
    ) -> Result<(), ExecutionError> {
        match (self, conn) {
            (Self::Postgres, ScopedConnection::Sql(sql)) => {
                bindings.insert(
                    "query",
                    ScriptValue::Handle(Arc::new(QueryFn::new(Arc::clone(sql)))),
                );
                bindings.insert(
                    "client",
                    ScriptValue::Handle(Arc::new(ClientHandle::new(Arc::clone(sql)))),
                );
                Ok(())
            }
            (Self::Mongo { database }, ScopedConnection::Document(doc)) => {
                bindings.insert(
                    "db",
                    ScriptValue::Handle(Arc::new(DbHandle::new(
                        Arc::clone(doc),
                        database.clone(),
                    ))),
                );
                bindings.insert(
                    "collection",
                    ScriptValue::Handle(Arc::new(CollectionFn::new(
                        Arc::clone(doc),
                        database.clone(),
                    ))),
                );
                Ok(())
            }
            (binding, conn) => Err(ExecutionError::new(
                ErrorCode::ConnectionFailed,
                format!(
                    "connection kind '{}' does not match binding {:?}",
                    conn.kind_name(),
                    binding
                ),
            )),
        }
    }
}
