//! Instance directory boundary.
//!
//! Instance registration and lifecycle belong to an external collaborator;
//! the sandbox only needs to resolve an id to a registration. The in-memory
//! implementation backs tests and single-process deployments.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{ErrorCode, ExecutionError};
use crate::instance::{Instance, InstanceId};

/// Read access to registered instances.
#[async_trait]
pub trait InstanceDirectory: Send + Sync {
    /// Look up an instance by id.
    async fn get(&self, id: InstanceId) -> Option<Instance>;

    /// Look up an instance, classifying a miss as `InstanceNotFound`.
    async fn resolve(&self, id: InstanceId) -> Result<Instance, ExecutionError> {
        self.get(id).await.ok_or_else(|| {
            ExecutionError::new(
                ErrorCode::InstanceNotFound,
                format!("instance '{id}' is not registered"),
            )
        })
    }
}

/// In-memory instance directory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    instances: DashMap<InstanceId, Instance>,
}

impl MemoryDirectory {
    /// An empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance, replacing any previous registration.
    pub fn insert(&self, instance: Instance) {
        self.instances.insert(instance.id, instance);
    }

    /// Remove a registration.
    pub fn remove(&self, id: InstanceId) -> Option<Instance> {
        self.instances.remove(&id).map(|(_, instance)| instance)
    }

    /// Number of registered instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[async_trait]
impl InstanceDirectory for MemoryDirectory {
    async fn get(&self, id: InstanceId) -> Option<Instance> {
        self.instances.get(&id).map(|entry| entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{ConnectionDescriptor, InstanceKind};

    fn sample_instance() -> Instance {
        Instance::new(
            InstanceId::random(),
            "analytics",
            InstanceKind::Postgres,
            ConnectionDescriptor::new("postgresql://localhost/analytics"),
        )
    }

    #[tokio::test]
    async fn resolves_registered_instances() {
        let directory = MemoryDirectory::new();
        let instance = sample_instance();
        let id = instance.id;
        directory.insert(instance);

        let resolved = directory.resolve(id).await.unwrap();
        assert_eq!(resolved.name, "analytics");
    }

    #[tokio::test]
    async fn missing_instance_is_classified() {
        let directory = MemoryDirectory::new();
        let err = directory.resolve(InstanceId::random()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InstanceNotFound);
    }

    #[tokio::test]
    async fn remove_unregisters() {
        let directory = MemoryDirectory::new();
        let instance = sample_instance();
        let id = instance.id;
        directory.insert(instance);
        assert_eq!(directory.len(), 1);

        directory.remove(id);
        assert!(directory.is_empty());
        assert!(directory.get(id).await.is_none());
    }
}
