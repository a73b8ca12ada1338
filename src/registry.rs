//! Backend registry and transform chain.
//!
//! Process-wide shared state for the session protocol: the named set of
//! live backends and the ordered transform chain, both mutable by
//! administrative action while sessions run. The registry is an injected
//! service object shared via `Arc`, never a global; each collection has its
//! own lock so administrative changes on one never block the other.
//!
//! Sessions must not cache trust in a resolved backend: an administrator
//! may deregister it at any time, which is why [`Registry::is_live`]
//! exists and the session re-checks it before every dispatch.

use crate::backend::Backend;
use crate::transform::Transform;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Named backends plus the ordered transform chain.
#[derive(Default)]
pub struct Registry {
    backends: RwLock<HashMap<String, Arc<dyn Backend>>>,
    transforms: RwLock<Vec<Arc<dyn Transform>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under a name, returning the one it replaced.
    pub fn register(&self, name: impl Into<String>, backend: Arc<dyn Backend>) -> Option<Arc<dyn Backend>> {
        self.backends.write().insert(name.into(), backend)
    }

    /// Remove a backend by name, returning it if it was registered.
    pub fn deregister(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.write().remove(name)
    }

    /// Look up a backend by name.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.read().get(name).cloned()
    }

    /// Whether this exact backend instance is still registered.
    ///
    /// Identity, not name: a backend deregistered and replaced by another
    /// instance under the same name is no longer live.
    pub fn is_live(&self, backend: &Arc<dyn Backend>) -> bool {
        self.backends
            .read()
            .values()
            .any(|registered| Arc::ptr_eq(registered, backend))
    }

    /// Names of all registered backends, sorted.
    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Append a transform to the end of the chain.
    pub fn add_transform(&self, transform: Arc<dyn Transform>) {
        self.transforms.write().push(transform);
    }

    /// Remove every transform from the chain.
    pub fn clear_transforms(&self) {
        self.transforms.write().clear();
    }

    /// A consistent snapshot of the transform chain in registration order.
    ///
    /// Sessions iterate the snapshot, so an administrative mutation of the
    /// chain is never observed mid-application.
    pub fn transforms(&self) -> Vec<Arc<dyn Transform>> {
        self.transforms.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn resolve_returns_registered_backends() {
        let registry = Registry::new();
        assert!(registry.resolve("memory").is_none());

        let backend = Arc::new(MemoryBackend::new());
        registry.register("memory", backend);
        assert!(registry.resolve("memory").is_some());
        assert_eq!(registry.backend_names(), vec!["memory".to_string()]);
    }

    #[test]
    fn liveness_is_instance_identity() {
        let registry = Registry::new();
        let backend = Arc::new(MemoryBackend::new());
        registry.register("memory", backend);

        let resolved = registry.resolve("memory").unwrap();
        assert!(registry.is_live(&resolved));

        // Replacing the instance under the same name kills the old one.
        registry.register("memory", Arc::new(MemoryBackend::new()));
        assert!(!registry.is_live(&resolved));
    }

    #[test]
    fn deregister_removes_liveness() {
        let registry = Registry::new();
        registry.register("memory", Arc::new(MemoryBackend::new()));
        let resolved = registry.resolve("memory").unwrap();

        registry.deregister("memory");
        assert!(!registry.is_live(&resolved));
        assert!(registry.resolve("memory").is_none());
    }
}
