use std::sync::Arc;

use crate::error::ResolutionError;
use crate::graph::Graph;
use crate::key::{BindingKey, Key};
use crate::pool::{DirectPool, WorkerPool};
use crate::registry::Registry;
use crate::resolver::Resolver;

/// Pairs a producer registry with the worker pool graphs run on.
///
/// A context is cheap to clone and can create any number of independent
/// graphs. Each graph gets its own node set, so no node is ever shared
/// between graphs.
#[derive(Clone)]
pub struct Context {
    registry: Arc<Registry>,
    pool: Arc<dyn WorkerPool>,
}

impl Context {
    pub fn new(registry: Registry, pool: impl WorkerPool + 'static) -> Self {
        Self::from_shared(Arc::new(registry), pool)
    }

    /// Creates a context over a registry shared with other contexts.
    pub fn from_shared(registry: Arc<Registry>, pool: impl WorkerPool + 'static) -> Self {
        Self {
            registry,
            pool: Arc::new(pool),
        }
    }

    /// A context running every producer on the calling thread.
    pub fn direct(registry: Registry) -> Self {
        Self::new(registry, DirectPool)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Keys with a producer of their own, sorted for display.
    pub fn available_keys(&self) -> Vec<BindingKey> {
        let mut keys = self.registry.available_keys();
        keys.sort_by_cached_key(ToString::to_string);
        keys
    }

    /// Builds a graph producing the value behind `key`.
    pub fn new_graph<T>(&self, key: Key<T>) -> Result<Graph<T>, ResolutionError>
    where
        T: Send + Sync + 'static,
    {
        let resolution = Resolver::new(&self.registry).resolve(key.erased())?;
        Ok(Graph::new(resolution, self.pool.clone()))
    }
}
