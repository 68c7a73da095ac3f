//! PoolRegistryStore - which pools exist in this process
//!
//! The pool map is copy-on-write behind an `ArcSwap`: registration (rare)
//! clones the map, readers take the current `Arc` and iterate it without
//! locking. A `PoolSet` is therefore an immutable snapshot as of `list_all`.

use crate::application::pool_handle::PoolHandle;
use crate::domain::{PoolIdentifier, ThreadPoolConfig};
use crate::error::{AppError, Result};
use crate::port::ManagedExecutor;
use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

type PoolMap = BTreeMap<PoolIdentifier, Arc<PoolHandle>>;

/// Process-local registry of managed pools
///
/// Constructed explicitly and injected into the engines; tests can run any
/// number of independent stores side by side.
pub struct PoolRegistryStore {
    pools: ArcSwap<PoolMap>,
}

impl Default for PoolRegistryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolRegistryStore {
    pub fn new() -> Self {
        Self {
            pools: ArcSwap::from_pointee(PoolMap::new()),
        }
    }

    /// Register a live executor under `initial_config.identifier`
    ///
    /// # Errors
    /// - DuplicateIdentifier if the identifier is already registered
    /// - InvalidConfig / Executor errors from `PoolHandle::new`
    pub fn register(
        &self,
        initial_config: ThreadPoolConfig,
        executor: Arc<dyn ManagedExecutor>,
    ) -> Result<Arc<PoolHandle>> {
        if self.contains(&initial_config.identifier) {
            return Err(AppError::DuplicateIdentifier(initial_config.identifier.to_string()));
        }
        let handle = Arc::new(PoolHandle::new(initial_config, executor)?);
        self.insert(handle)
    }

    /// Add an already built handle (first writer wins)
    ///
    /// # Errors
    /// - DuplicateIdentifier if the identifier is already registered
    pub fn insert(&self, handle: Arc<PoolHandle>) -> Result<Arc<PoolHandle>> {
        let identifier = handle.identifier().clone();
        let mut duplicate = false;

        self.pools.rcu(|current| {
            if current.contains_key(&identifier) {
                duplicate = true;
                return Arc::clone(current);
            }
            duplicate = false;
            let mut next = PoolMap::clone(current);
            next.insert(identifier.clone(), Arc::clone(&handle));
            Arc::new(next)
        });

        if duplicate {
            warn!(pool = %identifier, "Rejected duplicate pool registration");
            return Err(AppError::DuplicateIdentifier(identifier.to_string()));
        }

        info!(pool = %identifier, "Pool registered");
        Ok(handle)
    }

    pub fn get(&self, identifier: &PoolIdentifier) -> Option<Arc<PoolHandle>> {
        self.pools.load().get(identifier).cloned()
    }

    pub fn contains(&self, identifier: &PoolIdentifier) -> bool {
        self.pools.load().contains_key(identifier)
    }

    /// Snapshot of every registered pool as of this call
    pub fn list_all(&self) -> PoolSet {
        PoolSet {
            pools: self.pools.load_full(),
        }
    }

    pub fn len(&self) -> usize {
        self.pools.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.load().is_empty()
    }

    /// Drop every handle at shutdown and hand them back
    ///
    /// Best effort: the executors are not stopped here; whoever owns them
    /// shuts them down.
    pub fn unregister_all(&self) -> Vec<Arc<PoolHandle>> {
        let drained = self.pools.swap(Arc::new(PoolMap::new()));
        let handles: Vec<Arc<PoolHandle>> = drained.values().cloned().collect();
        info!(count = handles.len(), "Unregistered all pools");
        handles
    }
}

/// Immutable, restartable view of the registered pools
#[derive(Clone)]
pub struct PoolSet {
    pools: Arc<PoolMap>,
}

impl PoolSet {
    /// Iterate in identifier order; can be called any number of times
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PoolHandle>> + '_ {
        self.pools.values()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &PoolIdentifier> + '_ {
        self.pools.keys()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

impl<'a> IntoIterator for &'a PoolSet {
    type Item = &'a Arc<PoolHandle>;
    type IntoIter = std::collections::btree_map::Values<'a, PoolIdentifier, Arc<PoolHandle>>;

    fn into_iter(self) -> Self::IntoIter {
        self.pools.values()
    }
}
