use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::cluster_node::ClusterNode;
use super::window::WindowSpec;
use super::Node;
use crate::resource::ResourceWrapper;

/// Registry holding exactly one [`ClusterNode`] per resource.
///
/// Reads go through an immutable snapshot and never block. Creation takes
/// `create_lock`, re-checks, copies the current map, inserts and publishes the new
/// map in one atomic store, so readers see either the old map or the complete new
/// one.
pub struct ClusterNodeRegistry {
    nodes: ArcSwap<HashMap<ResourceWrapper, Arc<ClusterNode>>>,
    create_lock: Mutex<()>,
    window: WindowSpec,
}

impl ClusterNodeRegistry {
    pub fn new(window: WindowSpec) -> Self {
        Self {
            nodes: ArcSwap::from_pointee(HashMap::new()),
            create_lock: Mutex::new(()),
            window,
        }
    }

    pub fn get(&self, resource: &ResourceWrapper) -> Option<Arc<ClusterNode>> {
        self.nodes.load().get(resource).cloned()
    }

    /// Looks a resource up by name; the entry type plays no part in identity.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<ClusterNode>> {
        self.get(&ResourceWrapper::outbound(name))
    }

    pub fn get_or_create(&self, resource: &ResourceWrapper) -> Arc<ClusterNode> {
        if let Some(node) = self.get(resource) {
            return node;
        }
        let _guard = self
            .create_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.nodes.load();
        if let Some(node) = current.get(resource) {
            return Arc::clone(node);
        }
        let node = Arc::new(ClusterNode::new(
            resource.name(),
            resource.resource_type(),
            self.window,
        ));
        let mut updated = HashMap::with_capacity(current.len().max(16));
        for (k, v) in current.iter() {
            updated.insert(k.clone(), Arc::clone(v));
        }
        updated.insert(resource.clone(), Arc::clone(&node));
        self.nodes.store(Arc::new(updated));
        tracing::debug!(resource = %resource, "created cluster node");
        node
    }

    /// The current snapshot. Do not expect it to track later insertions.
    pub fn snapshot(&self) -> Arc<HashMap<ResourceWrapper, Arc<ClusterNode>>> {
        self.nodes.load_full()
    }

    pub fn len(&self) -> usize {
        self.nodes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears the counters of every cluster node; the nodes themselves stay.
    pub fn reset_all(&self) {
        for node in self.nodes.load().values() {
            node.reset();
        }
    }
}

impl Default for ClusterNodeRegistry {
    fn default() -> Self {
        Self::new(WindowSpec::default())
    }
}

impl std::fmt::Debug for ClusterNodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterNodeRegistry")
            .field("len", &self.len())
            .finish()
    }
}
