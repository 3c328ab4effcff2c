use once_cell::sync::OnceCell;
use std::sync::Arc;

use super::{Invocation, Next, ProcessorSlot};
use crate::context::Context;
use crate::error::BlockError;
use crate::node::{ClusterNode, ClusterNodeRegistry, DefaultNode};

/// Attaches the resource's process-wide [`ClusterNode`] to the context-local
/// node and, for a context with an origin, the caller's origin node to the
/// current entry.
///
/// The cluster node is looked up or created once per chain and cached.
pub struct ClusterBuilderSlot {
    registry: Arc<ClusterNodeRegistry>,
    cluster_node: OnceCell<Arc<ClusterNode>>,
}

impl ClusterBuilderSlot {
    pub fn new(registry: Arc<ClusterNodeRegistry>) -> Self {
        Self {
            registry,
            cluster_node: OnceCell::new(),
        }
    }

    pub fn cluster_node(&self) -> Option<&Arc<ClusterNode>> {
        self.cluster_node.get()
    }
}

impl ProcessorSlot for ClusterBuilderSlot {
    fn name(&self) -> &str {
        "cluster-builder"
    }

    fn entry(
        &self,
        ctx: &mut Context,
        inv: &Invocation<'_>,
        node: Option<&Arc<DefaultNode>>,
        next: Next<'_>,
    ) -> Result<(), BlockError> {
        let cluster = Arc::clone(
            self.cluster_node
                .get_or_init(|| self.registry.get_or_create(inv.resource)),
        );
        if let Some(node) = node {
            node.set_cluster_node(Arc::clone(&cluster));
        }
        if !ctx.origin().is_empty() {
            let origin_node = cluster.get_or_create_origin_node(ctx.origin());
            ctx.set_origin_node(origin_node);
        }
        next.fire_entry(ctx, inv, node)
    }
}
