use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{Invocation, Next, ProcessorSlot};
use crate::context::Context;
use crate::error::BlockError;
use crate::node::{DefaultNode, WindowSpec};

/// Finds the resource's [`DefaultNode`] for the current context name, creating
/// it on first use, and links it under the context's current parent node.
///
/// One instance per chain, so the map holds one node per context name the
/// resource was entered from.
pub struct NodeSelectorSlot {
    nodes: ArcSwap<HashMap<String, Arc<DefaultNode>>>,
    create_lock: Mutex<()>,
    window: WindowSpec,
}

impl NodeSelectorSlot {
    pub fn new(window: WindowSpec) -> Self {
        Self {
            nodes: ArcSwap::from_pointee(HashMap::new()),
            create_lock: Mutex::new(()),
            window,
        }
    }

    fn node_for(&self, context_name: &str, inv: &Invocation<'_>) -> Arc<DefaultNode> {
        if let Some(node) = self.nodes.load().get(context_name) {
            return Arc::clone(node);
        }
        let _guard = self
            .create_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.nodes.load();
        if let Some(node) = current.get(context_name) {
            return Arc::clone(node);
        }
        let node = Arc::new(DefaultNode::new(inv.resource.clone(), self.window));
        let mut updated = HashMap::with_capacity(current.len() + 1);
        for (k, v) in current.iter() {
            updated.insert(k.clone(), Arc::clone(v));
        }
        updated.insert(context_name.to_string(), Arc::clone(&node));
        self.nodes.store(Arc::new(updated));
        node
    }

    /// Context names this resource has a node for.
    pub fn context_names(&self) -> Vec<String> {
        self.nodes.load().keys().cloned().collect()
    }
}

impl ProcessorSlot for NodeSelectorSlot {
    fn name(&self) -> &str {
        "node-selector"
    }

    fn entry(
        &self,
        ctx: &mut Context,
        inv: &Invocation<'_>,
        _node: Option<&Arc<DefaultNode>>,
        next: Next<'_>,
    ) -> Result<(), BlockError> {
        let node = self.node_for(ctx.name(), inv);
        if let Some(parent) = ctx.parent_node() {
            parent.add_child(Arc::clone(&node));
        }
        ctx.set_cur_node(Arc::clone(&node));
        next.fire_entry(ctx, inv, Some(&node))
    }
}
