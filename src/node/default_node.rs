use arc_swap::ArcSwap;
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex};

use super::cluster_node::ClusterNode;
use super::statistic::StatisticNode;
use super::window::WindowSpec;
use super::Node;
use crate::resource::ResourceWrapper;

/// Role of a [`DefaultNode`] in a context tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Root of one named call context. Reads aggregate over its children.
    Entrance,
    /// One resource within one call context.
    Default,
}

/// Statistics for one resource inside one call context, or the entrance of a
/// context when tagged [`NodeKind::Entrance`].
///
/// Writes go to the node's own counters and through to its cluster node once one
/// has been attached.
#[derive(Debug)]
pub struct DefaultNode {
    kind: NodeKind,
    resource: ResourceWrapper,
    stat: StatisticNode,
    children: ArcSwap<Vec<Arc<DefaultNode>>>,
    children_lock: Mutex<()>,
    cluster_node: OnceCell<Arc<ClusterNode>>,
}

impl DefaultNode {
    pub fn new(resource: ResourceWrapper, window: WindowSpec) -> Self {
        Self::with_kind(NodeKind::Default, resource, window)
    }

    pub fn entrance(resource: ResourceWrapper, window: WindowSpec) -> Self {
        Self::with_kind(NodeKind::Entrance, resource, window)
    }

    fn with_kind(kind: NodeKind, resource: ResourceWrapper, window: WindowSpec) -> Self {
        Self {
            kind,
            resource,
            stat: StatisticNode::new(window),
            children: ArcSwap::from_pointee(Vec::new()),
            children_lock: Mutex::new(()),
            cluster_node: OnceCell::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_entrance(&self) -> bool {
        self.kind == NodeKind::Entrance
    }

    pub fn resource(&self) -> &ResourceWrapper {
        &self.resource
    }

    /// The process-wide node for this resource, once the cluster builder ran.
    pub fn cluster_node(&self) -> Option<&Arc<ClusterNode>> {
        self.cluster_node.get()
    }

    /// Attaches the cluster node. A node keeps the first cluster node it is given.
    pub fn set_cluster_node(&self, cluster_node: Arc<ClusterNode>) {
        let _ = self.cluster_node.set(cluster_node);
    }

    pub fn children(&self) -> Arc<Vec<Arc<DefaultNode>>> {
        self.children.load_full()
    }

    /// Links `child` below this node unless it is already linked.
    pub fn add_child(&self, child: Arc<DefaultNode>) {
        if self.has_child(&child) {
            return;
        }
        let _guard = self
            .children_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.has_child(&child) {
            return;
        }
        let current = self.children.load();
        let mut updated = Vec::with_capacity(current.len() + 1);
        updated.extend(current.iter().cloned());
        updated.push(child);
        self.children.store(Arc::new(updated));
    }

    fn has_child(&self, child: &Arc<DefaultNode>) -> bool {
        self.children.load().iter().any(|c| Arc::ptr_eq(c, child))
    }

    fn sum_children(&self, f: impl Fn(&DefaultNode) -> f64) -> f64 {
        self.children.load().iter().map(|c| f(c.as_ref())).sum()
    }
}

impl Node for DefaultNode {
    fn total_request(&self) -> u64 {
        match self.kind {
            NodeKind::Entrance => self.children.load().iter().map(|c| c.total_request()).sum(),
            NodeKind::Default => self.stat.total_request(),
        }
    }

    fn pass_qps(&self) -> f64 {
        match self.kind {
            NodeKind::Entrance => self.sum_children(|c| c.pass_qps()),
            NodeKind::Default => self.stat.pass_qps(),
        }
    }

    fn block_qps(&self) -> f64 {
        match self.kind {
            NodeKind::Entrance => self.sum_children(|c| c.block_qps()),
            NodeKind::Default => self.stat.block_qps(),
        }
    }

    fn success_qps(&self) -> f64 {
        match self.kind {
            NodeKind::Entrance => self.sum_children(|c| c.success_qps()),
            NodeKind::Default => self.stat.success_qps(),
        }
    }

    fn max_success_qps(&self) -> f64 {
        match self.kind {
            NodeKind::Entrance => self.sum_children(|c| c.max_success_qps()),
            NodeKind::Default => self.stat.max_success_qps(),
        }
    }

    fn exception_qps(&self) -> f64 {
        match self.kind {
            NodeKind::Entrance => self.sum_children(|c| c.exception_qps()),
            NodeKind::Default => self.stat.exception_qps(),
        }
    }

    fn avg_rt(&self) -> f64 {
        match self.kind {
            NodeKind::Entrance => {
                // Weighted by each child's completed requests.
                let success = self.success_qps();
                if success <= 0.0 {
                    return 0.0;
                }
                self.sum_children(|c| c.avg_rt() * c.success_qps()) / success
            }
            NodeKind::Default => self.stat.avg_rt(),
        }
    }

    fn min_rt(&self) -> f64 {
        self.stat.min_rt()
    }

    fn cur_thread_num(&self) -> u32 {
        match self.kind {
            NodeKind::Entrance => self.children.load().iter().map(|c| c.cur_thread_num()).sum(),
            NodeKind::Default => self.stat.cur_thread_num(),
        }
    }

    fn previous_pass_qps(&self) -> f64 {
        self.stat.previous_pass_qps()
    }

    fn previous_block_qps(&self) -> f64 {
        self.stat.previous_block_qps()
    }

    fn add_pass_request(&self, count: u32) {
        self.stat.add_pass_request(count);
        if let Some(cluster) = self.cluster_node.get() {
            cluster.add_pass_request(count);
        }
    }

    fn add_block_request(&self, count: u32) {
        self.stat.add_block_request(count);
        if let Some(cluster) = self.cluster_node.get() {
            cluster.add_block_request(count);
        }
    }

    fn add_rt_and_success(&self, rt_ms: u64, success_count: u32) {
        self.stat.add_rt_and_success(rt_ms, success_count);
        if let Some(cluster) = self.cluster_node.get() {
            cluster.add_rt_and_success(rt_ms, success_count);
        }
    }

    fn increase_exception_qps(&self, count: u32) {
        self.stat.increase_exception_qps(count);
        if let Some(cluster) = self.cluster_node.get() {
            cluster.increase_exception_qps(count);
        }
    }

    fn increase_thread_num(&self) {
        self.stat.increase_thread_num();
        if let Some(cluster) = self.cluster_node.get() {
            cluster.increase_thread_num();
        }
    }

    fn decrease_thread_num(&self) {
        self.stat.decrease_thread_num();
        if let Some(cluster) = self.cluster_node.get() {
            cluster.decrease_thread_num();
        }
    }

    fn reset(&self) {
        self.stat.reset();
    }
}
