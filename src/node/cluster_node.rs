use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::statistic::StatisticNode;
use super::window::WindowSpec;
use super::Node;
use crate::resource::ResourceType;

/// Process-wide statistics for one resource, aggregated over every context.
///
/// Also owns one [`StatisticNode`] per caller origin seen on this resource. The
/// origin map is published copy-on-write: lookups never take a lock, creation of a
/// new origin takes `origin_lock` and swaps in a new map.
#[derive(Debug)]
pub struct ClusterNode {
    name: String,
    resource_type: ResourceType,
    stat: StatisticNode,
    origins: ArcSwap<HashMap<String, Arc<StatisticNode>>>,
    origin_lock: Mutex<()>,
}

impl ClusterNode {
    pub fn new(name: impl Into<String>, resource_type: ResourceType, window: WindowSpec) -> Self {
        Self {
            name: name.into(),
            resource_type,
            stat: StatisticNode::new(window),
            origins: ArcSwap::from_pointee(HashMap::new()),
            origin_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn origin_node(&self, origin: &str) -> Option<Arc<StatisticNode>> {
        self.origins.load().get(origin).cloned()
    }

    /// Returns the counters for `origin`, creating them on first sight.
    pub fn get_or_create_origin_node(&self, origin: &str) -> Arc<StatisticNode> {
        if let Some(node) = self.origin_node(origin) {
            return node;
        }
        let _guard = self
            .origin_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.origins.load();
        if let Some(node) = current.get(origin) {
            return Arc::clone(node);
        }
        let node = Arc::new(StatisticNode::new(self.stat.window_spec()));
        let mut updated = HashMap::with_capacity(current.len() + 1);
        for (k, v) in current.iter() {
            updated.insert(k.clone(), Arc::clone(v));
        }
        updated.insert(origin.to_string(), Arc::clone(&node));
        self.origins.store(Arc::new(updated));
        tracing::debug!(resource = %self.name, origin, "created origin node");
        node
    }

    /// Snapshot of every origin node. Never blocks writers.
    pub fn origin_nodes(&self) -> Arc<HashMap<String, Arc<StatisticNode>>> {
        self.origins.load_full()
    }
}

impl Node for ClusterNode {
    fn total_request(&self) -> u64 {
        self.stat.total_request()
    }
    fn pass_qps(&self) -> f64 {
        self.stat.pass_qps()
    }
    fn block_qps(&self) -> f64 {
        self.stat.block_qps()
    }
    fn success_qps(&self) -> f64 {
        self.stat.success_qps()
    }
    fn max_success_qps(&self) -> f64 {
        self.stat.max_success_qps()
    }
    fn exception_qps(&self) -> f64 {
        self.stat.exception_qps()
    }
    fn avg_rt(&self) -> f64 {
        self.stat.avg_rt()
    }
    fn min_rt(&self) -> f64 {
        self.stat.min_rt()
    }
    fn cur_thread_num(&self) -> u32 {
        self.stat.cur_thread_num()
    }
    fn previous_pass_qps(&self) -> f64 {
        self.stat.previous_pass_qps()
    }
    fn previous_block_qps(&self) -> f64 {
        self.stat.previous_block_qps()
    }
    fn add_pass_request(&self, count: u32) {
        self.stat.add_pass_request(count)
    }
    fn add_block_request(&self, count: u32) {
        self.stat.add_block_request(count)
    }
    fn add_rt_and_success(&self, rt_ms: u64, success_count: u32) {
        self.stat.add_rt_and_success(rt_ms, success_count)
    }
    fn increase_exception_qps(&self, count: u32) {
        self.stat.increase_exception_qps(count)
    }
    fn increase_thread_num(&self) {
        self.stat.increase_thread_num()
    }
    fn decrease_thread_num(&self) {
        self.stat.decrease_thread_num()
    }
    fn reset(&self) {
        self.stat.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_origin_node_created_once() {
        let cn = ClusterNode::new("getUser", ResourceType::Rpc, WindowSpec::default());
        assert!(cn.origin_node("appA").is_none());

        let a1 = cn.get_or_create_origin_node("appA");
        let a2 = cn.get_or_create_origin_node("appA");
        assert!(Arc::ptr_eq(&a1, &a2));
        assert_eq!(cn.origin_nodes().len(), 1);
        assert_eq!(cn.resource_type(), ResourceType::Rpc);
    }

    #[test]
    fn test_old_snapshot_stays_consistent() {
        let cn = ClusterNode::new("getUser", ResourceType::Common, WindowSpec::default());
        cn.get_or_create_origin_node("appA");
        let before = cn.origin_nodes();
        cn.get_or_create_origin_node("appB");
        assert_eq!(before.len(), 1);
        assert_eq!(cn.origin_nodes().len(), 2);
    }

    #[test]
    fn test_concurrent_origin_creation() {
        let cn = Arc::new(ClusterNode::new("getUser", ResourceType::Common, WindowSpec::default()));
        let mut handles = vec![];
        for i in 0..16 {
            let cn = Arc::clone(&cn);
            handles.push(thread::spawn(move || {
                let origin = format!("app{}", i % 4);
                Arc::as_ptr(&cn.get_or_create_origin_node(&origin)) as usize
            }));
        }
        let ptrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(cn.origin_nodes().len(), 4);
        for (i, p) in ptrs.iter().enumerate() {
            let expected = cn.origin_node(&format!("app{}", i % 4)).unwrap();
            assert_eq!(*p, Arc::as_ptr(&expected) as usize);
        }
    }
}
