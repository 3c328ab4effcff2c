//! 统计节点树：入口节点、默认节点与集群节点。
//!
//! # Statistics Node Tree
//!
//! Every invocation is counted on a small tree of nodes:
//!
//! | Node | Scope |
//! |------|-------|
//! | [`DefaultNode`] (entrance kind) | root of one named call context |
//! | [`DefaultNode`] (default kind) | one resource within one call context |
//! | [`ClusterNode`] | one resource, process-wide, across all contexts |
//! | [`StatisticNode`] | raw counters; also used for per-origin sub-nodes |
//!
//! A `DefaultNode` writes through to its `ClusterNode`, so the cluster node always
//! reflects the sum over every context in which the resource appears. Cluster nodes
//! are unique per [`ResourceWrapper`](crate::resource::ResourceWrapper) and live in a
//! [`ClusterNodeRegistry`].

mod cluster_node;
mod default_node;
mod registry;
mod statistic;
pub mod window;

pub use cluster_node::ClusterNode;
pub use default_node::{DefaultNode, NodeKind};
pub use registry::ClusterNodeRegistry;
pub use statistic::StatisticNode;
pub use window::WindowSpec;

use std::fmt::Debug;

/// Read and write access to the counters of some scope.
///
/// Implementations must be safe to update from many threads at once without any
/// coordination beyond the counters themselves.
pub trait Node: Send + Sync + Debug {
    /// Passed plus blocked requests within the last minute.
    fn total_request(&self) -> u64;
    fn pass_qps(&self) -> f64;
    fn block_qps(&self) -> f64;
    fn total_qps(&self) -> f64 {
        self.pass_qps() + self.block_qps()
    }
    fn success_qps(&self) -> f64;
    fn max_success_qps(&self) -> f64;
    fn exception_qps(&self) -> f64;
    /// Average response time (ms) of completed requests in the current window.
    fn avg_rt(&self) -> f64;
    fn min_rt(&self) -> f64;
    /// Requests currently admitted and not yet exited.
    fn cur_thread_num(&self) -> u32;
    /// Passed requests during the previous one-second slice.
    fn previous_pass_qps(&self) -> f64;
    fn previous_block_qps(&self) -> f64;

    fn add_pass_request(&self, count: u32);
    fn add_block_request(&self, count: u32);
    fn add_rt_and_success(&self, rt_ms: u64, success_count: u32);
    fn increase_exception_qps(&self, count: u32);
    fn increase_thread_num(&self);
    fn decrease_thread_num(&self);
    fn reset(&self);
}
