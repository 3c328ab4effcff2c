//! Traffic-shaping controllers.
//!
//! A controller answers whether `acquire_count` more requests may pass given the
//! counters of the node selected for a rule. Controllers never write to the node;
//! recording what passed is the statistic slot's job. Any state a controller keeps
//! of its own (a queueing clock, a warm-up token store) is atomic.

mod default;
mod throttling;
mod warm_up;

pub use default::DefaultController;
pub use throttling::ThrottlingController;
pub use warm_up::WarmUpController;

use crate::node::Node;
use std::fmt::Debug;

pub trait TrafficShapingController: Send + Sync + Debug {
    fn can_pass(&self, node: &dyn Node, acquire_count: u32, prioritized: bool) -> bool;
}
