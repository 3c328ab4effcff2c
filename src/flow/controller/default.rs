use super::TrafficShapingController;
use crate::flow::FlowGrade;
use crate::node::Node;

/// Rejects as soon as the current value plus the request exceeds the threshold.
#[derive(Debug, Clone)]
pub struct DefaultController {
    count: f64,
    grade: FlowGrade,
}

impl DefaultController {
    pub fn new(count: f64, grade: FlowGrade) -> Self {
        Self { count, grade }
    }

    fn current(&self, node: &dyn Node) -> f64 {
        match self.grade {
            FlowGrade::Thread => node.cur_thread_num() as f64,
            FlowGrade::Qps => node.pass_qps(),
        }
    }
}

impl TrafficShapingController for DefaultController {
    fn can_pass(&self, node: &dyn Node, acquire_count: u32, _prioritized: bool) -> bool {
        self.current(node) + acquire_count as f64 <= self.count
    }
}
