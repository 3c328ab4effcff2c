use std::sync::atomic::{AtomicI64, Ordering};

use super::window::{current_time_millis, MetricEvent, SlidingWindow, WindowSpec};
use super::Node;

/// Raw counters for one scope: a second-level rolling window, a minute-level
/// rolling window and a live thread count.
#[derive(Debug)]
pub struct StatisticNode {
    second: SlidingWindow,
    minute: SlidingWindow,
    threads: AtomicI64,
}

impl StatisticNode {
    pub fn new(spec: WindowSpec) -> Self {
        Self {
            second: SlidingWindow::new(spec),
            minute: SlidingWindow::new(WindowSpec::minute()),
            threads: AtomicI64::new(0),
        }
    }

    pub fn window_spec(&self) -> WindowSpec {
        self.second.spec()
    }

    fn per_second(&self, event: MetricEvent) -> f64 {
        self.second.sum(event) as f64 / self.second.spec().interval_sec()
    }
}

impl Default for StatisticNode {
    fn default() -> Self {
        Self::new(WindowSpec::default())
    }
}

impl Node for StatisticNode {
    fn total_request(&self) -> u64 {
        let now = current_time_millis();
        self.minute.sum_at(now, MetricEvent::Pass) + self.minute.sum_at(now, MetricEvent::Block)
    }

    fn pass_qps(&self) -> f64 {
        self.per_second(MetricEvent::Pass)
    }

    fn block_qps(&self) -> f64 {
        self.per_second(MetricEvent::Block)
    }

    fn success_qps(&self) -> f64 {
        self.per_second(MetricEvent::Success)
    }

    fn max_success_qps(&self) -> f64 {
        let spec = self.second.spec();
        let max = self.second.max_at(current_time_millis(), MetricEvent::Success);
        max as f64 * spec.sample_count as f64 / spec.interval_sec()
    }

    fn exception_qps(&self) -> f64 {
        self.per_second(MetricEvent::Exception)
    }

    fn avg_rt(&self) -> f64 {
        let now = current_time_millis();
        let success = self.second.sum_at(now, MetricEvent::Success);
        if success == 0 {
            return 0.0;
        }
        self.second.sum_at(now, MetricEvent::Rt) as f64 / success as f64
    }

    fn min_rt(&self) -> f64 {
        self.second
            .min_rt_at(current_time_millis())
            .map(|rt| rt as f64)
            .unwrap_or(0.0)
    }

    fn cur_thread_num(&self) -> u32 {
        self.threads.load(Ordering::Acquire).max(0) as u32
    }

    fn previous_pass_qps(&self) -> f64 {
        self.minute
            .previous_at(current_time_millis(), MetricEvent::Pass) as f64
    }

    fn previous_block_qps(&self) -> f64 {
        self.minute
            .previous_at(current_time_millis(), MetricEvent::Block) as f64
    }

    fn add_pass_request(&self, count: u32) {
        let now = current_time_millis();
        self.second.add_at(now, MetricEvent::Pass, count as u64);
        self.minute.add_at(now, MetricEvent::Pass, count as u64);
    }

    fn add_block_request(&self, count: u32) {
        let now = current_time_millis();
        self.second.add_at(now, MetricEvent::Block, count as u64);
        self.minute.add_at(now, MetricEvent::Block, count as u64);
    }

    fn add_rt_and_success(&self, rt_ms: u64, success_count: u32) {
        let now = current_time_millis();
        self.second.add_at(now, MetricEvent::Success, success_count as u64);
        self.second.add_rt_at(now, rt_ms);
        self.minute.add_at(now, MetricEvent::Success, success_count as u64);
        self.minute.add_rt_at(now, rt_ms);
    }

    fn increase_exception_qps(&self, count: u32) {
        let now = current_time_millis();
        self.second.add_at(now, MetricEvent::Exception, count as u64);
        self.minute.add_at(now, MetricEvent::Exception, count as u64);
    }

    fn increase_thread_num(&self) {
        self.threads.fetch_add(1, Ordering::AcqRel);
    }

    fn decrease_thread_num(&self) {
        self.threads.fetch_sub(1, Ordering::AcqRel);
    }

    fn reset(&self) {
        self.second.reset();
        self.minute.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_and_block_counts() {
        let node = StatisticNode::default();
        node.add_pass_request(3);
        node.add_block_request(1);
        assert_eq!(node.pass_qps(), 3.0);
        assert_eq!(node.block_qps(), 1.0);
        assert_eq!(node.total_qps(), 4.0);
        assert_eq!(node.total_request(), 4);
    }

    #[test]
    fn test_avg_rt() {
        let node = StatisticNode::default();
        assert_eq!(node.avg_rt(), 0.0);
        node.add_rt_and_success(10, 1);
        node.add_rt_and_success(30, 1);
        assert_eq!(node.avg_rt(), 20.0);
        assert_eq!(node.success_qps(), 2.0);
        assert_eq!(node.min_rt(), 10.0);
    }

    #[test]
    fn test_thread_num_never_negative() {
        let node = StatisticNode::default();
        node.increase_thread_num();
        assert_eq!(node.cur_thread_num(), 1);
        node.decrease_thread_num();
        node.decrease_thread_num();
        assert_eq!(node.cur_thread_num(), 0);
    }

    #[test]
    fn test_qps_scales_with_interval() {
        let node = StatisticNode::new(WindowSpec::new(4, 2000));
        node.add_pass_request(6);
        assert_eq!(node.pass_qps(), 3.0);
    }

    #[test]
    fn test_reset() {
        let node = StatisticNode::default();
        node.add_pass_request(5);
        node.increase_exception_qps(2);
        node.reset();
        assert_eq!(node.pass_qps(), 0.0);
        assert_eq!(node.exception_qps(), 0.0);
    }
}
