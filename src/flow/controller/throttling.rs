use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use super::TrafficShapingController;
use crate::node::window::current_time_millis;
use crate::node::Node;

// Far enough in the past that the first request never queues.
pub(crate) const NEVER_PASSED: i64 = i64::MIN / 2;

/// Spaces passed requests uniformly at `count` per second.
///
/// A request arriving early reserves the next free slot and sleeps until it; if the
/// wait would exceed `max_queueing_time_ms` it is rejected instead.
#[derive(Debug)]
pub struct ThrottlingController {
    max_queueing_time_ms: i64,
    count: f64,
    latest_passed_ms: AtomicI64,
}

impl ThrottlingController {
    pub fn new(max_queueing_time_ms: u32, count: f64) -> Self {
        Self {
            max_queueing_time_ms: max_queueing_time_ms as i64,
            count,
            latest_passed_ms: AtomicI64::new(NEVER_PASSED),
        }
    }

    pub(crate) fn cost_ms(acquire_count: u32, rate: f64) -> i64 {
        (acquire_count as f64 / rate * 1000.0).round() as i64
    }

    /// Reserves a slot `cost_ms` after the previous one, sleeping until it.
    pub(crate) fn reserve(
        latest_passed_ms: &AtomicI64,
        cost_ms: i64,
        max_queueing_time_ms: i64,
    ) -> bool {
        let now = current_time_millis() as i64;
        let latest = latest_passed_ms.load(Ordering::Acquire);
        if latest + cost_ms <= now {
            latest_passed_ms.store(now, Ordering::Release);
            return true;
        }
        if latest + cost_ms - now > max_queueing_time_ms {
            return false;
        }
        let reserved = latest_passed_ms.fetch_add(cost_ms, Ordering::AcqRel) + cost_ms;
        let wait = reserved - current_time_millis() as i64;
        if wait > max_queueing_time_ms {
            latest_passed_ms.fetch_sub(cost_ms, Ordering::AcqRel);
            return false;
        }
        if wait > 0 {
            std::thread::sleep(Duration::from_millis(wait as u64));
        }
        true
    }
}

impl TrafficShapingController for ThrottlingController {
    fn can_pass(&self, _node: &dyn Node, acquire_count: u32, _prioritized: bool) -> bool {
        if acquire_count == 0 {
            return true;
        }
        if self.count <= 0.0 {
            return false;
        }
        let cost = Self::cost_ms(acquire_count, self.count);
        Self::reserve(&self.latest_passed_ms, cost, self.max_queueing_time_ms)
    }
}
