use std::sync::atomic::{AtomicI64, Ordering};

use super::throttling::{ThrottlingController, NEVER_PASSED};
use super::TrafficShapingController;
use crate::node::window::current_time_millis;
use crate::node::Node;

/// Cold-start controller.
///
/// Keeps a token store that fills while traffic is light. A full store means the
/// system is cold and the allowed rate starts at `count / cold_factor`, rising to
/// `count` as traffic drains the store over `warm_up_period_sec`.
///
/// Built with [`WarmUpController::throttled`] it additionally spaces passed
/// requests uniformly at the current warm-up rate.
#[derive(Debug)]
pub struct WarmUpController {
    count: f64,
    cold_factor: f64,
    warning_token: i64,
    max_token: i64,
    slope: f64,
    stored_tokens: AtomicI64,
    last_filled_ms: AtomicI64,
    queueing: Option<Queueing>,
}

#[derive(Debug)]
struct Queueing {
    max_queueing_time_ms: i64,
    latest_passed_ms: AtomicI64,
}

impl WarmUpController {
    pub fn new(count: f64, warm_up_period_sec: u32, cold_factor: u32) -> Self {
        // A cold factor of 1 would make the warning band empty.
        let cold_factor = cold_factor.max(2) as f64;
        let period = warm_up_period_sec as f64;
        let warning_token = ((period * count) as i64 as f64 / (cold_factor - 1.0)) as i64;
        let max_token = warning_token + (2.0 * period * count / (1.0 + cold_factor)) as i64;
        let band = (max_token - warning_token).max(1) as f64;
        let slope = if count > 0.0 {
            (cold_factor - 1.0) / count / band
        } else {
            0.0
        };
        Self {
            count,
            cold_factor,
            warning_token,
            max_token,
            slope,
            stored_tokens: AtomicI64::new(max_token),
            last_filled_ms: AtomicI64::new(0),
            queueing: None,
        }
    }

    pub fn throttled(
        count: f64,
        warm_up_period_sec: u32,
        max_queueing_time_ms: u32,
        cold_factor: u32,
    ) -> Self {
        Self {
            queueing: Some(Queueing {
                max_queueing_time_ms: max_queueing_time_ms as i64,
                latest_passed_ms: AtomicI64::new(NEVER_PASSED),
            }),
            ..Self::new(count, warm_up_period_sec, cold_factor)
        }
    }

    pub fn stored_tokens(&self) -> i64 {
        self.stored_tokens.load(Ordering::Acquire)
    }

    /// Rate currently allowed given the stored tokens.
    fn allowed_qps(&self, rest_token: i64) -> f64 {
        if rest_token >= self.warning_token && self.count > 0.0 {
            let above = (rest_token - self.warning_token) as f64;
            1.0 / (above * self.slope + 1.0 / self.count)
        } else {
            self.count
        }
    }

    fn sync_token(&self, previous_qps: i64) {
        let now = current_time_millis() as i64;
        let current = now - now % 1000;
        let last = self.last_filled_ms.load(Ordering::Acquire);
        if current <= last {
            return;
        }
        let old = self.stored_tokens.load(Ordering::Acquire);
        let refilled = self.cool_down_tokens(old, current, last, previous_qps);
        if self
            .stored_tokens
            .compare_exchange(old, refilled, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let remaining =
                self.stored_tokens.fetch_sub(previous_qps, Ordering::AcqRel) - previous_qps;
            if remaining < 0 {
                self.stored_tokens.store(0, Ordering::Release);
            }
            self.last_filled_ms.store(current, Ordering::Release);
        }
    }

    fn cool_down_tokens(&self, old: i64, current: i64, last: i64, previous_qps: i64) -> i64 {
        let refill = ((current - last) as f64 * self.count / 1000.0) as i64;
        let mut value = old;
        if old < self.warning_token {
            value = old + refill;
        } else if old > self.warning_token && (previous_qps as f64) < self.count / self.cold_factor {
            value = old + refill;
        }
        value.min(self.max_token)
    }
}

impl TrafficShapingController for WarmUpController {
    fn can_pass(&self, node: &dyn Node, acquire_count: u32, _prioritized: bool) -> bool {
        let previous_qps = node.previous_pass_qps() as i64;
        self.sync_token(previous_qps);
        let allowed = self.allowed_qps(self.stored_tokens.load(Ordering::Acquire));

        match &self.queueing {
            None => node.pass_qps() + acquire_count as f64 <= allowed,
            Some(q) => {
                if acquire_count == 0 {
                    return true;
                }
                if allowed <= 0.0 {
                    return false;
                }
                let cost = ThrottlingController::cost_ms(acquire_count, allowed);
                ThrottlingController::reserve(&q.latest_passed_ms, cost, q.max_queueing_time_ms)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::StatisticNode;

    #[test]
    fn test_token_bands() {
        let ctl = WarmUpController::new(10.0, 10, 3);
        assert_eq!(ctl.warning_token, 50);
        assert_eq!(ctl.max_token, 100);
        assert_eq!(ctl.stored_tokens(), 100);
    }

    #[test]
    fn test_cold_start_limits_below_threshold() {
        let ctl = WarmUpController::new(10.0, 10, 3);
        let node = StatisticNode::default();
        // Cold: allowed rate is count / cold_factor.
        assert!((ctl.allowed_qps(100) - 10.0 / 3.0).abs() < 1e-9);
        assert!(ctl.can_pass(&node, 1, false));

        node.add_pass_request(5);
        assert!(!ctl.can_pass(&node, 1, false));
    }

    #[test]
    fn test_warm_rate_reaches_count() {
        let ctl = WarmUpController::new(10.0, 10, 3);
        assert_eq!(ctl.allowed_qps(ctl.warning_token - 1), 10.0);
        assert!((ctl.allowed_qps(ctl.warning_token) - 10.0).abs() < 1e-9);
    }
}
