//! Flow rule definitions.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::controller::{
    DefaultController, ThrottlingController, TrafficShapingController, WarmUpController,
};

/// Limit app matching every caller.
pub const LIMIT_APP_DEFAULT: &str = "default";
/// Limit app matching callers not named by another rule on the same resource.
pub const LIMIT_APP_OTHER: &str = "other";

pub const DEFAULT_COLD_FACTOR: u32 = 3;

/// What a rule's threshold counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowGrade {
    /// Concurrent in-flight requests.
    Thread,
    /// Passed requests per second.
    #[default]
    Qps,
}

/// Which statistics node a rule is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowStrategy {
    /// The resource's own counters.
    #[default]
    Direct,
    /// Another resource's process-wide counters.
    Relate,
    /// The resource's counters within one named context.
    Chain,
}

/// Traffic-shaping behaviour applied once a node is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ControlBehavior {
    /// Reject immediately above the threshold.
    #[default]
    Reject,
    /// Ramp the threshold up from a cold start.
    WarmUp,
    /// Space requests uniformly, queueing up to a bound.
    Throttling,
    /// Warm-up threshold combined with uniform spacing.
    WarmUpThrottling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusterThresholdType {
    /// Threshold is per client and scaled by the number of connected clients.
    #[default]
    AvgLocal,
    /// Threshold is global across the cluster.
    Global,
}

/// Cluster-mode settings of a flow rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterFlowConfig {
    /// Globally unique id of the rule on the token server.
    pub flow_id: u64,
    #[serde(default)]
    pub threshold_type: ClusterThresholdType,
    /// Evaluate locally when the token service cannot answer; otherwise pass.
    #[serde(default = "default_true")]
    pub fallback_to_local_when_fail: bool,
}

fn default_true() -> bool {
    true
}

impl ClusterFlowConfig {
    pub fn new(flow_id: u64) -> Self {
        Self {
            flow_id,
            threshold_type: ClusterThresholdType::AvgLocal,
            fallback_to_local_when_fail: true,
        }
    }

    pub fn with_fallback_to_local(mut self, fallback: bool) -> Self {
        self.fallback_to_local_when_fail = fallback;
        self
    }

    pub fn with_threshold_type(mut self, threshold_type: ClusterThresholdType) -> Self {
        self.threshold_type = threshold_type;
        self
    }
}

/// A flow-control rule for one resource.
///
/// Rules are read-only once loaded. The traffic-shaping controller is built from
/// the rule's settings by [`FlowRule::prepared`]; rules deserialized from config
/// get theirs when handed to the rule manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowRule {
    pub id: Option<u64>,
    pub resource: String,
    /// Caller filter: a specific app name, `"default"` or `"other"`. A rule with no
    /// limit app never applies.
    pub limit_app: Option<String>,
    pub grade: FlowGrade,
    /// Threshold, in requests per second or concurrent requests depending on grade.
    pub count: f64,
    pub strategy: FlowStrategy,
    /// Related resource for [`FlowStrategy::Relate`], context name for [`FlowStrategy::Chain`].
    pub ref_resource: Option<String>,
    pub control_behavior: ControlBehavior,
    pub warm_up_period_sec: u32,
    pub max_queueing_time_ms: u32,
    pub cluster_mode: bool,
    pub cluster_config: Option<ClusterFlowConfig>,
    #[serde(skip)]
    controller: Option<Arc<dyn TrafficShapingController>>,
}

impl Default for FlowRule {
    fn default() -> Self {
        Self {
            id: None,
            resource: String::new(),
            limit_app: Some(LIMIT_APP_DEFAULT.to_string()),
            grade: FlowGrade::Qps,
            count: 0.0,
            strategy: FlowStrategy::Direct,
            ref_resource: None,
            control_behavior: ControlBehavior::Reject,
            warm_up_period_sec: 10,
            max_queueing_time_ms: 500,
            cluster_mode: false,
            cluster_config: None,
            controller: None,
        }
    }
}

impl FlowRule {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..Self::default()
        }
    }

    pub fn with_count(mut self, count: f64) -> Self {
        self.count = count;
        self
    }

    pub fn with_grade(mut self, grade: FlowGrade) -> Self {
        self.grade = grade;
        self
    }

    pub fn with_limit_app(mut self, limit_app: impl Into<String>) -> Self {
        self.limit_app = Some(limit_app.into());
        self
    }

    pub fn without_limit_app(mut self) -> Self {
        self.limit_app = None;
        self
    }

    pub fn with_strategy(mut self, strategy: FlowStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_ref_resource(mut self, ref_resource: impl Into<String>) -> Self {
        self.ref_resource = Some(ref_resource.into());
        self
    }

    pub fn with_control_behavior(mut self, behavior: ControlBehavior) -> Self {
        self.control_behavior = behavior;
        self
    }

    pub fn with_warm_up_period_sec(mut self, secs: u32) -> Self {
        self.warm_up_period_sec = secs;
        self
    }

    pub fn with_max_queueing_time_ms(mut self, ms: u32) -> Self {
        self.max_queueing_time_ms = ms;
        self
    }

    pub fn with_cluster_config(mut self, config: ClusterFlowConfig) -> Self {
        self.cluster_mode = true;
        self.cluster_config = Some(config);
        self
    }

    /// Overrides the controller the rule would otherwise build for itself.
    pub fn with_controller(mut self, controller: Arc<dyn TrafficShapingController>) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn is_cluster_mode(&self) -> bool {
        self.cluster_mode
    }

    pub fn fallback_to_local_when_fail(&self) -> bool {
        self.cluster_config
            .as_ref()
            .map(|c| c.fallback_to_local_when_fail)
            .unwrap_or(true)
    }

    /// Returns the rule with its controller built, keeping one set explicitly.
    pub fn prepared(self, cold_factor: u32) -> Self {
        if self.controller.is_some() {
            return self;
        }
        let controller = build_controller(&self, cold_factor);
        Self {
            controller: Some(controller),
            ..self
        }
    }

    pub fn controller(&self) -> Option<&Arc<dyn TrafficShapingController>> {
        self.controller.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        if self.resource.is_empty() || !self.count.is_finite() || self.count < 0.0 {
            return false;
        }
        if self.strategy != FlowStrategy::Direct
            && self.ref_resource.as_deref().map_or(true, str::is_empty)
        {
            return false;
        }
        if self.cluster_mode && self.cluster_config.is_none() {
            return false;
        }
        match self.control_behavior {
            ControlBehavior::WarmUp | ControlBehavior::WarmUpThrottling => {
                self.grade == FlowGrade::Qps && self.warm_up_period_sec > 0
            }
            ControlBehavior::Throttling => self.grade == FlowGrade::Qps,
            ControlBehavior::Reject => true,
        }
    }
}

/// Builds the traffic-shaping controller matching a rule's settings.
///
/// Thread-grade rules always reject immediately; queueing and warm-up only make
/// sense for a rate.
pub fn build_controller(rule: &FlowRule, cold_factor: u32) -> Arc<dyn TrafficShapingController> {
    if rule.grade == FlowGrade::Qps {
        match rule.control_behavior {
            ControlBehavior::WarmUp => {
                return Arc::new(WarmUpController::new(
                    rule.count,
                    rule.warm_up_period_sec,
                    cold_factor,
                ));
            }
            ControlBehavior::Throttling => {
                return Arc::new(ThrottlingController::new(
                    rule.max_queueing_time_ms,
                    rule.count,
                ));
            }
            ControlBehavior::WarmUpThrottling => {
                return Arc::new(WarmUpController::throttled(
                    rule.count,
                    rule.warm_up_period_sec,
                    rule.max_queueing_time_ms,
                    cold_factor,
                ));
            }
            ControlBehavior::Reject => {}
        }
    }
    Arc::new(DefaultController::new(rule.count, rule.grade))
}
