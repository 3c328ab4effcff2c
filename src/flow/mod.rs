//! Flow control: rules, the rule manager, the checker and traffic shaping.
//!
//! A [`FlowRule`] names a resource, a caller filter (`limit_app`), a node
//! selection strategy and a threshold. The [`FlowRuleChecker`] picks the
//! statistics node each applicable rule is evaluated against and asks the rule's
//! [`TrafficShapingController`] whether the request fits. Rules marked cluster
//! mode ask a token service first and fall back to the local check when it cannot
//! answer.

mod checker;
pub mod controller;
mod manager;
mod rule;

pub use checker::{FlowRequest, FlowRuleChecker};
pub use controller::{
    DefaultController, ThrottlingController, TrafficShapingController, WarmUpController,
};
pub use manager::{FlowRuleManager, FlowRuleProvider, RuleSet};
pub use rule::{
    build_controller, ClusterFlowConfig, ClusterThresholdType, ControlBehavior, FlowGrade,
    FlowRule, FlowStrategy, DEFAULT_COLD_FACTOR, LIMIT_APP_DEFAULT, LIMIT_APP_OTHER,
};
