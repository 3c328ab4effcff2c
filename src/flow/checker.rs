use std::sync::Arc;
use std::time::Duration;

use super::manager::{is_other_origin_in, is_specific_app, FlowRuleProvider};
use super::rule::{build_controller, FlowRule, FlowStrategy, LIMIT_APP_DEFAULT, LIMIT_APP_OTHER};
use crate::cluster::{ClusterTokenServices, TokenResult, TokenResultStatus};
use crate::context::Context;
use crate::error::BlockError;
use crate::node::{ClusterNodeRegistry, DefaultNode, Node, StatisticNode};

/// Inputs of one rule evaluation.
///
/// Built from a [`Context`] by [`FlowRuleChecker::check_flow`]; can also be built
/// by hand to evaluate rules outside a slot chain.
#[derive(Debug, Clone)]
pub struct FlowRequest<'a> {
    pub context_name: &'a str,
    pub origin: &'a str,
    /// Per-caller node of the current entry, set when the context has an origin.
    pub origin_node: Option<Arc<StatisticNode>>,
    /// The resource's node within the current context.
    pub node: &'a Arc<DefaultNode>,
    pub acquire_count: u32,
    pub prioritized: bool,
    /// Every rule configured for the resource, for `"other"` matching.
    pub resource_rules: &'a [Arc<FlowRule>],
}

impl<'a> FlowRequest<'a> {
    pub fn new(context_name: &'a str, node: &'a Arc<DefaultNode>) -> Self {
        Self {
            context_name,
            origin: "",
            origin_node: None,
            node,
            acquire_count: 1,
            prioritized: false,
            resource_rules: &[],
        }
    }

    pub fn with_origin(mut self, origin: &'a str, origin_node: Option<Arc<StatisticNode>>) -> Self {
        self.origin = origin;
        self.origin_node = origin_node;
        self
    }

    pub fn with_acquire_count(mut self, count: u32) -> Self {
        self.acquire_count = count;
        self
    }

    pub fn with_prioritized(mut self, prioritized: bool) -> Self {
        self.prioritized = prioritized;
        self
    }

    pub fn with_resource_rules(mut self, rules: &'a [Arc<FlowRule>]) -> Self {
        self.resource_rules = rules;
        self
    }
}

/// Evaluates flow rules for a request.
pub struct FlowRuleChecker {
    cluster_nodes: Arc<ClusterNodeRegistry>,
    token_services: Arc<ClusterTokenServices>,
    cold_factor: u32,
}

impl FlowRuleChecker {
    pub fn new(
        cluster_nodes: Arc<ClusterNodeRegistry>,
        token_services: Arc<ClusterTokenServices>,
        cold_factor: u32,
    ) -> Self {
        Self {
            cluster_nodes,
            token_services,
            cold_factor,
        }
    }

    /// Checks every rule `provider` has for `resource`, in order. The first rule
    /// that rejects ends the check with [`BlockError::Flow`].
    pub fn check_flow(
        &self,
        provider: &dyn FlowRuleProvider,
        resource: &str,
        ctx: &Context,
        node: &Arc<DefaultNode>,
        acquire_count: u32,
        prioritized: bool,
    ) -> Result<(), BlockError> {
        let Some(rules) = provider.flow_rules(resource) else {
            return Ok(());
        };
        let req = FlowRequest::new(ctx.name(), node)
            .with_origin(ctx.origin(), ctx.origin_node())
            .with_acquire_count(acquire_count)
            .with_prioritized(prioritized)
            .with_resource_rules(&rules);
        self.check_rules(&rules, &req)
    }

    pub fn check_rules(&self, rules: &[Arc<FlowRule>], req: &FlowRequest<'_>) -> Result<(), BlockError> {
        for rule in rules {
            if !self.can_pass_check(rule, req) {
                return Err(BlockError::flow(Arc::clone(rule)));
            }
        }
        Ok(())
    }

    pub fn can_pass_check(&self, rule: &FlowRule, req: &FlowRequest<'_>) -> bool {
        if rule.limit_app.is_none() {
            return true;
        }
        if rule.is_cluster_mode() {
            return self.pass_cluster_check(rule, req);
        }
        self.pass_local_check(rule, req)
    }

    fn pass_local_check(&self, rule: &FlowRule, req: &FlowRequest<'_>) -> bool {
        let Some(selected) = self.select_node_by_requester_and_strategy(rule, req) else {
            return true;
        };
        match rule.controller() {
            Some(controller) => controller.can_pass(selected.as_ref(), req.acquire_count, req.prioritized),
            None => build_controller(rule, self.cold_factor).can_pass(
                selected.as_ref(),
                req.acquire_count,
                req.prioritized,
            ),
        }
    }

    /// Picks the node whose counters `rule` is evaluated against. `None` means the
    /// rule does not apply to this request.
    pub fn select_node_by_requester_and_strategy(
        &self,
        rule: &FlowRule,
        req: &FlowRequest<'_>,
    ) -> Option<Arc<dyn Node>> {
        let limit_app = rule.limit_app.as_deref()?;
        let origin = req.origin;

        if limit_app == origin && is_specific_app(origin) {
            if rule.strategy == FlowStrategy::Direct {
                return req.origin_node.clone().map(|n| n as Arc<dyn Node>);
            }
            return self.select_reference_node(rule, req);
        }
        if limit_app == LIMIT_APP_DEFAULT {
            if rule.strategy == FlowStrategy::Direct {
                return req.node.cluster_node().map(|n| Arc::clone(n) as Arc<dyn Node>);
            }
            return self.select_reference_node(rule, req);
        }
        if limit_app == LIMIT_APP_OTHER && is_other_origin_in(origin, req.resource_rules) {
            if rule.strategy == FlowStrategy::Direct {
                return req.origin_node.clone().map(|n| n as Arc<dyn Node>);
            }
            return self.select_reference_node(rule, req);
        }
        None
    }

    fn select_reference_node(&self, rule: &FlowRule, req: &FlowRequest<'_>) -> Option<Arc<dyn Node>> {
        let ref_resource = rule.ref_resource.as_deref().filter(|r| !r.is_empty())?;
        match rule.strategy {
            FlowStrategy::Relate => self
                .cluster_nodes
                .get_by_name(ref_resource)
                .map(|n| n as Arc<dyn Node>),
            FlowStrategy::Chain if ref_resource == req.context_name => {
                Some(Arc::clone(req.node) as Arc<dyn Node>)
            }
            _ => None,
        }
    }

    fn pass_cluster_check(&self, rule: &FlowRule, req: &FlowRequest<'_>) -> bool {
        let Some(config) = rule.cluster_config.as_ref() else {
            return self.pass_local_check(rule, req);
        };
        let Some(service) = self.token_services.pick() else {
            return self.fallback_to_local_or_pass(rule, req);
        };
        match service.request_token(config.flow_id, req.acquire_count, req.prioritized) {
            Ok(result) => self.apply_token_result(rule, req, result),
            Err(err) => {
                tracing::warn!(
                    resource = %rule.resource,
                    flow_id = config.flow_id,
                    error = %err,
                    "token service unavailable, falling back"
                );
                self.fallback_to_local_or_pass(rule, req)
            }
        }
    }

    fn apply_token_result(&self, rule: &FlowRule, req: &FlowRequest<'_>, result: TokenResult) -> bool {
        match result.status {
            TokenResultStatus::Ok => true,
            TokenResultStatus::ShouldWait => {
                if result.wait_ms > 0 {
                    std::thread::sleep(Duration::from_millis(result.wait_ms));
                }
                true
            }
            TokenResultStatus::NoRuleExists
            | TokenResultStatus::BadRequest
            | TokenResultStatus::Fail
            | TokenResultStatus::TooManyRequest => {
                tracing::debug!(
                    resource = %rule.resource,
                    status = ?result.status,
                    "token request not served, falling back"
                );
                self.fallback_to_local_or_pass(rule, req)
            }
            _ => false,
        }
    }

    fn fallback_to_local_or_pass(&self, rule: &FlowRule, req: &FlowRequest<'_>) -> bool {
        if rule.fallback_to_local_when_fail() {
            self.pass_local_check(rule, req)
        } else {
            true
        }
    }
}

impl std::fmt::Debug for FlowRuleChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRuleChecker")
            .field("cold_factor", &self.cold_factor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterRole, TokenService};
    use crate::flow::{ClusterFlowConfig, DEFAULT_COLD_FACTOR};
    use crate::node::{ClusterNode, WindowSpec};
    use crate::resource::ResourceWrapper;
    use std::time::Instant;

    struct Fixture {
        registry: Arc<ClusterNodeRegistry>,
        services: Arc<ClusterTokenServices>,
        checker: FlowRuleChecker,
        node: Arc<DefaultNode>,
        cluster: Arc<ClusterNode>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ClusterNodeRegistry::default());
        let services = Arc::new(ClusterTokenServices::new());
        let checker = FlowRuleChecker::new(
            Arc::clone(&registry),
            Arc::clone(&services),
            DEFAULT_COLD_FACTOR,
        );
        let resource = ResourceWrapper::outbound("getUser");
        let cluster = registry.get_or_create(&resource);
        let node = Arc::new(DefaultNode::new(resource, WindowSpec::default()));
        node.set_cluster_node(Arc::clone(&cluster));
        Fixture {
            registry,
            services,
            checker,
            node,
            cluster,
        }
    }

    fn same(a: &Arc<dyn Node>, b: &Arc<impl Node + 'static>) -> bool {
        std::ptr::eq(
            Arc::as_ptr(a) as *const u8,
            Arc::as_ptr(b) as *const u8,
        )
    }

    #[test]
    fn test_specific_app_direct_selects_origin_node() {
        let f = fixture();
        let origin_node = f.cluster.get_or_create_origin_node("appX");
        let rule = FlowRule::new("getUser").with_limit_app("appX");
        let req = FlowRequest::new("ctx", &f.node).with_origin("appX", Some(Arc::clone(&origin_node)));

        let selected = f.checker.select_node_by_requester_and_strategy(&rule, &req).unwrap();
        assert!(same(&selected, &origin_node));
        assert!(!same(&selected, &f.cluster));
    }

    #[test]
    fn test_specific_app_mismatch_selects_nothing() {
        let f = fixture();
        let rule = FlowRule::new("getUser").with_limit_app("appX");
        let req = FlowRequest::new("ctx", &f.node).with_origin("appY", None);
        assert!(f.checker.select_node_by_requester_and_strategy(&rule, &req).is_none());
    }

    #[test]
    fn test_default_direct_selects_cluster_node() {
        let f = fixture();
        let origin_node = f.cluster.get_or_create_origin_node("appX");
        let rule = FlowRule::new("getUser");
        for origin in ["", "appX"] {
            let req = FlowRequest::new("ctx", &f.node).with_origin(origin, Some(Arc::clone(&origin_node)));
            let selected = f.checker.select_node_by_requester_and_strategy(&rule, &req).unwrap();
            assert!(same(&selected, &f.cluster));
        }
    }

    #[test]
    fn test_other_only_for_unnamed_origins() {
        let f = fixture();
        let named = Arc::new(FlowRule::new("getUser").with_limit_app("appX"));
        let other = Arc::new(FlowRule::new("getUser").with_limit_app(LIMIT_APP_OTHER));
        let rules = vec![Arc::clone(&named), Arc::clone(&other)];

        let y_node = f.cluster.get_or_create_origin_node("appY");
        let req = FlowRequest::new("ctx", &f.node)
            .with_origin("appY", Some(Arc::clone(&y_node)))
            .with_resource_rules(&rules);
        let selected = f.checker.select_node_by_requester_and_strategy(&other, &req).unwrap();
        assert!(same(&selected, &y_node));

        let x_node = f.cluster.get_or_create_origin_node("appX");
        let req = FlowRequest::new("ctx", &f.node)
            .with_origin("appX", Some(x_node))
            .with_resource_rules(&rules);
        assert!(f.checker.select_node_by_requester_and_strategy(&other, &req).is_none());
    }

    #[test]
    fn test_relate_uses_reference_cluster_node() {
        let f = fixture();
        let related = f.registry.get_or_create(&ResourceWrapper::inbound("writeDb"));
        let rule = FlowRule::new("getUser")
            .with_strategy(FlowStrategy::Relate)
            .with_ref_resource("writeDb");
        let req = FlowRequest::new("ctx", &f.node);
        let selected = f.checker.select_node_by_requester_and_strategy(&rule, &req).unwrap();
        assert!(same(&selected, &related));

        let missing = FlowRule::new("getUser")
            .with_strategy(FlowStrategy::Relate)
            .with_ref_resource("nowhere");
        assert!(f.checker.select_node_by_requester_and_strategy(&missing, &req).is_none());
    }

    #[test]
    fn test_chain_matches_context_name() {
        let f = fixture();
        let rule = FlowRule::new("getUser")
            .with_strategy(FlowStrategy::Chain)
            .with_ref_resource("entry_a");

        let req = FlowRequest::new("entry_a", &f.node);
        let selected = f.checker.select_node_by_requester_and_strategy(&rule, &req).unwrap();
        assert!(same(&selected, &f.node));

        let req = FlowRequest::new("entry_b", &f.node);
        assert!(f.checker.select_node_by_requester_and_strategy(&rule, &req).is_none());
    }

    #[test]
    fn test_unset_limit_app_is_inert() {
        let f = fixture();
        f.cluster.add_pass_request(100);
        let rule = FlowRule::new("getUser").with_count(1.0).without_limit_app();
        let req = FlowRequest::new("ctx", &f.node);
        assert!(f.checker.can_pass_check(&rule, &req));
    }

    #[test]
    fn test_check_is_idempotent() {
        let f = fixture();
        let rule = Arc::new(FlowRule::new("getUser").with_count(2.0).prepared(DEFAULT_COLD_FACTOR));
        let rules = vec![Arc::clone(&rule)];
        let req = FlowRequest::new("ctx", &f.node);

        f.node.add_pass_request(2);
        let first = f.checker.check_rules(&rules, &req).is_ok();
        let second = f.checker.check_rules(&rules, &req).is_ok();
        assert_eq!(first, second);
        assert!(!first);

        let err = f.checker.check_rules(&rules, &req).unwrap_err();
        assert_eq!(err.limit_app(), Some(LIMIT_APP_DEFAULT));
        assert!(Arc::ptr_eq(err.rule().unwrap(), &rule));
    }

    struct Scripted(TokenResult);

    impl TokenService for Scripted {
        fn request_token(&self, _: u64, _: u32, _: bool) -> crate::Result<TokenResult> {
            Ok(self.0.clone())
        }
    }

    struct Unreachable;

    impl TokenService for Unreachable {
        fn request_token(&self, flow_id: u64, _: u32, _: bool) -> crate::Result<TokenResult> {
            Err(crate::Error::cluster_with_context(
                "connection refused",
                crate::ErrorContext::new().with_details(format!("flow_id={flow_id}")),
            ))
        }
    }

    fn cluster_rule(fallback: bool) -> FlowRule {
        // Local threshold of 0: the local path always rejects.
        FlowRule::new("getUser")
            .with_count(0.0)
            .with_cluster_config(ClusterFlowConfig::new(7).with_fallback_to_local(fallback))
    }

    fn with_client(f: &Fixture, service: impl TokenService + 'static) {
        f.services.set_client(Arc::new(service));
        f.services.set_role(ClusterRole::Client);
    }

    #[test]
    fn test_cluster_ok_and_blocked() {
        let f = fixture();
        let req = FlowRequest::new("ctx", &f.node);
        with_client(&f, Scripted(TokenResult::ok(10)));
        assert!(f.checker.can_pass_check(&cluster_rule(true), &req));

        with_client(&f, Scripted(TokenResult::new(TokenResultStatus::Blocked)));
        assert!(!f.checker.can_pass_check(&cluster_rule(false), &req));

        with_client(&f, Scripted(TokenResult::new(TokenResultStatus::Unknown(42))));
        assert!(!f.checker.can_pass_check(&cluster_rule(false), &req));
    }

    #[test]
    fn test_cluster_fail_falls_back() {
        let f = fixture();
        let req = FlowRequest::new("ctx", &f.node);
        for status in [
            TokenResultStatus::Fail,
            TokenResultStatus::NoRuleExists,
            TokenResultStatus::BadRequest,
            TokenResultStatus::TooManyRequest,
        ] {
            with_client(&f, Scripted(TokenResult::new(status)));
            assert!(f.checker.can_pass_check(&cluster_rule(false), &req));
            assert!(!f.checker.can_pass_check(&cluster_rule(true), &req));
        }
    }

    #[test]
    fn test_cluster_unavailable_falls_back() {
        let f = fixture();
        let req = FlowRequest::new("ctx", &f.node);
        // No role yet.
        assert!(f.checker.can_pass_check(&cluster_rule(false), &req));
        assert!(!f.checker.can_pass_check(&cluster_rule(true), &req));

        with_client(&f, Unreachable);
        assert!(f.checker.can_pass_check(&cluster_rule(false), &req));
        assert!(!f.checker.can_pass_check(&cluster_rule(true), &req));
    }

    #[test]
    fn test_cluster_should_wait_delays_then_passes() {
        let f = fixture();
        let req = FlowRequest::new("ctx", &f.node);
        with_client(&f, Scripted(TokenResult::should_wait(30)));
        let start = Instant::now();
        assert!(f.checker.can_pass_check(&cluster_rule(false), &req));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
