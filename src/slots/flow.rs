use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{Invocation, Next, ProcessorSlot};
use crate::context::Context;
use crate::error::BlockError;
use crate::flow::{FlowRuleChecker, FlowRuleProvider};
use crate::node::DefaultNode;

/// Evaluates the resource's flow rules before letting the request on.
///
/// Rules are read against the node chosen by the node selector; without one
/// there is nothing to check and the request passes.
pub struct FlowSlot {
    checker: Arc<FlowRuleChecker>,
    rules: Arc<dyn FlowRuleProvider>,
    warned_no_node: AtomicBool,
}

impl FlowSlot {
    pub fn new(checker: Arc<FlowRuleChecker>, rules: Arc<dyn FlowRuleProvider>) -> Self {
        Self {
            checker,
            rules,
            warned_no_node: AtomicBool::new(false),
        }
    }

    fn warn_no_node(&self, ctx: &Context, inv: &Invocation<'_>) {
        if !self.warned_no_node.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                resource = %inv.resource,
                context = %ctx.name(),
                "no node selected before the flow stage, flow rules are not checked"
            );
        }
    }
}

impl ProcessorSlot for FlowSlot {
    fn name(&self) -> &str {
        "flow"
    }

    fn entry(
        &self,
        ctx: &mut Context,
        inv: &Invocation<'_>,
        node: Option<&Arc<DefaultNode>>,
        next: Next<'_>,
    ) -> Result<(), BlockError> {
        match node {
            Some(node) => self.checker.check_flow(
                self.rules.as_ref(),
                inv.resource.name(),
                ctx,
                node,
                inv.count,
                inv.prioritized,
            )?,
            None => self.warn_no_node(ctx, inv),
        }
        next.fire_entry(ctx, inv, node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterTokenServices;
    use crate::flow::{FlowRule, FlowRuleManager};
    use crate::gate::Tollgate;
    use crate::node::ClusterNodeRegistry;
    use crate::slots::{NodeSelectorSlot, SlotRegistry, ORDER_FLOW, ORDER_NODE_SELECTOR};

    fn guarded_slot(resource: &str) -> Arc<FlowSlot> {
        let rules = Arc::new(FlowRuleManager::new());
        rules.load_rules(vec![FlowRule::new(resource).with_count(0.0)]);
        let checker = Arc::new(FlowRuleChecker::new(
            Arc::new(ClusterNodeRegistry::default()),
            Arc::new(ClusterTokenServices::new()),
            3,
        ));
        Arc::new(FlowSlot::new(checker, rules))
    }

    fn gate_with(registry: SlotRegistry) -> Tollgate {
        Tollgate::builder().slot_registry(registry).build().unwrap()
    }

    #[test]
    fn test_missing_node_is_flagged_once() {
        let flow = guarded_slot("orphan");
        let gate = gate_with(SlotRegistry::new().register_singleton(
            "flow",
            ORDER_FLOW,
            Arc::clone(&flow) as Arc<dyn ProcessorSlot>,
        ));

        let mut ctx = gate.enter("no_selector", "");
        assert!(!flow.warned_no_node.load(Ordering::Acquire));
        // No node to read the rule against, so the request passes.
        assert!(ctx.run("orphan", |_| ()).is_ok());
        assert!(flow.warned_no_node.load(Ordering::Acquire));
        assert!(ctx.run("orphan", |_| ()).is_ok());
    }

    #[test]
    fn test_selected_node_is_checked() {
        let flow = guarded_slot("guarded");
        let gate = gate_with(
            SlotRegistry::new()
                .register_factory("node-selector", ORDER_NODE_SELECTOR, |env| {
                    Arc::new(NodeSelectorSlot::new(env.window))
                })
                .register_singleton(
                    "flow",
                    ORDER_FLOW,
                    Arc::clone(&flow) as Arc<dyn ProcessorSlot>,
                ),
        );

        let mut ctx = gate.enter("with_selector", "");
        assert!(ctx.run("guarded", |_| ()).unwrap_err().is_blocked());
        assert!(!flow.warned_no_node.load(Ordering::Acquire));
    }
}
