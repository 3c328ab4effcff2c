use std::sync::Arc;

use super::{Invocation, Next, ProcessorSlot};
use crate::context::Context;
use crate::error::BlockError;
use crate::node::window::current_time_millis;
use crate::node::{ClusterNode, DefaultNode, Node, StatisticNode};
use crate::resource::EntryType;

/// Records what happened to each request.
///
/// Counts are written after the later stages decide: a pass and one more
/// in-flight request, or a block. On exit of an admitted entry the response
/// time, the success, any traced exception and one less in-flight request are
/// recorded. Targets are the context-local node (and through it the cluster
/// node), the origin node, and for inbound entries the process-wide inbound
/// node.
pub struct StatisticSlot {
    inbound: Arc<ClusterNode>,
}

impl StatisticSlot {
    pub fn new(inbound: Arc<ClusterNode>) -> Self {
        Self { inbound }
    }

    fn targets<'a>(
        &'a self,
        inv: &Invocation<'_>,
        node: Option<&'a Arc<DefaultNode>>,
        origin: Option<&'a Arc<StatisticNode>>,
    ) -> Vec<&'a dyn Node> {
        let mut targets: Vec<&dyn Node> = Vec::with_capacity(3);
        if let Some(node) = node {
            targets.push(node.as_ref());
        }
        if let Some(origin) = origin {
            targets.push(origin.as_ref());
        }
        if inv.resource.entry_type() == EntryType::In {
            targets.push(self.inbound.as_ref());
        }
        targets
    }
}

impl ProcessorSlot for StatisticSlot {
    fn name(&self) -> &str {
        "statistic"
    }

    fn entry(
        &self,
        ctx: &mut Context,
        inv: &Invocation<'_>,
        node: Option<&Arc<DefaultNode>>,
        next: Next<'_>,
    ) -> Result<(), BlockError> {
        let result = next.fire_entry(ctx, inv, node);
        let origin = ctx.origin_node();
        let targets = self.targets(inv, node, origin.as_ref());
        match &result {
            Ok(()) => {
                for target in targets {
                    target.increase_thread_num();
                    target.add_pass_request(inv.count);
                }
            }
            Err(_) => {
                for target in targets {
                    target.add_block_request(inv.count);
                }
            }
        }
        result
    }

    fn exit(&self, ctx: &mut Context, inv: &Invocation<'_>, next: Next<'_>) {
        if let Some(frame) = ctx.cur_entry() {
            if frame.block_error().is_none() {
                let rt = current_time_millis().saturating_sub(frame.created_ms());
                let failed = frame.has_error();
                for target in self.targets(inv, frame.node(), frame.origin_node()) {
                    target.add_rt_and_success(rt, inv.count);
                    if failed {
                        target.increase_exception_qps(inv.count);
                    }
                    target.decrease_thread_num();
                }
            }
        }
        next.fire_exit(ctx, inv)
    }
}
