use std::sync::Arc;

use super::{Invocation, Next, ProcessorSlot};
use crate::context::Context;
use crate::error::BlockError;
use crate::node::DefaultNode;

/// Logs requests blocked by any later stage.
#[derive(Debug, Default)]
pub struct LogSlot;

impl ProcessorSlot for LogSlot {
    fn name(&self) -> &str {
        "log"
    }

    fn entry(
        &self,
        ctx: &mut Context,
        inv: &Invocation<'_>,
        node: Option<&Arc<DefaultNode>>,
        next: Next<'_>,
    ) -> Result<(), BlockError> {
        let result = next.fire_entry(ctx, inv, node);
        if let Err(block) = &result {
            tracing::debug!(
                resource = %inv.resource,
                context = %ctx.name(),
                origin = %ctx.origin(),
                limit_app = block.limit_app().unwrap_or("-"),
                count = inv.count,
                "request blocked: {}",
                block
            );
        }
        result
    }
}
