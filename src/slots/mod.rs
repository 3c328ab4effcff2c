//! 处理槽链：按优先级排列的准入阶段。
//!
//! # Slot Chain
//!
//! Every invocation of a resource passes through a fixed, ordered chain of
//! stages. Each stage does its work and then hands the call on through [`Next`];
//! a stage that does not forward ends the traversal, and a stage that returns a
//! [`BlockError`] vetoes the request.
//!
//! ```text
//! entry:  node-selector → cluster-builder → log → statistic → flow → (user stages)
//! exit:   (user stages) → flow → statistic → log → cluster-builder → node-selector
//! ```
//!
//! ## Default stages
//!
//! | Stage | Order | Role |
//! |-------|-------|------|
//! | [`NodeSelectorSlot`] | `-10000` | finds the resource's node in the current context |
//! | [`ClusterBuilderSlot`] | `-9000` | attaches the process-wide cluster node and origin node |
//! | [`LogSlot`] | `-8000` | logs blocked requests |
//! | [`StatisticSlot`] | `-7000` | records pass, block, response time and concurrency |
//! | [`FlowSlot`] | `-2000` | evaluates flow rules |
//!
//! Chains are built once per resource by a [`SlotChainBuilder`] from a
//! [`SlotRegistry`] and never change afterwards.
//!
//! ## Exit symmetry
//!
//! Only stages that forwarded `entry` receive `exit`, in reverse order. When a
//! stage blocks, it and every stage after it are skipped on the way out.

mod builder;
mod chain;
mod cluster_builder;
mod flow;
mod log;
mod node_selector;
mod statistic;

pub use builder::{
    DefaultSlotChainBuilder, SlotChainBuilder, SlotEnv, SlotFactory, SlotProvider,
    SlotRegistration, SlotRegistry,
};
pub use chain::SlotChain;
pub use cluster_builder::ClusterBuilderSlot;
pub use flow::FlowSlot;
pub use log::LogSlot;
pub use node_selector::NodeSelectorSlot;
pub use statistic::StatisticSlot;

use std::sync::Arc;

use crate::context::Context;
use crate::error::BlockError;
use crate::node::DefaultNode;
use crate::resource::ResourceWrapper;

pub const ORDER_NODE_SELECTOR: i32 = -10000;
pub const ORDER_CLUSTER_BUILDER: i32 = -9000;
pub const ORDER_LOG: i32 = -8000;
pub const ORDER_STATISTIC: i32 = -7000;
pub const ORDER_FLOW: i32 = -2000;

/// Arguments of one invocation, shared by every stage it passes through.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub resource: &'a ResourceWrapper,
    pub count: u32,
    pub prioritized: bool,
    pub args: &'a [serde_json::Value],
}

impl<'a> Invocation<'a> {
    pub fn new(resource: &'a ResourceWrapper, count: u32) -> Self {
        Self {
            resource,
            count,
            prioritized: false,
            args: &[],
        }
    }
}

/// One stage of a slot chain.
///
/// The default `entry` and `exit` forward without doing anything.
pub trait ProcessorSlot: Send + Sync {
    fn name(&self) -> &str;

    /// Stages returning `false` are skipped with a warning when a chain is built.
    fn linkable(&self) -> bool {
        true
    }

    fn entry(
        &self,
        ctx: &mut Context,
        inv: &Invocation<'_>,
        node: Option<&Arc<DefaultNode>>,
        next: Next<'_>,
    ) -> Result<(), BlockError> {
        next.fire_entry(ctx, inv, node)
    }

    fn exit(&self, ctx: &mut Context, inv: &Invocation<'_>, next: Next<'_>) {
        next.fire_exit(ctx, inv)
    }
}

/// The remainder of a chain, handed to a stage so it can forward the call.
///
/// Consumed on use, so a stage forwards at most once.
pub struct Next<'a> {
    slots: &'a [Arc<dyn ProcessorSlot>],
    // Index of `slots[0]` within the chain.
    offset: usize,
}

impl<'a> Next<'a> {
    pub(crate) fn new(slots: &'a [Arc<dyn ProcessorSlot>]) -> Self {
        Self { slots, offset: 0 }
    }

    /// Runs `entry` of the following stage.
    pub fn fire_entry(
        self,
        ctx: &mut Context,
        inv: &Invocation<'_>,
        node: Option<&Arc<DefaultNode>>,
    ) -> Result<(), BlockError> {
        // Every stage before this point has forwarded.
        ctx.mark_entered(self.offset);
        match self.slots.split_first() {
            Some((slot, rest)) => slot.entry(
                ctx,
                inv,
                node,
                Next {
                    slots: rest,
                    offset: self.offset + 1,
                },
            ),
            None => Ok(()),
        }
    }

    /// Runs `exit` of the preceding stage.
    pub fn fire_exit(self, ctx: &mut Context, inv: &Invocation<'_>) {
        if let Some((slot, rest)) = self.slots.split_last() {
            slot.exit(
                ctx,
                inv,
                Next {
                    slots: rest,
                    offset: self.offset,
                },
            );
        }
    }

    /// Stages left to run.
    pub fn remaining(&self) -> usize {
        self.slots.len()
    }
}
