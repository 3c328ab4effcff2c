use std::sync::Arc;

use super::{Invocation, Next, ProcessorSlot};
use crate::context::Context;
use crate::error::BlockError;

/// An ordered list of stages shared by every invocation of one resource.
#[derive(Clone, Default)]
pub struct SlotChain {
    slots: Vec<Arc<dyn ProcessorSlot>>,
}

impl SlotChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_last(&mut self, slot: Arc<dyn ProcessorSlot>) {
        self.slots.push(slot);
    }

    /// Runs the stages' `entry` in order until one blocks or stops forwarding.
    pub fn entry(&self, ctx: &mut Context, inv: &Invocation<'_>) -> Result<(), BlockError> {
        Next::new(&self.slots).fire_entry(ctx, inv, None)
    }

    /// Runs `exit` of the first `entered` stages, last one first.
    pub fn exit(&self, ctx: &mut Context, inv: &Invocation<'_>, entered: usize) {
        let entered = entered.min(self.slots.len());
        Next::new(&self.slots[..entered]).fire_exit(ctx, inv)
    }

    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl std::fmt::Debug for SlotChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
