use std::sync::Arc;

use crate::error::BlockError;
use crate::node::{DefaultNode, StatisticNode};
use crate::resource::ResourceWrapper;
use crate::slots::SlotChain;

/// Options of one entry.
#[derive(Debug, Clone)]
pub struct EntryOptions {
    pub count: u32,
    pub prioritized: bool,
    pub args: Vec<serde_json::Value>,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            count: 1,
            prioritized: false,
            args: Vec::new(),
        }
    }
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_prioritized(mut self, prioritized: bool) -> Self {
        self.prioritized = prioritized;
        self
    }

    pub fn with_args(mut self, args: Vec<serde_json::Value>) -> Self {
        self.args = args;
        self
    }
}

/// Handle of an admitted entry, to be passed back to
/// [`Context::exit`](super::Context::exit).
#[must_use = "an entry must be exited"]
#[derive(Debug)]
pub struct Entry {
    pub(crate) id: u64,
    pub(crate) depth: usize,
    pub(crate) resource: ResourceWrapper,
}

impl Entry {
    pub fn resource(&self) -> &ResourceWrapper {
        &self.resource
    }

    /// Position of the entry on its context's stack, starting at 1.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// State of one open entry on a context's stack.
#[derive(Debug)]
pub struct EntryFrame {
    // Unique within the owning context; ties an `Entry` handle to its frame.
    pub(crate) id: u64,
    pub(crate) resource: ResourceWrapper,
    pub(crate) chain: Option<Arc<SlotChain>>,
    pub(crate) entered: usize,
    pub(crate) node: Option<Arc<DefaultNode>>,
    pub(crate) origin_node: Option<Arc<StatisticNode>>,
    pub(crate) count: u32,
    pub(crate) prioritized: bool,
    pub(crate) args: Arc<[serde_json::Value]>,
    pub(crate) created_ms: u64,
    pub(crate) block_error: Option<BlockError>,
    pub(crate) error: bool,
}

impl EntryFrame {
    pub(crate) fn new(
        id: u64,
        resource: ResourceWrapper,
        chain: Option<Arc<SlotChain>>,
        options: EntryOptions,
        created_ms: u64,
    ) -> Self {
        Self {
            id,
            resource,
            chain,
            entered: 0,
            node: None,
            origin_node: None,
            count: options.count,
            prioritized: options.prioritized,
            args: options.args.into(),
            created_ms,
            block_error: None,
            error: false,
        }
    }

    pub fn resource(&self) -> &ResourceWrapper {
        &self.resource
    }

    /// Whether the entry went through a slot chain. Entries of a null context,
    /// a disabled gate or past the chain limit do not.
    pub fn is_checked(&self) -> bool {
        self.chain.is_some()
    }

    /// Stages that forwarded `entry`, and so receive `exit`.
    pub fn entered(&self) -> usize {
        self.entered
    }

    pub fn node(&self) -> Option<&Arc<DefaultNode>> {
        self.node.as_ref()
    }

    pub fn origin_node(&self) -> Option<&Arc<StatisticNode>> {
        self.origin_node.as_ref()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn args(&self) -> &[serde_json::Value] {
        &self.args
    }

    pub fn created_ms(&self) -> u64 {
        self.created_ms
    }

    pub fn block_error(&self) -> Option<&BlockError> {
        self.block_error.as_ref()
    }

    /// Whether the guarded body reported a business error.
    pub fn has_error(&self) -> bool {
        self.error
    }
}
