//! Call contexts.
//!
//! A [`Context`] is one logical call chain: a name, an optional caller origin, an
//! entrance node, and the stack of entries currently open on it. Contexts belong
//! to a single thread of control and need no locking.
//!
//! ```rust
//! use tollgate::{FlowRule, Tollgate};
//!
//! let gate = Tollgate::new();
//! gate.flow_rules().load_rules(vec![FlowRule::new("getUser").with_count(5.0)]);
//!
//! let mut ctx = gate.enter("web", "appA");
//! match ctx.entry("getUser") {
//!     Ok(entry) => {
//!         // guarded work
//!         ctx.exit(entry)?;
//!     }
//!     Err(e) if e.is_blocked() => { /* degraded response */ }
//!     Err(e) => return Err(e),
//! }
//! # Ok::<(), tollgate::Error>(())
//! ```

mod entry;

pub use entry::{Entry, EntryFrame, EntryOptions};

use std::sync::Arc;

use crate::error::{Error, ErrorContext};
use crate::gate::Tollgate;
use crate::node::window::current_time_millis;
use crate::node::{DefaultNode, StatisticNode};
use crate::resource::ResourceWrapper;
use crate::slots::Invocation;
use crate::Result;

pub struct Context {
    gate: Tollgate,
    name: String,
    origin: String,
    // `None` for a null context, whose entries are never checked.
    entrance: Option<Arc<DefaultNode>>,
    frames: Vec<EntryFrame>,
    next_id: u64,
}

impl Context {
    pub(crate) fn new(
        gate: Tollgate,
        name: impl Into<String>,
        origin: impl Into<String>,
        entrance: Option<Arc<DefaultNode>>,
    ) -> Self {
        Self {
            gate,
            name: name.into(),
            origin: origin.into(),
            entrance,
            frames: Vec::new(),
            next_id: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Caller identity; empty when unknown.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn entrance_node(&self) -> Option<&Arc<DefaultNode>> {
        self.entrance.as_ref()
    }

    /// A null context was handed out past the context limit. Its entries pass
    /// without checks.
    pub fn is_null(&self) -> bool {
        self.entrance.is_none()
    }

    /// Number of open entries.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn cur_entry(&self) -> Option<&EntryFrame> {
        self.frames.last()
    }

    /// Node of the innermost open entry that has one, else the entrance node.
    pub fn cur_node(&self) -> Option<Arc<DefaultNode>> {
        self.node_from(self.frames.len())
    }

    /// Node the current entry's node hangs under: the node of the nearest
    /// enclosing entry, else the entrance node.
    pub fn parent_node(&self) -> Option<Arc<DefaultNode>> {
        self.node_from(self.frames.len().saturating_sub(1))
    }

    fn node_from(&self, end: usize) -> Option<Arc<DefaultNode>> {
        self.frames[..end]
            .iter()
            .rev()
            .find_map(|f| f.node.clone())
            .or_else(|| self.entrance.clone())
    }

    pub fn set_cur_node(&mut self, node: Arc<DefaultNode>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.node = Some(node);
        }
    }

    /// Per-caller node of the current entry's resource.
    pub fn origin_node(&self) -> Option<Arc<StatisticNode>> {
        self.frames.last().and_then(|f| f.origin_node.clone())
    }

    pub fn set_origin_node(&mut self, node: Arc<StatisticNode>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.origin_node = Some(node);
        }
    }

    pub(crate) fn mark_entered(&mut self, forwarded: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.entered = forwarded;
        }
    }

    /// Enters `resource` once, unprioritized.
    pub fn entry(&mut self, resource: impl Into<ResourceWrapper>) -> Result<Entry> {
        self.entry_with(resource, EntryOptions::default())
    }

    /// Runs the resource's slot chain. On a block the stages that forwarded are
    /// exited right away and [`Error::Blocked`] is returned; nothing stays open.
    pub fn entry_with(
        &mut self,
        resource: impl Into<ResourceWrapper>,
        options: EntryOptions,
    ) -> Result<Entry> {
        let resource = resource.into();
        let chain = if self.is_null() {
            None
        } else {
            self.gate.chain_for(&resource)
        };
        let count = options.count;
        let prioritized = options.prioritized;
        let id = self.next_id;
        self.next_id += 1;
        let frame = EntryFrame::new(
            id,
            resource.clone(),
            chain.clone(),
            options,
            current_time_millis(),
        );
        let args = Arc::clone(&frame.args);
        self.frames.push(frame);
        let depth = self.frames.len();

        if let Some(chain) = chain {
            let inv = Invocation {
                resource: &resource,
                count,
                prioritized,
                args: &args,
            };
            if let Err(block) = chain.entry(self, &inv) {
                let entered = match self.frames.last_mut() {
                    Some(frame) => {
                        frame.block_error = Some(block.clone());
                        frame.entered
                    }
                    None => 0,
                };
                chain.exit(self, &inv, entered);
                self.frames.pop();
                return Err(Error::Blocked(block));
            }
        }
        Ok(Entry {
            id,
            depth,
            resource,
        })
    }

    /// Exits `entry`. Entries opened after it and still open are exited first,
    /// and the out-of-order exit is reported as an error.
    pub fn exit(&mut self, entry: Entry) -> Result<()> {
        if !self.is_open(&entry) {
            return Err(Error::runtime_with_context(
                "entry is not open in this context",
                ErrorContext::new()
                    .with_field_path(format!("resource:{}", entry.resource))
                    .with_source("context"),
            ));
        }

        let above = self.frames.len() - entry.depth;
        while self.frames.len() > entry.depth {
            self.exit_top();
        }
        self.exit_top();

        if above > 0 {
            tracing::warn!(
                context = %self.name,
                resource = %entry.resource,
                unwound = above,
                "entry exited out of order"
            );
            return Err(Error::runtime_with_context(
                "entry exited before entries opened after it",
                ErrorContext::new()
                    .with_field_path(format!("resource:{}", entry.resource))
                    .with_details(format!("{above} inner entries exited first"))
                    .with_source("context"),
            ));
        }
        Ok(())
    }

    fn is_open(&self, entry: &Entry) -> bool {
        entry
            .depth
            .checked_sub(1)
            .and_then(|i| self.frames.get(i))
            .is_some_and(|f| f.id == entry.id)
    }

    fn exit_top(&mut self) {
        let Some(frame) = self.frames.last() else {
            return;
        };
        if let Some(chain) = frame.chain.clone() {
            let resource = frame.resource.clone();
            let args = Arc::clone(&frame.args);
            let (count, prioritized, entered) = (frame.count, frame.prioritized, frame.entered);
            let inv = Invocation {
                resource: &resource,
                count,
                prioritized,
                args: &args,
            };
            chain.exit(self, &inv, entered);
        }
        self.frames.pop();
    }

    /// Marks `entry` as failed so an exception is counted when it exits.
    pub fn trace_error(&mut self, entry: &Entry) {
        if !self.is_open(entry) {
            return;
        }
        if let Some(frame) = self.frames.get_mut(entry.depth - 1) {
            frame.error = true;
        }
    }

    /// Runs `f` guarded by an entry on `resource`. `f` never runs when blocked.
    pub fn run<T>(
        &mut self,
        resource: impl Into<ResourceWrapper>,
        f: impl FnOnce(&mut Context) -> T,
    ) -> Result<T> {
        let entry = self.entry(resource)?;
        let value = f(self);
        self.exit(entry)?;
        Ok(value)
    }

    /// Like [`Context::run`], tracing an `Err` from `f` as a business error.
    pub fn try_run<T, E>(
        &mut self,
        resource: impl Into<ResourceWrapper>,
        f: impl FnOnce(&mut Context) -> std::result::Result<T, E>,
    ) -> Result<std::result::Result<T, E>> {
        let entry = self.entry(resource)?;
        let outcome = f(self);
        if outcome.is_err() {
            self.trace_error(&entry);
        }
        self.exit(entry)?;
        Ok(outcome)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if self.frames.is_empty() {
            return;
        }
        tracing::warn!(
            context = %self.name,
            open = self.frames.len(),
            "context dropped with open entries"
        );
        while !self.frames.is_empty() {
            self.exit_top();
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("null", &self.is_null())
            .field("depth", &self.frames.len())
            .finish()
    }
}
