//! # tollgate
//!
//! 进程内准入控制核心：处理槽链、统计节点树与流控规则检查。
//!
//! In-process admission control: every call to a protected resource passes
//! through an ordered chain of stages that record statistics and evaluate flow
//! rules before the call is allowed to run.
//!
//! ## Overview
//!
//! - **Slot chain**: one immutable, priority-ordered chain of stages per resource,
//!   built on first use and shared by every caller
//! - **Statistics node tree**: per-context nodes under entrance nodes, writing
//!   through to one process-wide cluster node per resource
//! - **Flow rules**: caller- and strategy-aware node selection feeding a
//!   traffic-shaping controller (reject, warm-up, uniform throttling)
//! - **Cluster mode**: rules can ask a token service first and fall back to the
//!   local check when it cannot answer
//!
//! A blocked call is reported as [`Error::Blocked`] carrying the rule that vetoed
//! it; the guarded body never runs.
//!
//! ## Quick Start
//!
//! ```rust
//! use tollgate::{FlowRule, Tollgate};
//!
//! let gate = Tollgate::new();
//! gate.flow_rules()
//!     .load_rules(vec![FlowRule::new("getUser").with_count(5.0)]);
//!
//! let mut admitted = 0;
//! for _ in 0..6 {
//!     match gate.run("getUser", || "user") {
//!         Ok(_) => admitted += 1,
//!         Err(e) => assert!(e.is_blocked()),
//!     }
//! }
//! assert_eq!(admitted, 5);
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`gate`] | [`Tollgate`] facade: contexts, chain cache, global switch |
//! | [`context`] | call contexts and entries |
//! | [`slots`] | stage trait, chain, builder and the built-in stages |
//! | [`node`] | statistics nodes and sliding windows |
//! | [`flow`] | flow rules, rule manager, checker and controllers |
//! | [`cluster`] | token service contract and cluster role |
//! | [`resource`] | resource identity |
//! | [`config`] | runtime configuration |
//! | [`logging`] | subscriber setup |

pub mod cluster;
pub mod config;
pub mod context;
pub mod flow;
pub mod gate;
pub mod logging;
pub mod node;
pub mod resource;
pub mod slots;

// Re-export main types for convenience
pub use cluster::{ClusterRole, ClusterTokenServices, TokenResult, TokenResultStatus, TokenService};
pub use config::TollgateConfig;
pub use context::{Context, Entry, EntryOptions};
pub use flow::{
    ClusterFlowConfig, ControlBehavior, FlowGrade, FlowRule, FlowRuleManager, FlowRuleProvider,
    FlowStrategy,
};
pub use gate::{global, Tollgate, TollgateBuilder};
pub use node::{ClusterNode, DefaultNode, Node, StatisticNode};
pub use resource::{EntryType, ResourceType, ResourceWrapper};
pub use slots::{Invocation, Next, ProcessorSlot, SlotChain, SlotRegistry};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{BlockError, Error, ErrorContext};
