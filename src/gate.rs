//! The admission facade.
//!
//! A [`Tollgate`] owns everything shared between call chains: the cluster-node
//! registry, the slot chains built per resource, the entrance node of every
//! context name, the flow rules and the cluster role. It is cheap to clone;
//! clones share state. Most applications use the process-wide [`global`]
//! instance.

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::cluster::ClusterTokenServices;
use crate::config::TollgateConfig;
use crate::context::Context;
use crate::flow::{FlowRuleChecker, FlowRuleManager, FlowRuleProvider};
use crate::node::{ClusterNode, ClusterNodeRegistry, DefaultNode};
use crate::resource::{ResourceType, ResourceWrapper};
use crate::slots::{
    DefaultSlotChainBuilder, SlotChain, SlotChainBuilder, SlotEnv, SlotRegistry,
};
use crate::Result;

/// Name of the node every entrance node hangs under.
pub const MACHINE_ROOT: &str = "machine-root";
/// Name of the node aggregating all inbound traffic.
pub const TOTAL_INBOUND: &str = "__total_inbound_traffic__";

static GLOBAL: Lazy<Tollgate> = Lazy::new(|| {
    let config = TollgateConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "ignoring TOLLGATE_* environment, using defaults");
        TollgateConfig::default()
    });
    Tollgate::assemble(TollgateBuilder::default().config(config))
});

/// The process-wide instance, configured from the environment on first use.
pub fn global() -> &'static Tollgate {
    &GLOBAL
}

#[derive(Clone)]
pub struct Tollgate {
    inner: Arc<Inner>,
}

struct Inner {
    config: TollgateConfig,
    enabled: AtomicBool,
    root: Arc<DefaultNode>,
    inbound: Arc<ClusterNode>,
    cluster_nodes: Arc<ClusterNodeRegistry>,
    flow_rules: Arc<FlowRuleManager>,
    token_services: Arc<ClusterTokenServices>,
    chain_builder: Arc<dyn SlotChainBuilder>,
    entrances: ArcSwap<HashMap<String, Arc<DefaultNode>>>,
    entrance_lock: Mutex<()>,
    chains: ArcSwap<HashMap<ResourceWrapper, Arc<SlotChain>>>,
    chain_lock: Mutex<()>,
}

impl Tollgate {
    /// An instance with default configuration and the built-in stages.
    pub fn new() -> Self {
        Self::assemble(TollgateBuilder::default())
    }

    pub fn builder() -> TollgateBuilder {
        TollgateBuilder::default()
    }

    fn assemble(builder: TollgateBuilder) -> Self {
        let TollgateBuilder {
            config,
            registry,
            chain_builder,
            rule_provider,
            token_services,
        } = builder;
        let window = config.window();

        let cluster_nodes = Arc::new(ClusterNodeRegistry::new(window));
        let flow_rules = Arc::new(FlowRuleManager::with_cold_factor(config.cold_factor));
        let token_services = token_services.unwrap_or_default();
        let rule_provider = rule_provider
            .unwrap_or_else(|| Arc::clone(&flow_rules) as Arc<dyn FlowRuleProvider>);
        let checker = Arc::new(FlowRuleChecker::new(
            Arc::clone(&cluster_nodes),
            Arc::clone(&token_services),
            config.cold_factor,
        ));
        let inbound = Arc::new(ClusterNode::new(TOTAL_INBOUND, ResourceType::Common, window));

        let chain_builder = chain_builder.unwrap_or_else(|| {
            let env = SlotEnv {
                cluster_nodes: Arc::clone(&cluster_nodes),
                flow_rules: rule_provider,
                checker,
                inbound: Arc::clone(&inbound),
                window,
            };
            Arc::new(DefaultSlotChainBuilder::new(
                registry.unwrap_or_else(SlotRegistry::with_defaults),
                env,
            ))
        });

        let root = Arc::new(DefaultNode::entrance(
            ResourceWrapper::inbound(MACHINE_ROOT),
            window,
        ));

        Self {
            inner: Arc::new(Inner {
                config,
                enabled: AtomicBool::new(true),
                root,
                inbound,
                cluster_nodes,
                flow_rules,
                token_services,
                chain_builder,
                entrances: ArcSwap::from_pointee(HashMap::new()),
                entrance_lock: Mutex::new(()),
                chains: ArcSwap::from_pointee(HashMap::new()),
                chain_lock: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &TollgateConfig {
        &self.inner.config
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Turns checking on or off for every context. While off, entries pass
    /// without running any stage.
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.inner.enabled.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            tracing::info!(enabled, "admission checks switched");
        }
    }

    /// Opens a context named `name` for a caller `origin` (empty when unknown).
    ///
    /// Past the context-name limit a null context is returned; its entries pass
    /// unchecked.
    pub fn enter(&self, name: impl Into<String>, origin: impl Into<String>) -> Context {
        let mut name = name.into();
        if name.is_empty() {
            name = self.inner.config.default_context_name.clone();
        }
        let entrance = self.entrance_node(&name);
        if entrance.is_none() {
            tracing::warn!(
                context = %name,
                limit = self.inner.config.max_context_names,
                "context name limit reached, entries in this context are not checked"
            );
        }
        Context::new(self.clone(), name, origin, entrance)
    }

    /// Opens the default context with no origin.
    pub fn default_context(&self) -> Context {
        self.enter(self.inner.config.default_context_name.clone(), "")
    }

    /// Runs `f` guarded by an entry on `resource` in the default context.
    pub fn run<T>(&self, resource: impl Into<ResourceWrapper>, f: impl FnOnce() -> T) -> Result<T> {
        let mut ctx = self.default_context();
        ctx.run(resource, |_| f())
    }

    fn entrance_node(&self, name: &str) -> Option<Arc<DefaultNode>> {
        if let Some(node) = self.inner.entrances.load().get(name) {
            return Some(Arc::clone(node));
        }
        let _guard = self
            .inner
            .entrance_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.inner.entrances.load();
        if let Some(node) = current.get(name) {
            return Some(Arc::clone(node));
        }
        if current.len() >= self.inner.config.max_context_names {
            return None;
        }
        let node = Arc::new(DefaultNode::entrance(
            ResourceWrapper::inbound(name),
            self.inner.config.window(),
        ));
        self.inner.root.add_child(Arc::clone(&node));
        let mut updated = HashMap::with_capacity(current.len() + 1);
        for (k, v) in current.iter() {
            updated.insert(k.clone(), Arc::clone(v));
        }
        updated.insert(name.to_string(), Arc::clone(&node));
        self.inner.entrances.store(Arc::new(updated));
        tracing::debug!(context = %name, "created entrance node");
        Some(node)
    }

    /// The chain of `resource`, built on first use.
    ///
    /// `None` while checks are disabled or once the chain limit is reached; the
    /// entry then passes unchecked.
    pub fn chain_for(&self, resource: &ResourceWrapper) -> Option<Arc<SlotChain>> {
        if !self.is_enabled() {
            return None;
        }
        if let Some(chain) = self.inner.chains.load().get(resource) {
            return Some(Arc::clone(chain));
        }
        let _guard = self
            .inner
            .chain_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.inner.chains.load();
        if let Some(chain) = current.get(resource) {
            return Some(Arc::clone(chain));
        }
        if current.len() >= self.inner.config.max_slot_chains {
            tracing::warn!(
                resource = %resource,
                limit = self.inner.config.max_slot_chains,
                "slot chain limit reached, resource is not checked"
            );
            return None;
        }
        let chain = Arc::new(self.inner.chain_builder.build());
        let mut updated = HashMap::with_capacity(current.len() + 1);
        for (k, v) in current.iter() {
            updated.insert(k.clone(), Arc::clone(v));
        }
        updated.insert(resource.clone(), Arc::clone(&chain));
        self.inner.chains.store(Arc::new(updated));
        tracing::debug!(resource = %resource, stages = ?chain.names(), "built slot chain");
        Some(chain)
    }

    pub fn chain_count(&self) -> usize {
        self.inner.chains.load().len()
    }

    pub fn context_name_count(&self) -> usize {
        self.inner.entrances.load().len()
    }

    pub fn flow_rules(&self) -> &Arc<FlowRuleManager> {
        &self.inner.flow_rules
    }

    pub fn token_services(&self) -> &Arc<ClusterTokenServices> {
        &self.inner.token_services
    }

    pub fn cluster_nodes(&self) -> &Arc<ClusterNodeRegistry> {
        &self.inner.cluster_nodes
    }

    /// The cluster node of the resource named `name`, whatever its entry type.
    pub fn cluster_node(&self, name: &str) -> Option<Arc<ClusterNode>> {
        self.inner.cluster_nodes.get_by_name(name)
    }

    pub fn root_node(&self) -> &Arc<DefaultNode> {
        &self.inner.root
    }

    pub fn inbound_node(&self) -> &Arc<ClusterNode> {
        &self.inner.inbound
    }
}

impl Default for Tollgate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Tollgate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tollgate")
            .field("enabled", &self.is_enabled())
            .field("contexts", &self.context_name_count())
            .field("chains", &self.chain_count())
            .field("cluster_nodes", &self.inner.cluster_nodes.len())
            .finish()
    }
}

/// Builder for [`Tollgate`].
#[derive(Default)]
pub struct TollgateBuilder {
    config: TollgateConfig,
    registry: Option<SlotRegistry>,
    chain_builder: Option<Arc<dyn SlotChainBuilder>>,
    rule_provider: Option<Arc<dyn FlowRuleProvider>>,
    token_services: Option<Arc<ClusterTokenServices>>,
}

impl TollgateBuilder {
    pub fn config(mut self, config: TollgateConfig) -> Self {
        self.config = config;
        self
    }

    /// Stages to build chains from instead of the built-in set.
    pub fn slot_registry(mut self, registry: SlotRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces chain construction entirely. Takes precedence over
    /// [`TollgateBuilder::slot_registry`].
    pub fn chain_builder(mut self, builder: Arc<dyn SlotChainBuilder>) -> Self {
        self.chain_builder = Some(builder);
        self
    }

    /// Rule source consulted by the flow stage instead of the built-in
    /// [`FlowRuleManager`].
    pub fn rule_provider(mut self, provider: Arc<dyn FlowRuleProvider>) -> Self {
        self.rule_provider = Some(provider);
        self
    }

    pub fn token_services(mut self, services: Arc<ClusterTokenServices>) -> Self {
        self.token_services = Some(services);
        self
    }

    pub fn build(self) -> Result<Tollgate> {
        self.config.validate()?;
        Ok(Tollgate::assemble(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowRule;
    use crate::node::Node;

    #[test]
    fn test_chain_built_once_per_resource() {
        let gate = Tollgate::new();
        let a = gate.chain_for(&ResourceWrapper::outbound("a")).unwrap();
        let again = gate.chain_for(&ResourceWrapper::outbound("a")).unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        // Both directions of one name share the chain.
        let inbound = gate.chain_for(&ResourceWrapper::inbound("a")).unwrap();
        assert!(Arc::ptr_eq(&a, &inbound));
        let other = gate.chain_for(&ResourceWrapper::outbound("b")).unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(gate.chain_count(), 2);
    }

    #[test]
    fn test_chain_limit_passes_unchecked() {
        let gate = Tollgate::builder()
            .config(TollgateConfig::default().with_max_slot_chains(1))
            .build()
            .unwrap();
        gate.flow_rules().load_rules(vec![
            FlowRule::new("first").with_count(0.0),
            FlowRule::new("second").with_count(0.0),
        ]);
        let mut ctx = gate.enter("limits", "");
        assert!(ctx.entry("first").unwrap_err().is_blocked());
        let entry = ctx.entry("second").unwrap();
        assert!(!ctx.cur_entry().unwrap().is_checked());
        ctx.exit(entry).unwrap();
        assert_eq!(gate.chain_count(), 1);
    }

    #[test]
    fn test_context_limit_gives_null_context() {
        let gate = Tollgate::builder()
            .config(TollgateConfig::default().with_max_context_names(1))
            .build()
            .unwrap();
        gate.flow_rules()
            .load_rules(vec![FlowRule::new("r").with_count(0.0)]);
        let first = gate.enter("one", "");
        assert!(!first.is_null());
        let mut second = gate.enter("two", "");
        assert!(second.is_null());
        let entry = second.entry("r").unwrap();
        second.exit(entry).unwrap();
        // Known names keep working.
        assert!(!gate.enter("one", "").is_null());
    }

    #[test]
    fn test_disabled_gate_passes() {
        let gate = Tollgate::new();
        gate.flow_rules()
            .load_rules(vec![FlowRule::new("off").with_count(0.0)]);
        gate.set_enabled(false);
        assert!(gate.run("off", || ()).is_ok());
        gate.set_enabled(true);
        assert!(gate.run("off", || ()).unwrap_err().is_blocked());
    }

    #[test]
    fn test_entrances_hang_under_root() {
        let gate = Tollgate::new();
        let ctx = gate.enter("web", "");
        let entrance = Arc::clone(ctx.entrance_node().unwrap());
        assert!(entrance.is_entrance());
        assert!(gate
            .root_node()
            .children()
            .iter()
            .any(|c| Arc::ptr_eq(c, &entrance)));
        // Same name, same entrance.
        let again = gate.enter("web", "");
        assert!(Arc::ptr_eq(again.entrance_node().unwrap(), &entrance));
        assert_eq!(gate.enter("", "").name(), gate.config().default_context_name);
    }

    #[test]
    fn test_inbound_node_counts_in_entries_only() {
        let gate = Tollgate::new();
        let mut ctx = gate.enter("traffic", "");
        let e = ctx.entry(ResourceWrapper::inbound("api")).unwrap();
        ctx.exit(e).unwrap();
        let e = ctx.entry(ResourceWrapper::outbound("db")).unwrap();
        ctx.exit(e).unwrap();
        assert_eq!(gate.inbound_node().pass_qps(), 1.0);
        assert_eq!(gate.inbound_node().cur_thread_num(), 0);
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = Tollgate::builder()
            .config(TollgateConfig::default().with_window(0, 1000))
            .build();
        assert!(result.is_err());
    }
}
