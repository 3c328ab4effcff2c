use std::sync::Arc;

use super::chain::SlotChain;
use super::{
    ClusterBuilderSlot, FlowSlot, LogSlot, NodeSelectorSlot, ProcessorSlot, StatisticSlot,
    ORDER_CLUSTER_BUILDER, ORDER_FLOW, ORDER_LOG, ORDER_NODE_SELECTOR, ORDER_STATISTIC,
};
use crate::flow::{FlowRuleChecker, FlowRuleProvider};
use crate::node::{ClusterNode, ClusterNodeRegistry, WindowSpec};

/// Shared services a stage may need when it is instantiated.
#[derive(Clone)]
pub struct SlotEnv {
    pub cluster_nodes: Arc<ClusterNodeRegistry>,
    pub flow_rules: Arc<dyn FlowRuleProvider>,
    pub checker: Arc<FlowRuleChecker>,
    /// Process-wide node counting every inbound entry.
    pub inbound: Arc<ClusterNode>,
    pub window: WindowSpec,
}

pub type SlotFactory = Arc<dyn Fn(&SlotEnv) -> Arc<dyn ProcessorSlot> + Send + Sync>;

/// How a registered stage is instantiated for a new chain.
#[derive(Clone)]
pub enum SlotProvider {
    /// One instance shared by every chain.
    Singleton(Arc<dyn ProcessorSlot>),
    /// A fresh instance per chain, for stages holding per-resource state.
    Factory(SlotFactory),
}

#[derive(Clone)]
pub struct SlotRegistration {
    pub name: String,
    /// Lower runs first.
    pub order: i32,
    pub provider: SlotProvider,
}

impl SlotRegistration {
    fn instantiate(&self, env: &SlotEnv) -> Arc<dyn ProcessorSlot> {
        match &self.provider {
            SlotProvider::Singleton(slot) => Arc::clone(slot),
            SlotProvider::Factory(factory) => factory(env),
        }
    }
}

/// Explicit list of the stages chains are built from.
#[derive(Clone, Default)]
pub struct SlotRegistry {
    registrations: Vec<SlotRegistration>,
}

impl SlotRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in stages at their usual orders.
    pub fn with_defaults() -> Self {
        Self::new()
            .register_factory("node-selector", ORDER_NODE_SELECTOR, |env| {
                Arc::new(NodeSelectorSlot::new(env.window))
            })
            .register_factory("cluster-builder", ORDER_CLUSTER_BUILDER, |env| {
                Arc::new(ClusterBuilderSlot::new(Arc::clone(&env.cluster_nodes)))
            })
            .register_factory("log", ORDER_LOG, |_| Arc::new(LogSlot))
            .register_factory("statistic", ORDER_STATISTIC, |env| {
                Arc::new(StatisticSlot::new(Arc::clone(&env.inbound)))
            })
            .register_factory("flow", ORDER_FLOW, |env| {
                Arc::new(FlowSlot::new(
                    Arc::clone(&env.checker),
                    Arc::clone(&env.flow_rules),
                ))
            })
    }

    pub fn register_singleton(
        mut self,
        name: impl Into<String>,
        order: i32,
        slot: Arc<dyn ProcessorSlot>,
    ) -> Self {
        self.registrations.push(SlotRegistration {
            name: name.into(),
            order,
            provider: SlotProvider::Singleton(slot),
        });
        self
    }

    pub fn register_factory<F>(mut self, name: impl Into<String>, order: i32, factory: F) -> Self
    where
        F: Fn(&SlotEnv) -> Arc<dyn ProcessorSlot> + Send + Sync + 'static,
    {
        self.registrations.push(SlotRegistration {
            name: name.into(),
            order,
            provider: SlotProvider::Factory(Arc::new(factory)),
        });
        self
    }

    pub fn registrations(&self) -> &[SlotRegistration] {
        &self.registrations
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

/// Builds the chain of a resource the first time it is invoked.
pub trait SlotChainBuilder: Send + Sync {
    fn build(&self) -> SlotChain;
}

/// Sorts the registry by order, ties kept in registration order, and links
/// every linkable stage.
pub struct DefaultSlotChainBuilder {
    registry: SlotRegistry,
    env: SlotEnv,
}

impl DefaultSlotChainBuilder {
    pub fn new(registry: SlotRegistry, env: SlotEnv) -> Self {
        Self { registry, env }
    }
}

impl SlotChainBuilder for DefaultSlotChainBuilder {
    fn build(&self) -> SlotChain {
        let mut sorted: Vec<&SlotRegistration> = self.registry.registrations().iter().collect();
        sorted.sort_by_key(|r| r.order);

        let mut chain = SlotChain::new();
        for registration in sorted {
            let slot = registration.instantiate(&self.env);
            if !slot.linkable() {
                tracing::warn!(
                    slot = %registration.name,
                    order = registration.order,
                    "slot cannot be linked into a chain, skipping"
                );
                continue;
            }
            chain.add_last(slot);
        }
        chain
    }
}
