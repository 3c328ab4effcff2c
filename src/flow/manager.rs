use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

use super::rule::{FlowRule, DEFAULT_COLD_FACTOR, LIMIT_APP_DEFAULT, LIMIT_APP_OTHER};
use crate::Result;

/// Ordered rules of one resource.
pub type RuleSet = Arc<[Arc<FlowRule>]>;

/// Maps a resource name to its flow rules. `None` means no rules, and the
/// request passes.
pub trait FlowRuleProvider: Send + Sync {
    fn flow_rules(&self, resource: &str) -> Option<RuleSet>;
}

impl<F> FlowRuleProvider for F
where
    F: Fn(&str) -> Option<RuleSet> + Send + Sync,
{
    fn flow_rules(&self, resource: &str) -> Option<RuleSet> {
        self(resource)
    }
}

/// Holds the loaded flow rules, grouped by resource.
///
/// Loading replaces the whole map in one atomic store; checks in flight keep
/// the rule set they already read.
pub struct FlowRuleManager {
    rules: ArcSwap<HashMap<String, RuleSet>>,
    cold_factor: u32,
}

impl FlowRuleManager {
    pub fn new() -> Self {
        Self::with_cold_factor(DEFAULT_COLD_FACTOR)
    }

    pub fn with_cold_factor(cold_factor: u32) -> Self {
        Self {
            rules: ArcSwap::from_pointee(HashMap::new()),
            cold_factor,
        }
    }

    /// Replaces every loaded rule. Invalid rules are skipped with a warning.
    /// Returns how many rules were kept.
    pub fn load_rules(&self, rules: Vec<FlowRule>) -> usize {
        let mut grouped: HashMap<String, Vec<Arc<FlowRule>>> = HashMap::new();
        let mut kept = 0;
        for rule in rules {
            if !rule.is_valid() {
                tracing::warn!(resource = %rule.resource, "ignoring invalid flow rule: {:?}", rule);
                continue;
            }
            let rule = rule.prepared(self.cold_factor);
            grouped
                .entry(rule.resource.clone())
                .or_default()
                .push(Arc::new(rule));
            kept += 1;
        }
        let map: HashMap<String, RuleSet> = grouped
            .into_iter()
            .map(|(resource, rules)| (resource, RuleSet::from(rules)))
            .collect();
        tracing::info!(rules = kept, resources = map.len(), "flow rules loaded");
        self.rules.store(Arc::new(map));
        kept
    }

    /// Loads a JSON array of rules.
    pub fn load_json(&self, json: &str) -> Result<usize> {
        let rules: Vec<FlowRule> = serde_json::from_str(json)?;
        Ok(self.load_rules(rules))
    }

    /// Loads a YAML sequence of rules.
    pub fn load_yaml(&self, yaml: &str) -> Result<usize> {
        let rules: Vec<FlowRule> = serde_yaml::from_str(yaml)?;
        Ok(self.load_rules(rules))
    }

    pub fn rules(&self) -> Vec<Arc<FlowRule>> {
        self.rules
            .load()
            .values()
            .flat_map(|set| set.iter().cloned())
            .collect()
    }

    pub fn rules_for(&self, resource: &str) -> Option<RuleSet> {
        self.rules.load().get(resource).cloned()
    }

    pub fn has_config(&self, resource: &str) -> bool {
        self.rules.load().contains_key(resource)
    }

    pub fn clear(&self) {
        self.rules.store(Arc::new(HashMap::new()));
    }

    /// True when `origin` is not named as the limit app of any rule on `resource`,
    /// i.e. it falls under that resource's `"other"` rules.
    pub fn is_other_origin(&self, origin: &str, resource: &str) -> bool {
        if origin.is_empty() {
            return false;
        }
        match self.rules.load().get(resource) {
            Some(set) => is_other_origin_in(origin, set),
            None => true,
        }
    }
}

pub(crate) fn is_other_origin_in(origin: &str, rules: &[Arc<FlowRule>]) -> bool {
    if origin.is_empty() {
        return false;
    }
    !rules
        .iter()
        .any(|r| r.limit_app.as_deref() == Some(origin))
}

impl FlowRuleProvider for FlowRuleManager {
    fn flow_rules(&self, resource: &str) -> Option<RuleSet> {
        self.rules_for(resource)
    }
}

impl Default for FlowRuleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FlowRuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRuleManager")
            .field("resources", &self.rules.load().len())
            .field("cold_factor", &self.cold_factor)
            .finish()
    }
}

// Used by the checker to tell specific-app rules apart from the two wildcards.
pub(crate) fn is_specific_app(limit_app: &str) -> bool {
    limit_app != LIMIT_APP_DEFAULT && limit_app != LIMIT_APP_OTHER
}
