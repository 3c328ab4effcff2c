//! Resource identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Direction of the traffic passing through a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Inbound traffic (someone calls us).
    In,
    /// Outbound traffic (we call someone).
    #[default]
    Out,
}

/// Classification tag carried by a resource; informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    #[default]
    Common,
    Web,
    Rpc,
    ApiGateway,
    DbSql,
}

/// Immutable identity of a protected resource.
///
/// Equality and hashing use the name only. Inbound and outbound entries on one
/// name share a slot chain, a cluster node and the rules of that name; the entry
/// type and resource type are carried along with each entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceWrapper {
    name: String,
    entry_type: EntryType,
    resource_type: ResourceType,
}

impl ResourceWrapper {
    pub fn new(name: impl Into<String>, entry_type: EntryType) -> Self {
        Self {
            name: name.into(),
            entry_type,
            resource_type: ResourceType::Common,
        }
    }

    pub fn inbound(name: impl Into<String>) -> Self {
        Self::new(name, EntryType::In)
    }

    pub fn outbound(name: impl Into<String>) -> Self {
        Self::new(name, EntryType::Out)
    }

    pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = resource_type;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }
}

impl PartialEq for ResourceWrapper {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ResourceWrapper {}

impl Hash for ResourceWrapper {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for ResourceWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl From<&str> for ResourceWrapper {
    fn from(name: &str) -> Self {
        Self::outbound(name)
    }
}

impl From<String> for ResourceWrapper {
    fn from(name: String) -> Self {
        Self::outbound(name)
    }
}
