use std::fmt;

use serde::{Deserialize, Serialize};

/// Kinds of list-backed resources the service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// Configured agents (`/agents`).
    Agents,
    /// Knowledge documents (`/knowledge`).
    Knowledge,
    /// Long-term memory entries (`/memory`).
    Memory,
}

impl ResourceKind {
    /// All kinds, in the order list views present them.
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Agents,
        ResourceKind::Knowledge,
        ResourceKind::Memory,
    ];

    /// Collection path on the service, without the base URL.
    pub fn path(&self) -> &'static str {
        match self {
            ResourceKind::Agents => "/agents",
            ResourceKind::Knowledge => "/knowledge",
            ResourceKind::Memory => "/memory",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Agents => "agents",
            ResourceKind::Knowledge => "knowledge",
            ResourceKind::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// An agent record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
}

/// A knowledge document record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeDoc {
    pub id: String,
    pub title: String,
}

/// A long-term memory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub text: String,
}

/// Uniform element type for cached resource lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceItem {
    Agent(Agent),
    Knowledge(KnowledgeDoc),
    Memory(MemoryEntry),
}

impl ResourceItem {
    /// Server-assigned id of the underlying record.
    pub fn id(&self) -> &str {
        match self {
            ResourceItem::Agent(a) => &a.id,
            ResourceItem::Knowledge(d) => &d.id,
            ResourceItem::Memory(m) => &m.id,
        }
    }
}

impl From<Agent> for ResourceItem {
    fn from(value: Agent) -> Self {
        Self::Agent(value)
    }
}

impl From<KnowledgeDoc> for ResourceItem {
    fn from(value: KnowledgeDoc) -> Self {
        Self::Knowledge(value)
    }
}

impl From<MemoryEntry> for ResourceItem {
    fn from(value: MemoryEntry) -> Self {
        Self::Memory(value)
    }
}
