//! Common imports for typical client usage.
//!
//! This module intentionally exports the most frequently used facade and
//! policy types so examples and application code need fewer import lines.
pub use crate::{
    Agent, ClientConfig, ClientError, Console, KnowledgeDoc, MemoryEntry, RequestPolicy,
    ResourceItem, ResourceKind, RunEvent, RunInput, RunState, SubscribeOptions,
};
