//! External long-term memory interface.
//!
//! The memory store itself lives outside this process (a hosted
//! embedding service in production); the runtime only queries it while
//! assembling the system prompt. A process without a configured store
//! simply runs without recall.

use valet_domain::error::Result;

/// One recalled memory entry.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub content: String,
    /// Where the memory came from (e.g. "conversation", "document").
    pub source: String,
    pub category: String,
}

/// Interface to the external memory store.
#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    /// Search for entries relevant to the query.
    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>>;
}
