//! Generational response cache.
//!
//! This module provides the storage side of the agent:
//! - Named partitions scoped to a role (static/dynamic) and a generation
//! - A store trait with a SQLite implementation
//! - A partition manager that keeps request paths best-effort and
//!   non-blocking (writes are submitted as background tasks)

mod partition;
mod storage;
mod traits;

pub use partition::{PartitionManager, PartitionRole};
pub use storage::{CacheStore, SqliteStorage};
pub use traits::{RequestKey, ResponseSnapshot, ResponseSource};

#[cfg(test)]
pub use traits::CachedSnapshot;
