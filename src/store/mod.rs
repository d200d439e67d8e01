//! Shared-store capability used by rate windows.
//!
//! A rate window never talks to a store command-by-command. It builds a
//! [`Batch`] of sorted-set commands for one key and hands it to an
//! [`AttemptStore`], which must apply the whole batch atomically and in
//! order, or fail it as a unit.
//!
//! ## Consistency
//!
//! All coordination between processes is delegated to the store. Two
//! concurrent batches for the same key are only as serialized as the store
//! makes them: Redis `MULTI/EXEC` runs each batch without interleaving, so
//! counts are exact. An adapter that cannot serialize conflicting batches per
//! key lets two concurrent calls read the same pre-insert count, making
//! `remaining` transiently over-generous. That relaxation is accepted; it is
//! not papered over with in-process locking.

mod memory;
mod redis_store;

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use redis_store::{RedisStore, RedisStoreConfig};

/// Errors raised while executing a batch against a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The Redis connection or transaction failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store answered, but not with the shape the command expects.
    #[error("unexpected reply to {command}: {detail}")]
    UnexpectedReply {
        command: &'static str,
        detail: String,
    },

    /// Failure reported by a custom store adapter.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// One sorted-set command inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowCommand {
    /// Remove every member whose score is `<= max_score`.
    PruneOlderThan { max_score: i64 },
    /// Read every member, in store order.
    RangeAll,
    /// Insert `member` with `score`, or move it to `score` if present.
    AddScored { score: i64, member: String },
    /// Reset the key's time-to-live.
    SetExpiry { ttl: Duration },
}

impl WindowCommand {
    /// Short name used in error messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            WindowCommand::PruneOlderThan { .. } => "prune_older_than",
            WindowCommand::RangeAll => "range_all",
            WindowCommand::AddScored { .. } => "add_scored",
            WindowCommand::SetExpiry { .. } => "set_expiry",
        }
    }
}

/// Reply to one [`WindowCommand`], in the same position as its command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    /// Number of members removed.
    Pruned(u64),
    /// Members currently stored.
    Members(Vec<String>),
    /// Number of members newly added (0 when only the score moved).
    Added(u64),
    /// Whether the key existed and received the new TTL.
    ExpirySet(bool),
}

/// An ordered list of commands against a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    key: String,
    commands: Vec<WindowCommand>,
}

impl Batch {
    /// Start an empty batch for `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            commands: Vec::with_capacity(4),
        }
    }

    pub fn prune_older_than(mut self, max_score: i64) -> Self {
        self.commands.push(WindowCommand::PruneOlderThan { max_score });
        self
    }

    pub fn range_all(mut self) -> Self {
        self.commands.push(WindowCommand::RangeAll);
        self
    }

    pub fn add_scored(mut self, score: i64, member: impl Into<String>) -> Self {
        self.commands.push(WindowCommand::AddScored {
            score,
            member: member.into(),
        });
        self
    }

    pub fn set_expiry(mut self, ttl: Duration) -> Self {
        self.commands.push(WindowCommand::SetExpiry { ttl });
        self
    }

    /// The key every command addresses.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Commands in execution order.
    pub fn commands(&self) -> &[WindowCommand] {
        &self.commands
    }
}

/// A shared store able to run a [`Batch`] atomically.
#[async_trait]
pub trait AttemptStore: Send + Sync + Debug {
    /// Execute every command of `batch` as one unit.
    ///
    /// On success the result holds exactly one reply per command, in order.
    /// On failure no partial effect may be visible.
    async fn execute(&self, batch: &Batch) -> Result<Vec<CommandReply>, StoreError>;
}
