//! In-process store with Redis sorted-set semantics.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::{AttemptStore, Batch, CommandReply, StoreError, WindowCommand};
use crate::ratelimit::{Clock, SystemClock};

/// A sorted set plus its optional deadline.
#[derive(Debug, Default)]
struct ScoredSet {
    /// (score, member) pairs ordered the way Redis ranks them
    ordered: BTreeSet<(i64, String)>,
    /// member -> score, so re-adding a member moves it instead of duplicating
    scores: HashMap<String, i64>,
    /// absolute expiry in clock nanoseconds
    expires_at: Option<i64>,
}

impl ScoredSet {
    fn prune(&mut self, max_score: i64) -> u64 {
        let doomed: Vec<(i64, String)> = self
            .ordered
            .iter()
            .take_while(|(score, _)| *score <= max_score)
            .cloned()
            .collect();

        for (score, member) in &doomed {
            self.ordered.remove(&(*score, member.clone()));
            self.scores.remove(member);
        }
        doomed.len() as u64
    }

    fn members(&self) -> Vec<String> {
        self.ordered.iter().map(|(_, member)| member.clone()).collect()
    }

    fn add(&mut self, score: i64, member: &str) -> u64 {
        match self.scores.insert(member.to_string(), score) {
            Some(previous) => {
                self.ordered.remove(&(previous, member.to_string()));
                self.ordered.insert((score, member.to_string()));
                0
            }
            None => {
                self.ordered.insert((score, member.to_string()));
                1
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Clock time between sweeps of expired keys.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Store double that keeps attempt records in process memory.
///
/// Every batch runs under a single lock, so batches are serialized exactly
/// like Redis transactions. Expiry is judged by the clock given at
/// construction: the batch's own key is checked on every call, and all other
/// keys are swept at most once per [`SWEEP_INTERVAL`]. Nothing is shared
/// across processes, so this is for tests only.
#[derive(Debug)]
pub struct MemoryStore {
    sets: Mutex<HashMap<String, ScoredSet>>,
    clock: Arc<dyn Clock>,
    next_sweep: AtomicI64,
}

impl MemoryStore {
    /// Create a store whose expiries follow the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a store whose expiries follow `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
            clock,
            next_sweep: AtomicI64::new(i64::MIN),
        }
    }

    /// Members stored under `key` with their scores, oldest first.
    pub fn members(&self, key: &str) -> Vec<(i64, String)> {
        let now = self.clock.now_nanos();
        let mut sets = self.sets.lock();
        evict_if_expired(&mut sets, key, now);
        sets.get(key)
            .map(|set| set.ordered.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remaining time-to-live of `key`, if it exists and has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now_nanos();
        let mut sets = self.sets.lock();
        evict_if_expired(&mut sets, key, now);
        let deadline = sets.get(key)?.expires_at?;
        u64::try_from(deadline.saturating_sub(now))
            .ok()
            .map(Duration::from_nanos)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_nanos();
        let mut sets = self.sets.lock();
        sets.retain(|_, set| !is_expired(set, now));
        sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every key.
    pub fn clear(&self) {
        self.sets.lock().clear();
    }
}

impl MemoryStore {
    /// Drop every expired key once the sweep interval has passed. Called with
    /// the map lock held.
    fn sweep_if_due(&self, sets: &mut HashMap<String, ScoredSet>, now: i64) {
        if now < self.next_sweep.load(Ordering::Relaxed) {
            return;
        }

        let before = sets.len();
        sets.retain(|_, set| !is_expired(set, now));
        let interval = i64::try_from(SWEEP_INTERVAL.as_nanos()).unwrap_or(i64::MAX);
        self.next_sweep
            .store(now.saturating_add(interval), Ordering::Relaxed);

        if before != sets.len() {
            trace!(evicted = before - sets.len(), live = sets.len(), "Swept expired keys");
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn is_expired(set: &ScoredSet, now: i64) -> bool {
    set.expires_at.is_some_and(|deadline| deadline <= now)
}

fn evict_if_expired(sets: &mut HashMap<String, ScoredSet>, key: &str, now: i64) {
    if sets.get(key).is_some_and(|set| is_expired(set, now)) {
        sets.remove(key);
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn execute(&self, batch: &Batch) -> Result<Vec<CommandReply>, StoreError> {
        let key = batch.key();
        let now = self.clock.now_nanos();
        let mut sets = self.sets.lock();
        evict_if_expired(&mut sets, key, now);
        self.sweep_if_due(&mut sets, now);

        let mut replies = Vec::with_capacity(batch.commands().len());
        for command in batch.commands() {
            let reply = match command {
                WindowCommand::PruneOlderThan { max_score } => CommandReply::Pruned(
                    sets.get_mut(key).map_or(0, |set| set.prune(*max_score)),
                ),
                WindowCommand::RangeAll => CommandReply::Members(
                    sets.get(key).map(ScoredSet::members).unwrap_or_default(),
                ),
                WindowCommand::AddScored { score, member } => {
                    CommandReply::Added(sets.entry(key.to_string()).or_default().add(*score, member))
                }
                WindowCommand::SetExpiry { ttl } => {
                    let ttl = i64::try_from(ttl.as_nanos()).unwrap_or(i64::MAX);
                    CommandReply::ExpirySet(match sets.get_mut(key) {
                        Some(set) => {
                            set.expires_at = Some(now.saturating_add(ttl));
                            true
                        }
                        None => false,
                    })
                }
            };

            // Redis deletes a sorted set once its last member is gone.
            if sets.get(key).is_some_and(ScoredSet::is_empty) {
                sets.remove(key);
            }
            replies.push(reply);
        }

        trace!(key = %key, commands = replies.len(), "Executed batch in memory");
        Ok(replies)
    }
}
