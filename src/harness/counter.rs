//! Concurrency-safe tally of request outcomes
//!
//! Every request worker records into the same `OutcomeCounter`. Increments
//! are serialized through a mutex so no update is ever lost; the final
//! snapshot is only meaningful once all workers have been joined.

use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Classification of one request attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Outcome {
    /// A response arrived; classified by its status code
    Status(u16),
    /// No response: connection refused/reset or response-header timeout
    TransportError,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Status(code) => write!(f, "{code}"),
            Outcome::TransportError => f.write_str("transport-error"),
        }
    }
}

/// Shared outcome counter
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct OutcomeCounter {
    counts: Arc<Mutex<HashMap<Outcome, u64>>>,
}

impl OutcomeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence of `outcome`
    pub fn increment(&self, outcome: Outcome) {
        *self.lock().entry(outcome).or_insert(0) += 1;
    }

    /// Copy of the full mapping at this instant
    ///
    /// Only a complete view when no worker can still increment.
    pub fn snapshot(&self) -> OutcomeSnapshot {
        OutcomeSnapshot {
            counts: self.lock().iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }

    // A worker panicking mid-increment cannot leave the map half-written,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, HashMap<Outcome, u64>> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Immutable, ordered view of the counter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeSnapshot {
    counts: BTreeMap<Outcome, u64>,
}

impl OutcomeSnapshot {
    /// Sum of all counts (number of completed request attempts)
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Number of distinct outcome kinds observed
    pub fn kinds(&self) -> usize {
        self.counts.len()
    }

    pub fn count(&self, outcome: Outcome) -> u64 {
        self.counts.get(&outcome).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Outcome, u64)> + '_ {
        self.counts.iter().map(|(k, v)| (*k, *v))
    }
}

impl fmt::Display for OutcomeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (outcome, count)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{outcome}: {count}")?;
        }
        f.write_str("}")
    }
}

impl Serialize for OutcomeSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter().map(|(k, v)| (k.to_string(), v)))
    }
}

impl FromIterator<(Outcome, u64)> for OutcomeSnapshot {
    fn from_iter<I: IntoIterator<Item = (Outcome, u64)>>(iter: I) -> Self {
        let mut counts = BTreeMap::new();
        for (outcome, count) in iter {
            *counts.entry(outcome).or_insert(0) += count;
        }
        Self { counts }
    }
}
