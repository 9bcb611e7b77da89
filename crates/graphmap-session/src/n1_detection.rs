//! N+1 query detection.
//!
//! Loading N parents and then reading a lazy association on each one issues
//! N extra queries where one eager superset would do. The tracker counts lazy
//! association loads per `(namespace, association)` and warns once a pair
//! reaches the threshold.
//!
//! ```ignore
//! // Each iteration runs one query for that user's posts:
//! for user in store.all()? {
//!     user.downcast::<User>().unwrap().borrow().posts.len()?;
//! }
//!
//! // One query for every user's posts:
//! let users = store.eager_load(EagerLoad::new().include("posts")).all()?;
//! ```

use std::collections::HashMap;

/// Counts lazy association loads.
#[derive(Debug)]
pub struct N1QueryTracker {
    /// (namespace, association) -> lazy load count
    counts: HashMap<(String, String), usize>,
    threshold: usize,
    enabled: bool,
}

impl Default for N1QueryTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about lazy loads seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct N1Stats {
    /// Total number of lazy loads recorded
    pub total_loads: usize,
    /// Number of distinct associations loaded lazily
    pub associations_loaded: usize,
    /// Number of associations that reached the threshold
    pub potential_n1: usize,
}

impl N1QueryTracker {
    /// Create a tracker with the default threshold (3).
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            threshold: 3,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Record one lazy load of `association` on a `namespace` row.
    ///
    /// Warns exactly when the count for the pair reaches the threshold.
    pub fn record_load(&mut self, namespace: &str, association: &str) {
        if !self.enabled {
            return;
        }

        let count = self
            .counts
            .entry((namespace.to_string(), association.to_string()))
            .or_insert(0);
        *count += 1;

        if *count == self.threshold {
            tracing::warn!(
                target: "graphmap::n1",
                namespace,
                association,
                queries = *count,
                threshold = self.threshold,
                "N+1 query pattern detected; consider eager_load(\"{}\")",
                association
            );
        }
    }

    /// Reset all counts.
    pub fn reset(&mut self) {
        self.counts.clear();
    }

    #[must_use]
    pub fn count_for(&self, namespace: &str, association: &str) -> usize {
        self.counts
            .get(&(namespace.to_string(), association.to_string()))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn stats(&self) -> N1Stats {
        N1Stats {
            total_loads: self.counts.values().sum(),
            associations_loaded: self.counts.len(),
            potential_n1: self
                .counts
                .values()
                .filter(|c| **c >= self.threshold)
                .count(),
        }
    }
}
