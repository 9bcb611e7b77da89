//! Eager-load plans and the prefetched data they produce.
//!
//! An [`EagerLoad`] names the associations to prefetch, as a tree:
//!
//! ```
//! use graphmap_session::EagerLoad;
//!
//! let plan = EagerLoad::new()
//!     .include("author")
//!     .include_nested("comments.user");
//!
//! assert!(plan.get("comments").unwrap().contains("user"));
//! ```
//!
//! Running a plan against a batch of parent rows yields [`EagerData`]: for
//! each included association, one [`Superset`] covering every parent plus the
//! nested data for the next hop.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use graphmap_core::Attributes;

/// A tree of association names to prefetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EagerLoad {
    includes: BTreeMap<String, EagerLoad>,
}

impl EagerLoad {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefetch one association of the root.
    #[must_use]
    pub fn include(self, name: &str) -> Self {
        self.nest(name, EagerLoad::new())
    }

    /// Prefetch a dotted path such as `"posts.comments.user"`.
    ///
    /// Empty segments are ignored, so `"posts..comments"` and `"posts."` are
    /// accepted. A blank path changes nothing.
    #[must_use]
    pub fn include_nested(mut self, path: &str) -> Self {
        let parts: Vec<&str> = path.trim().split('.').filter(|p| !p.is_empty()).collect();
        let mut node = &mut self;
        for part in parts {
            node = node.includes.entry(part.to_string()).or_default();
        }
        self
    }

    /// Prefetch `name` and, below it, everything in `nested`.
    #[must_use]
    pub fn nest(mut self, name: &str, nested: EagerLoad) -> Self {
        let slot = self.includes.entry(name.to_string()).or_default();
        slot.merge(nested);
        self
    }

    fn merge(&mut self, other: EagerLoad) {
        for (name, nested) in other.includes {
            self.includes.entry(name).or_default().merge(nested);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.includes.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&EagerLoad> {
        self.includes.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.includes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EagerLoad)> {
        self.includes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of associations at every level.
    pub fn len(&self) -> usize {
        self.includes.values().map(|n| 1 + n.len()).sum()
    }
}

impl<'a> FromIterator<&'a str> for EagerLoad {
    fn from_iter<I: IntoIterator<Item = &'a str>>(paths: I) -> Self {
        paths
            .into_iter()
            .fold(EagerLoad::new(), EagerLoad::include_nested)
    }
}

/// Associated rows fetched for a whole batch of parents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Superset {
    /// Target rows.
    pub rows: Vec<Attributes>,
    /// Join rows, for many-to-many associations.
    pub join_rows: Vec<Attributes>,
}

impl Superset {
    pub fn new(rows: Vec<Attributes>) -> Self {
        Self {
            rows,
            join_rows: Vec::new(),
        }
    }
}

/// One prefetched association: its superset and the data for the next hop.
#[derive(Debug, Default)]
pub struct EagerEntry {
    pub superset: Superset,
    pub nested: EagerData,
}

/// Prefetched supersets, keyed by association name.
#[derive(Debug, Clone, Default)]
pub struct EagerData {
    entries: HashMap<String, Rc<EagerEntry>>,
}

impl EagerData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: EagerEntry) {
        self.entries.insert(name.into(), Rc::new(entry));
    }

    pub fn get(&self, name: &str) -> Option<&Rc<EagerEntry>> {
        self.entries.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
