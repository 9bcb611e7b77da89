//! Association strategies.
//!
//! An [`Association`] describes how the rows of one mapping relate to the rows
//! of another. Each variant knows how to fetch the associated rows for a set of
//! parents in a fixed number of queries (one per hop, two for many-to-many)
//! and how to slice that superset back to a single parent.

use std::collections::HashSet;

use graphmap_core::{Attributes, Criterion, Dataset, Direction, OrderBy, Record, Result, Storage, Value};

use crate::eager::Superset;
use crate::mapping::RelationMapping;

/// The join namespace mediating a many-to-many association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub namespace: String,
    /// Join column holding the owner's key.
    pub local_fk: String,
    /// Join column holding the target's key.
    pub remote_fk: String,
}

impl JoinTable {
    pub fn new(
        namespace: impl Into<String>,
        local_fk: impl Into<String>,
        remote_fk: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            local_fk: local_fk.into(),
            remote_fk: remote_fk.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Association {
    /// The owner has many targets; each target carries `foreign_key`
    /// pointing at the owner's `parent_key`.
    OneToMany {
        target: String,
        parent_key: String,
        foreign_key: String,
        order: Vec<OrderBy>,
    },
    /// The owner carries `foreign_key` pointing at the target's `target_key`.
    ManyToOne {
        target: String,
        foreign_key: String,
        target_key: String,
    },
    /// Owner and target are linked through join rows.
    ManyToMany {
        target: String,
        local_key: String,
        remote_key: String,
        join: JoinTable,
    },
}

impl Association {
    pub fn one_to_many(
        target: impl Into<String>,
        parent_key: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Association::OneToMany {
            target: target.into(),
            parent_key: parent_key.into(),
            foreign_key: foreign_key.into(),
            order: Vec::new(),
        }
    }

    pub fn many_to_one(
        target: impl Into<String>,
        foreign_key: impl Into<String>,
        target_key: impl Into<String>,
    ) -> Self {
        Association::ManyToOne {
            target: target.into(),
            foreign_key: foreign_key.into(),
            target_key: target_key.into(),
        }
    }

    pub fn many_to_many(
        target: impl Into<String>,
        local_key: impl Into<String>,
        remote_key: impl Into<String>,
        join: JoinTable,
    ) -> Self {
        Association::ManyToMany {
            target: target.into(),
            local_key: local_key.into(),
            remote_key: remote_key.into(),
            join,
        }
    }

    /// Order the members of a one-to-many association. Other variants ignore
    /// ordering.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        if let Association::OneToMany { order, .. } = &mut self {
            order.push(OrderBy {
                field: field.into(),
                direction,
            });
        }
        self
    }

    /// Name of the target mapping.
    pub fn target(&self) -> &str {
        match self {
            Association::OneToMany { target, .. }
            | Association::ManyToOne { target, .. }
            | Association::ManyToMany { target, .. } => target,
        }
    }

    pub fn is_collection(&self) -> bool {
        !matches!(self, Association::ManyToOne { .. })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Association::OneToMany { .. } => "one_to_many",
            Association::ManyToOne { .. } => "many_to_one",
            Association::ManyToMany { .. } => "many_to_many",
        }
    }

    /// The owner field whose value scopes this association.
    pub fn owner_key(&self) -> &str {
        match self {
            Association::OneToMany { parent_key, .. } => parent_key,
            Association::ManyToOne { foreign_key, .. } => foreign_key,
            Association::ManyToMany { local_key, .. } => local_key,
        }
    }

    /// Fetch the associated rows of every parent at once.
    ///
    /// Parents without a usable key are skipped; if none has one, no query
    /// is issued.
    pub fn eager_superset(
        &self,
        storage: &dyn Storage,
        target: &RelationMapping,
        parents: &[Attributes],
        select_fields: bool,
    ) -> Result<Superset> {
        let keys = distinct_values(parents, self.owner_key());
        if keys.is_empty() {
            return Ok(Superset::default());
        }

        match self {
            Association::OneToMany {
                foreign_key, order, ..
            } => {
                let dataset = order.iter().fold(
                    target.dataset(select_fields).where_in(foreign_key, keys),
                    |ds, term| ds.order_by(&term.field, term.direction),
                );
                Ok(Superset::new(fetch(storage, &dataset)?))
            }
            Association::ManyToOne { target_key, .. } => {
                let dataset = target.dataset(select_fields).where_in(target_key, keys);
                Ok(Superset::new(fetch(storage, &dataset)?))
            }
            Association::ManyToMany {
                remote_key, join, ..
            } => {
                let join_dataset = Dataset::new(&join.namespace)
                    .where_in(&join.local_fk, keys)
                    .select([join.local_fk.clone(), join.remote_fk.clone()]);
                let join_rows = fetch(storage, &join_dataset)?;

                let remote = distinct_values(&join_rows, &join.remote_fk);
                let rows = if remote.is_empty() {
                    Vec::new()
                } else {
                    fetch(
                        storage,
                        &target.dataset(select_fields).where_in(remote_key, remote),
                    )?
                };
                Ok(Superset { rows, join_rows })
            }
        }
    }

    /// The rows of `superset` that belong to `parent`, in association order.
    pub fn slice(&self, superset: &Superset, parent: &Attributes) -> Vec<Attributes> {
        let Some(key) = parent.get(self.owner_key()).filter(|v| !v.is_null()) else {
            return Vec::new();
        };

        match self {
            Association::OneToMany { foreign_key, .. } => {
                let belongs = Criterion::Eq(foreign_key.clone(), key.clone());
                superset
                    .rows
                    .iter()
                    .filter(|row| belongs.matches(row))
                    .cloned()
                    .collect()
            }
            Association::ManyToOne { target_key, .. } => {
                let is_target = Criterion::Eq(target_key.clone(), key.clone());
                superset
                    .rows
                    .iter()
                    .find(|row| is_target.matches(row))
                    .cloned()
                    .into_iter()
                    .collect()
            }
            Association::ManyToMany {
                remote_key, join, ..
            } => {
                let linked = Criterion::Eq(join.local_fk.clone(), key.clone());
                superset
                    .join_rows
                    .iter()
                    .filter(|row| linked.matches(row))
                    .filter_map(|row| row.get(&join.remote_fk))
                    .filter_map(|remote| {
                        let is_target = Criterion::Eq(remote_key.clone(), remote.clone());
                        superset.rows.iter().find(|row| is_target.matches(row))
                    })
                    .cloned()
                    .collect()
            }
        }
    }

    /// A join record linking `local` and `remote`. `None` for other variants.
    pub fn join_record(&self, local: Value, remote: Value, depth: i32) -> Option<Record> {
        let Association::ManyToMany { join, .. } = self else {
            return None;
        };
        let mut attributes = Attributes::new();
        attributes.insert(join.local_fk.clone(), local);
        attributes.insert(join.remote_fk.clone(), remote);
        Some(Record::upsert(
            &join.namespace,
            [join.local_fk.clone(), join.remote_fk.clone()],
            attributes,
            depth,
        ))
    }

    /// The join record corresponding to a fetched join row.
    pub fn join_record_for_row(&self, row: &Attributes) -> Option<Record> {
        let Association::ManyToMany { join, .. } = self else {
            return None;
        };
        let local = row.get(&join.local_fk)?.clone();
        let remote = row.get(&join.remote_fk)?.clone();
        self.join_record(local, remote, 0)
    }

    /// Check the association against its owner and target mappings.
    pub fn validate(
        &self,
        owner: &RelationMapping,
        target: &RelationMapping,
    ) -> std::result::Result<(), String> {
        let require = |mapping: &RelationMapping, field: &str| {
            if mapping.has_field(field) {
                Ok(())
            } else {
                Err(format!(
                    "'{field}' is not a field of mapping '{}'",
                    mapping.name()
                ))
            }
        };

        match self {
            Association::OneToMany {
                parent_key,
                foreign_key,
                ..
            } => {
                require(owner, parent_key)?;
                require(target, foreign_key)
            }
            Association::ManyToOne {
                foreign_key,
                target_key,
                ..
            } => {
                require(owner, foreign_key)?;
                require(target, target_key)
            }
            Association::ManyToMany {
                local_key,
                remote_key,
                join,
                ..
            } => {
                require(owner, local_key)?;
                require(target, remote_key)?;
                if join.namespace.is_empty() {
                    return Err("join namespace is empty".to_string());
                }
                if join.local_fk == join.remote_fk {
                    return Err(format!(
                        "join columns must differ, both are '{}'",
                        join.local_fk
                    ));
                }
                Ok(())
            }
        }
    }
}

fn fetch(storage: &dyn Storage, dataset: &Dataset) -> Result<Vec<Attributes>> {
    tracing::debug!(
        namespace = dataset.namespace(),
        criteria = dataset.criteria().len(),
        "issuing association query"
    );
    Ok(storage.fetch(dataset)?)
}

/// Distinct non-NULL values of `field`, in first-seen order.
fn distinct_values(rows: &[Attributes], field: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter_map(|row| row.get(field))
        .filter(|v| !v.is_null())
        .filter(|v| seen.insert((*v).clone()))
        .cloned()
        .collect()
}
