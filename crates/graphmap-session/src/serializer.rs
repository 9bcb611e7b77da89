//! Graph serialization: object graphs in, depth-tagged records out.
//!
//! The walk starts at a root object and follows every association member that
//! is loaded or was added. Unread proxies are never forced. Each object yields
//! exactly one record no matter how many paths reach it, which also makes the
//! walk terminate on cyclic graphs.
//!
//! Depths order the writes so that a row is written after every row it
//! references: one-to-many children sit one level below their parent,
//! many-to-one targets one level above their referrer, and many-to-many join
//! rows below both endpoints. The walk also records each of those "must be
//! written first" edges and, before returning, raises depths wherever a node
//! reached by several paths would otherwise break one.

use std::collections::{HashMap, HashSet};

use graphmap_core::{Attributes, Error, Record, Result, SerializationError, Value};

use crate::association::Association;
use crate::mapping::{AssociationValue, MappingRegistry};
use crate::node::{Node, NodeId};
use crate::proxy::CollectionProxy;

/// The output of one walk.
#[derive(Debug, Default)]
pub struct Serialized {
    pub records: Vec<Record>,
    /// Collections whose pushes or deletes the records carry.
    pub touched: Vec<CollectionProxy>,
}

/// Turns an object graph into the records needed to persist it.
#[derive(Debug, Clone, Copy)]
pub struct GraphSerializer<'a> {
    registry: &'a MappingRegistry,
}

impl<'a> GraphSerializer<'a> {
    pub fn new(registry: &'a MappingRegistry) -> Self {
        Self { registry }
    }

    /// Serialize the graph rooted at `node` at depth 0.
    pub fn call(&self, mapping_name: &str, node: &Node) -> Result<Vec<Record>> {
        self.call_with(mapping_name, node, 0, &Attributes::new())
    }

    /// Serialize the graph rooted at `node`, starting at `depth` and merging
    /// `parent_foreign_keys` into the root record.
    pub fn call_with(
        &self,
        mapping_name: &str,
        node: &Node,
        depth: i32,
        parent_foreign_keys: &Attributes,
    ) -> Result<Vec<Record>> {
        Ok(self
            .walk(mapping_name, node, depth, parent_foreign_keys)?
            .records)
    }

    /// Like [`call_with`](Self::call_with), also reporting the collections
    /// with buffered changes so a caller can commit them after writing.
    #[tracing::instrument(level = "debug", skip(self, node, parent_foreign_keys))]
    pub fn walk(
        &self,
        mapping_name: &str,
        node: &Node,
        depth: i32,
        parent_foreign_keys: &Attributes,
    ) -> Result<Serialized> {
        let mut walk = Walk {
            registry: self.registry,
            visited: HashMap::new(),
            alive: Vec::new(),
            records: Vec::new(),
            edges: Vec::new(),
            touched: Vec::new(),
        };
        walk.visit(mapping_name, node, depth, parent_foreign_keys)?;
        let touched = std::mem::take(&mut walk.touched);
        let records = walk.finish();
        tracing::debug!(records = records.len(), touched = touched.len(), "serialized object graph");
        Ok(Serialized { records, touched })
    }
}

struct Walk<'a> {
    registry: &'a MappingRegistry,
    /// Object identity to the index of its record.
    visited: HashMap<NodeId, usize>,
    /// Keeps visited objects alive so their ids stay unique for the walk.
    alive: Vec<Node>,
    records: Vec<Record>,
    /// `(first, then)`: record `first` must be written before record `then`.
    edges: Vec<(usize, usize)>,
    touched: Vec<CollectionProxy>,
}

fn single(field: &str, value: Value) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert(field.to_string(), value);
    attributes
}

impl Walk<'_> {
    fn push(&mut self, record: Record) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    fn note_touched(&mut self, proxy: &CollectionProxy) {
        if proxy.is_touched() && !self.touched.iter().any(|p| p.ptr_eq(proxy)) {
            self.touched.push(proxy.clone());
        }
    }

    fn merge_into(&mut self, idx: usize, attributes: &Attributes) {
        if !attributes.is_empty() {
            self.records[idx] = self.records[idx].merge(attributes);
        }
    }

    fn visit(
        &mut self,
        mapping_name: &str,
        node: &Node,
        depth: i32,
        parent_foreign_keys: &Attributes,
    ) -> Result<usize> {
        if let Some(&idx) = self.visited.get(&node.id()) {
            self.merge_into(idx, parent_foreign_keys);
            return Ok(idx);
        }

        let registry = self.registry;
        let mapping = registry.get(mapping_name)?;
        let dump = mapping.dump(node)?;
        let record = Record::upsert(
            mapping.namespace(),
            mapping.primary_key_fields().iter().cloned(),
            mapping.project(dump.attributes()),
            depth,
        )
        .merge(parent_foreign_keys);

        // Registered before recursing so cycles end here.
        let idx = self.push(record);
        self.visited.insert(node.id(), idx);
        self.alive.push(node.clone());

        for (name, association) in mapping.associations() {
            let Some(value) = dump.association(name) else {
                continue;
            };
            match (association, value) {
                (
                    Association::OneToMany {
                        target,
                        parent_key,
                        foreign_key,
                        ..
                    },
                    AssociationValue::Many(proxy),
                ) => {
                    self.note_touched(proxy);
                    let foreign_keys = self.records[idx]
                        .get(parent_key)
                        .filter(|v| !v.is_null())
                        .map(|key| single(foreign_key, key.clone()))
                        .unwrap_or_default();
                    for child in proxy.pending_members() {
                        let child_idx = self.visit(target, &child, depth + 1, &foreign_keys)?;
                        self.edges.push((idx, child_idx));
                    }
                    for child in proxy.removed() {
                        self.push_delete(target, &child, depth + 1)?;
                    }
                }
                (
                    Association::ManyToOne {
                        target,
                        foreign_key,
                        target_key,
                    },
                    AssociationValue::One(proxy),
                ) => {
                    let Some(proxy) = proxy else {
                        continue;
                    };
                    match proxy.current() {
                        // Never read: the foreign key on the row is current.
                        None => {}
                        Some(Some(parent)) => {
                            let parent_idx =
                                self.visit(target, &parent, depth - 1, &Attributes::new())?;
                            if let Some(key) = self.records[parent_idx].get(target_key).cloned() {
                                self.merge_into(idx, &single(foreign_key, key));
                            }
                            self.edges.push((parent_idx, idx));
                        }
                        Some(None) => {
                            if proxy.is_assigned() {
                                self.merge_into(idx, &single(foreign_key, Value::Null));
                            }
                        }
                    }
                }
                (
                    Association::ManyToMany {
                        target,
                        local_key,
                        remote_key,
                        ..
                    },
                    AssociationValue::Many(proxy),
                ) => {
                    self.note_touched(proxy);
                    let local = self.records[idx]
                        .get(local_key)
                        .filter(|v| !v.is_null())
                        .cloned();
                    for member in proxy.pending_members() {
                        let member_idx = self.visit(target, &member, depth, &Attributes::new())?;
                        let Some(local) = &local else { continue };
                        let Some(remote) = self.records[member_idx].get(remote_key).cloned() else {
                            continue;
                        };
                        let join_depth = depth.max(self.records[member_idx].depth()) + 1;
                        if let Some(join) = association.join_record(local.clone(), remote, join_depth)
                        {
                            let join_idx = self.push(join);
                            self.edges.push((idx, join_idx));
                            self.edges.push((member_idx, join_idx));
                        }
                    }
                    if let Some(local) = &local {
                        let target_mapping = registry.get(target)?;
                        for member in proxy.removed() {
                            let remote = target_mapping
                                .dump(&member)?
                                .attributes()
                                .get(remote_key)
                                .cloned();
                            if let Some(join) = remote.and_then(|remote| {
                                association.join_record(local.clone(), remote, depth + 1)
                            }) {
                                self.push(join.to_delete());
                            }
                        }
                    }
                }
                _ => {
                    return Err(Error::Serialization(SerializationError {
                        mapping: mapping.name().to_string(),
                        source: format!(
                            "association '{name}' is {} but the serializer returned {}",
                            association.kind_name(),
                            match value {
                                AssociationValue::Many(_) => "a collection",
                                AssociationValue::One(_) => "a single value",
                            }
                        )
                        .into(),
                    }));
                }
            }
        }

        Ok(idx)
    }

    /// A delete for a removed member. Its own associations are not walked.
    fn push_delete(&mut self, mapping_name: &str, node: &Node, depth: i32) -> Result<()> {
        let mapping = self.registry.get(mapping_name)?;
        let dump = mapping.dump(node)?;
        let identity = Record::upsert(
            mapping.namespace(),
            mapping.primary_key_fields().iter().cloned(),
            dump.attributes().clone(),
            depth,
        )
        .identity();
        self.push(Record::delete(
            mapping.namespace(),
            mapping.primary_key_fields().iter().cloned(),
            identity,
            depth,
        ));
        Ok(())
    }

    fn finish(self) -> Vec<Record> {
        let mut depths: Vec<i32> = self.records.iter().map(Record::depth).collect();

        let mut settled = false;
        for _ in 0..=self.records.len() {
            let mut changed = false;
            for &(first, then) in &self.edges {
                if first != then && depths[then] <= depths[first] {
                    depths[then] = depths[first] + 1;
                    changed = true;
                }
            }
            if !changed {
                settled = true;
                break;
            }
        }
        if !settled {
            tracing::warn!(
                records = self.records.len(),
                "reference cycle between records; write order cannot satisfy every foreign key"
            );
        }

        // An object still reachable through the graph was moved, not deleted.
        let upserted: HashSet<(String, Vec<Value>)> = self
            .records
            .iter()
            .filter(|r| r.is_upsert())
            .map(|r| (r.namespace().to_string(), r.identity_values()))
            .collect();

        self.records
            .into_iter()
            .zip(depths)
            .filter(|(r, _)| {
                !(r.is_delete()
                    && upserted.contains(&(r.namespace().to_string(), r.identity_values())))
            })
            .map(|(r, depth)| if r.depth() == depth { r } else { r.with_depth(depth) })
            .collect()
    }
}
