//! The store façade.
//!
//! [`StoreFacade`] owns the session-scoped state (the dirty map, the N+1
//! tracker, lifecycle callbacks) and hands out [`Store`]s, one per mapping.
//! A `Store` is a cheap query builder whose terminals load through a fresh
//! [`GraphLoader`] and save through the [`GraphSerializer`].

use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use graphmap_core::{
    Attributes, Dataset, Direction, Error, MappingError, MappingErrorKind, Record, Result, Storage,
    UpsertError, Value,
};

use crate::dirty_map::DirtyMap;
use crate::eager::EagerLoad;
use crate::identity_map::IdentityKey;
use crate::loader::GraphLoader;
use crate::mapping::MappingRegistry;
use crate::n1_detection::{N1QueryTracker, N1Stats};
use crate::node::Node;
use crate::proxy::CollectionProxy;
use crate::serializer::{GraphSerializer, Serialized};

// ============================================================================
// Store Events
// ============================================================================

/// Callbacks receive no arguments. Returning `Err` from a `BeforeSave`
/// callback aborts the save before anything is written.
type StoreEventFn = Box<dyn FnMut() -> Result<()>>;

/// Registered lifecycle callbacks.
#[derive(Default)]
pub struct StoreEventCallbacks {
    before_save: Vec<StoreEventFn>,
    after_save: Vec<StoreEventFn>,
    after_rollback: Vec<StoreEventFn>,
}

impl fmt::Debug for StoreEventCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreEventCallbacks")
            .field("before_save", &self.before_save.len())
            .field("after_save", &self.after_save.len())
            .field("after_rollback", &self.after_rollback.len())
            .finish()
    }
}

impl StoreEventCallbacks {
    fn fire(&mut self, event: StoreEvent) -> Result<()> {
        let callbacks = match event {
            StoreEvent::BeforeSave => &mut self.before_save,
            StoreEvent::AfterSave => &mut self.after_save,
            StoreEvent::AfterRollback => &mut self.after_rollback,
        };
        for cb in callbacks.iter_mut() {
            cb()?;
        }
        Ok(())
    }
}

/// Store lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// Fired before a save computes its writes.
    BeforeSave,
    /// Fired after a save committed.
    AfterSave,
    /// Fired after a write batch rolled back.
    AfterRollback,
}

// ============================================================================
// Store Configuration
// ============================================================================

/// Configuration for store behavior.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether lazy association loads are counted and N+1 patterns reported.
    pub n1_detection: bool,
    /// Lazy loads of one association after which a warning is logged.
    pub n1_threshold: usize,
    /// Whether load queries fetch only the mapping's declared fields.
    pub select_mapped_fields: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            n1_detection: true,
            n1_threshold: 3,
            select_mapped_fields: true,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_n1_detection(mut self, value: bool) -> Self {
        self.n1_detection = value;
        self
    }

    #[must_use]
    pub fn with_n1_threshold(mut self, value: usize) -> Self {
        self.n1_threshold = value;
        self
    }

    #[must_use]
    pub fn with_select_mapped_fields(mut self, value: bool) -> Self {
        self.select_mapped_fields = value;
        self
    }
}

// ============================================================================
// Save Result
// ============================================================================

/// The writes a `save` or `delete` committed, in write order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveResult {
    records: Vec<Record>,
}

impl SaveResult {
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Committed writes against one namespace.
    pub fn writes_to<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a Record> + 'a {
        self.records
            .iter()
            .filter(move |r| r.namespace() == namespace)
    }
}

/// Merge records equal by kind, namespace and attributes, keeping the
/// greatest depth. First-seen order is preserved.
fn dedupe(records: Vec<Record>) -> Vec<Record> {
    let mut positions: HashMap<Record, usize> = HashMap::new();
    let mut out: Vec<Record> = Vec::with_capacity(records.len());
    for record in records {
        match positions.get(&record) {
            Some(&pos) => {
                if record.depth() > out[pos].depth() {
                    out[pos] = record;
                }
            }
            None => {
                positions.insert(record.clone(), out.len());
                out.push(record);
            }
        }
    }
    out
}

// ============================================================================
// Store Facade
// ============================================================================

struct FacadeInner {
    registry: Rc<MappingRegistry>,
    storage: Arc<dyn Storage>,
    config: StoreConfig,
    dirty_map: Rc<RefCell<DirtyMap>>,
    n1: Rc<RefCell<N1QueryTracker>>,
    events: RefCell<StoreEventCallbacks>,
}

impl FacadeInner {
    fn loader(&self) -> GraphLoader {
        GraphLoader::new(
            Rc::clone(&self.registry),
            Arc::clone(&self.storage),
            Rc::clone(&self.dirty_map),
            Rc::clone(&self.n1),
            self.config.clone(),
        )
    }

    fn fire(&self, event: StoreEvent) -> Result<()> {
        self.events.borrow_mut().fire(event)
    }

    /// Write `records` in order inside one transaction.
    fn write(&self, records: &[Record]) -> Result<()> {
        let storage = self.storage.as_ref();
        let result = storage.transaction(&mut || {
            for record in records {
                let outcome = if record.is_delete() {
                    storage.delete(record)
                } else {
                    storage.upsert(record)
                };
                outcome.map_err(|source| UpsertError {
                    namespace: record.namespace().to_string(),
                    identity: record.identity(),
                    kind: record.kind(),
                    source,
                })?;
                tracing::trace!(
                    namespace = record.namespace(),
                    kind = ?record.kind(),
                    depth = record.depth(),
                    "wrote record"
                );
            }
            Ok(())
        });

        if let Err(err) = &result {
            tracing::warn!(error = %err, records = records.len(), "write batch rolled back");
            if let Err(cb_err) = self.fire(StoreEvent::AfterRollback) {
                tracing::warn!(error = %cb_err, "after_rollback callback failed");
            }
        }
        result
    }

    /// Bring the dirty map in line with committed writes.
    fn settle(&self, records: &[Record]) {
        let mut dirty = self.dirty_map.borrow_mut();
        for record in records {
            if record.is_delete() {
                dirty.forget(record);
            } else {
                dirty.refresh(record);
            }
        }
    }
}

/// Entry point: owns session-scoped state and hands out [`Store`]s.
///
/// Cloning shares the façade.
#[derive(Clone)]
pub struct StoreFacade {
    inner: Rc<FacadeInner>,
}

impl StoreFacade {
    /// Create a façade with the default configuration.
    ///
    /// The registry is validated first.
    pub fn new(registry: Rc<MappingRegistry>, storage: Arc<dyn Storage>) -> Result<Self> {
        Self::with_config(registry, storage, StoreConfig::default())
    }

    pub fn with_config(
        registry: Rc<MappingRegistry>,
        storage: Arc<dyn Storage>,
        config: StoreConfig,
    ) -> Result<Self> {
        registry.validate()?;

        let mut n1 = N1QueryTracker::new().with_threshold(config.n1_threshold);
        if !config.n1_detection {
            n1.disable();
        }
        tracing::debug!(mappings = registry.len(), ?config, "store facade created");

        Ok(Self {
            inner: Rc::new(FacadeInner {
                registry,
                storage,
                config,
                dirty_map: Rc::new(RefCell::new(DirtyMap::new())),
                n1: Rc::new(RefCell::new(n1)),
                events: RefCell::new(StoreEventCallbacks::default()),
            }),
        })
    }

    /// A store over every row of `mapping_name`.
    pub fn store(&self, mapping_name: &str) -> Result<Store> {
        let mapping = self.inner.registry.get(mapping_name)?;
        Ok(Store {
            facade: Rc::clone(&self.inner),
            mapping: mapping_name.to_string(),
            dataset: mapping.dataset(self.inner.config.select_mapped_fields),
            eager: EagerLoad::new(),
        })
    }

    pub fn on_before_save(&self, f: impl FnMut() -> Result<()> + 'static) {
        self.inner.events.borrow_mut().before_save.push(Box::new(f));
    }

    pub fn on_after_save(&self, f: impl FnMut() -> Result<()> + 'static) {
        self.inner.events.borrow_mut().after_save.push(Box::new(f));
    }

    pub fn on_after_rollback(&self, f: impl FnMut() -> Result<()> + 'static) {
        self.inner.events.borrow_mut().after_rollback.push(Box::new(f));
    }

    /// Start a traversal outside any store, e.g. to load rows fetched elsewhere.
    pub fn loader(&self) -> GraphLoader {
        self.inner.loader()
    }

    pub fn dirty_map(&self) -> Ref<'_, DirtyMap> {
        self.inner.dirty_map.borrow()
    }

    pub fn n1_stats(&self) -> N1Stats {
        self.inner.n1.borrow().stats()
    }

    pub fn reset_n1(&self) {
        self.inner.n1.borrow_mut().reset();
    }

    pub fn registry(&self) -> &MappingRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }
}

impl fmt::Debug for StoreFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreFacade")
            .field("mappings", &self.inner.registry.len())
            .field("config", &self.inner.config)
            .field("snapshots", &self.inner.dirty_map.borrow().len())
            .field("events", &self.inner.events.borrow())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Store
// ============================================================================

/// Queries and writes for one mapping.
#[derive(Clone)]
pub struct Store {
    facade: Rc<FacadeInner>,
    mapping: String,
    dataset: Dataset,
    eager: EagerLoad,
}

impl Store {
    pub fn mapping_name(&self) -> &str {
        &self.mapping
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    #[must_use]
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.dataset = self.dataset.where_eq(field, value);
        self
    }

    #[must_use]
    pub fn where_in<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.dataset = self.dataset.where_in(field, values);
        self
    }

    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.dataset = self.dataset.order_by(field, direction);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.dataset = self.dataset.limit(limit);
        self
    }

    /// Apply a named subset registered on the mapping.
    pub fn subset(mut self, name: &str) -> Result<Self> {
        let narrow = Rc::clone(self.facade.registry.get(&self.mapping)?.subset_fn(name)?);
        self.dataset = narrow(self.dataset);
        Ok(self)
    }

    /// Prefetch associations for every loaded row.
    #[must_use]
    pub fn eager_load(mut self, plan: EagerLoad) -> Self {
        self.eager = plan;
        self
    }

    /// Load every matching row in one traversal.
    #[tracing::instrument(level = "debug", skip(self), fields(mapping = %self.mapping))]
    pub fn all(&self) -> Result<Vec<Node>> {
        self.facade
            .loader()
            .fetch(&self.mapping, &self.dataset, &self.eager)
    }

    pub fn first(&self) -> Result<Option<Node>> {
        let dataset = self.dataset.clone().limit(1);
        Ok(self
            .facade
            .loader()
            .fetch(&self.mapping, &dataset, &self.eager)?
            .into_iter()
            .next())
    }

    pub fn count(&self) -> Result<usize> {
        if self.dataset.is_statically_empty() {
            return Ok(0);
        }
        Ok(self.facade.storage.count(&self.dataset)?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        if self.dataset.is_statically_empty() {
            return Ok(true);
        }
        Ok(self.facade.storage.is_empty(&self.dataset)?)
    }

    /// The minimal, write-ordered records a save of `node` would issue.
    pub fn changes(&self, node: &Node) -> Result<Vec<Record>> {
        Ok(self.plan(node)?.0)
    }

    fn plan(&self, node: &Node) -> Result<(Vec<Record>, Vec<CollectionProxy>)> {
        let Serialized { records, touched } = GraphSerializer::new(&self.facade.registry).walk(
            &self.mapping,
            node,
            0,
            &Attributes::new(),
        )?;
        let total = records.len();

        let dirty = self.facade.dirty_map.borrow();
        let mut plan: Vec<Record> = dedupe(records)
            .iter()
            .filter(|r| dirty.is_dirty(r))
            .map(|r| dirty.reject_unchanged_fields(r))
            .collect();
        plan.sort_by_key(Record::depth);

        tracing::debug!(serialized = total, dirty = plan.len(), "computed changes");
        Ok((plan, touched))
    }

    /// Persist every change reachable from `node` in one transaction.
    ///
    /// On failure nothing is written, the dirty map is untouched and the
    /// objects are left as they were. On success pushes and deletes buffered
    /// on the walked collections are committed.
    #[tracing::instrument(level = "debug", skip(self, node), fields(mapping = %self.mapping))]
    pub fn save(&self, node: &Node) -> Result<SaveResult> {
        self.facade.fire(StoreEvent::BeforeSave)?;

        let (plan, touched) = self.plan(node)?;
        if plan.is_empty() {
            tracing::debug!("nothing to save");
        } else {
            self.facade.write(&plan)?;
            self.facade.settle(&plan);
            tracing::info!(
                mapping = %self.mapping,
                records = plan.len(),
                "saved object graph"
            );
        }
        for proxy in &touched {
            proxy.commit();
        }

        self.facade.fire(StoreEvent::AfterSave)?;
        Ok(SaveResult { records: plan })
    }

    /// Delete the row behind `node`. Associations are not touched.
    #[tracing::instrument(level = "debug", skip(self, node), fields(mapping = %self.mapping))]
    pub fn delete(&self, node: &Node) -> Result<SaveResult> {
        let mapping = self.facade.registry.get(&self.mapping)?;
        let dump = mapping.dump(node)?;
        let full = Record::delete(
            mapping.namespace(),
            mapping.primary_key_fields().iter().cloned(),
            dump.attributes().clone(),
            0,
        );
        if full.identity_values().iter().any(Value::is_null) {
            return Err(Error::Mapping(MappingError::new(
                MappingErrorKind::MissingPrimaryKey,
                format!("cannot delete a '{}' without a primary key", self.mapping),
            )));
        }
        let record = Record::delete(
            mapping.namespace(),
            mapping.primary_key_fields().iter().cloned(),
            full.identity(),
            0,
        );

        let plan = vec![record];
        self.facade.write(&plan)?;
        self.facade.settle(&plan);
        tracing::info!(mapping = %self.mapping, "deleted object");
        Ok(SaveResult { records: plan })
    }

    /// Delete every row matching the current dataset, returning how many
    /// went. Snapshots of the deleted rows are dropped.
    #[tracing::instrument(level = "debug", skip(self), fields(mapping = %self.mapping))]
    pub fn delete_all(&self) -> Result<usize> {
        if self.dataset.is_statically_empty() {
            return Ok(0);
        }
        let mapping = self.facade.registry.get(&self.mapping)?;
        let keys = self.facade.storage.fetch(
            &self
                .dataset
                .clone()
                .select(mapping.primary_key_fields().iter().cloned()),
        )?;

        let deleted = self.facade.storage.delete_matching(&self.dataset)?;

        let mut dirty = self.facade.dirty_map.borrow_mut();
        for row in &keys {
            if let Some(key) =
                IdentityKey::from_attributes(mapping.namespace(), mapping.primary_key_fields(), row)
            {
                dirty.forget_key(&key);
            }
        }
        tracing::info!(mapping = %self.mapping, deleted, "deleted matching rows");
        Ok(deleted)
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("mapping", &self.mapping)
            .field("dataset", &self.dataset)
            .field("eager", &self.eager)
            .finish_non_exhaustive()
    }
}
