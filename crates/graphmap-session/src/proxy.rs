//! Lazy stand-ins for association values.
//!
//! A [`CollectionProxy`] holds the members of a to-many association and a
//! [`SingleProxy`] holds the target of a to-one association. Both defer their
//! query until first access and memoize the result. Both are cheap handles:
//! clones share state, so the copy a serializer returns is the same proxy the
//! domain object holds.

use std::cell::RefCell;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::rc::Rc;

use graphmap_core::{Attributes, Result, Value};

use crate::node::{Entity, Node, ObjectRef, contains};

type FetchMany = Rc<dyn Fn() -> Result<Vec<Node>>>;
type FetchOne = Rc<dyn Fn() -> Result<Option<Node>>>;
type Adopt = Rc<dyn Fn(&Node)>;

struct CollectionState {
    fetch: Option<FetchMany>,
    adopt: Option<Adopt>,
    loaded: Option<Vec<Node>>,
    // Persisted additions to a collection that was never read.
    committed: Vec<Node>,
    added: Vec<Node>,
    removed: Vec<Node>,
}

/// The members of a to-many association.
///
/// The first read runs the underlying query and keeps the rows; later reads
/// never query again. [`push`](Self::push) and [`delete`](Self::delete) are
/// buffered separately from the loaded rows, so they work before and after a
/// load and never force one.
#[derive(Clone)]
pub struct CollectionProxy {
    state: Rc<RefCell<CollectionState>>,
}

impl CollectionProxy {
    /// An empty, already-loaded collection, for objects built in memory.
    pub fn new() -> Self {
        Self::with_state(None, Some(Vec::new()))
    }

    /// A collection whose members come from `fetch` on first read.
    pub fn lazy(fetch: impl Fn() -> Result<Vec<Node>> + 'static) -> Self {
        Self::with_state(Some(Rc::new(fetch)), None)
    }

    /// Hand every committed addition to `adopt`.
    ///
    /// The loader uses this to register persisted members with the traversal
    /// the fetch belongs to, so reading the collection later yields the same
    /// objects instead of building copies. A collection with an adopter trusts
    /// its fetch to return committed members.
    #[must_use]
    pub fn adopting(self, adopt: impl Fn(&Node) + 'static) -> Self {
        self.state.borrow_mut().adopt = Some(Rc::new(adopt));
        self
    }

    fn with_state(fetch: Option<FetchMany>, loaded: Option<Vec<Node>>) -> Self {
        Self {
            state: Rc::new(RefCell::new(CollectionState {
                fetch,
                adopt: None,
                loaded,
                committed: Vec::new(),
                added: Vec::new(),
                removed: Vec::new(),
            })),
        }
    }

    /// Has the underlying query run?
    pub fn is_loaded(&self) -> bool {
        self.state.borrow().loaded.is_some()
    }

    /// Are there pushes or deletes not yet committed?
    pub fn is_touched(&self) -> bool {
        let state = self.state.borrow();
        !state.added.is_empty() || !state.removed.is_empty()
    }

    /// Run the underlying query unless it already ran.
    ///
    /// A failed fetch leaves the proxy unloaded so a later read can retry.
    pub fn load(&self) -> Result<()> {
        let fetch = {
            let state = self.state.borrow();
            if state.loaded.is_some() {
                return Ok(());
            }
            state.fetch.clone()
        };
        let mut nodes = match fetch {
            Some(fetch) => fetch()?,
            None => Vec::new(),
        };

        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        if state.loaded.is_none() {
            let committed = std::mem::take(&mut state.committed);
            if state.adopt.is_none() {
                for node in committed {
                    if !contains(&nodes, &node) {
                        nodes.push(node);
                    }
                }
            }
            state.added.retain(|n| !contains(&nodes, n));
            state.loaded = Some(nodes);
            state.fetch = None;
        }
        Ok(())
    }

    /// Current members: loaded rows minus removed, plus added. Forces a load.
    pub fn nodes(&self) -> Result<Vec<Node>> {
        self.load()?;
        Ok(self.pending_members())
    }

    /// Current members without forcing a load.
    ///
    /// If the collection was never read this is just the members added since
    /// it was built.
    pub fn pending_members(&self) -> Vec<Node> {
        let state = self.state.borrow();
        let mut out: Vec<Node> = state
            .loaded
            .iter()
            .flatten()
            .chain(&state.committed)
            .filter(|n| !contains(&state.removed, n))
            .cloned()
            .collect();
        for node in &state.added {
            if !contains(&out, node) {
                out.push(node.clone());
            }
        }
        out
    }

    /// Members downcast to `T`. Members of other types are skipped.
    pub fn items<T: Entity>(&self) -> Result<Vec<ObjectRef<T>>> {
        Ok(self
            .nodes()?
            .iter()
            .filter_map(Node::downcast::<T>)
            .collect())
    }

    /// Visit every current member.
    pub fn each(&self, mut f: impl FnMut(&Node)) -> Result<()> {
        for node in &self.nodes()? {
            f(node);
        }
        Ok(())
    }

    pub fn first(&self) -> Result<Option<Node>> {
        Ok(self.nodes()?.into_iter().next())
    }

    pub fn first_as<T: Entity>(&self) -> Result<Option<ObjectRef<T>>> {
        Ok(self.first()?.and_then(|n| n.downcast::<T>()))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.nodes()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Add a member. Re-adding a deleted member cancels the delete.
    pub fn push(&self, node: Node) {
        let mut state = self.state.borrow_mut();
        if let Some(pos) = state.removed.iter().position(|n| n.ptr_eq(&node)) {
            state.removed.remove(pos);
            return;
        }
        let already_loaded = state.loaded.as_deref().is_some_and(|l| contains(l, &node));
        if !already_loaded && !contains(&state.added, &node) {
            state.added.push(node);
        }
    }

    /// Remove a member. Deleting a member that was only pushed forgets it.
    pub fn delete(&self, node: &Node) {
        let mut state = self.state.borrow_mut();
        if let Some(pos) = state.added.iter().position(|n| n.ptr_eq(node)) {
            state.added.remove(pos);
            return;
        }
        if !contains(&state.removed, node) {
            state.removed.push(node.clone());
        }
    }

    /// Fold buffered changes in once they were persisted.
    ///
    /// Deleted members are dropped. Added members join the loaded rows, or are
    /// kept as committed members until the collection is first read. Either
    /// way they are handed to the adopter.
    pub fn commit(&self) {
        let (adopt, added) = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let added = std::mem::take(&mut state.added);
            let members = match &mut state.loaded {
                Some(loaded) => loaded,
                None => &mut state.committed,
            };
            members.retain(|n| !contains(&state.removed, n));
            members.extend(added.iter().cloned());
            state.removed.clear();
            (state.adopt.clone(), added)
        };
        if let Some(adopt) = adopt {
            for node in &added {
                adopt(node);
            }
        }
    }

    /// Members pushed and not yet committed.
    pub fn added(&self) -> Vec<Node> {
        self.state.borrow().added.clone()
    }

    /// Members deleted and not yet committed.
    pub fn removed(&self) -> Vec<Node> {
        self.state.borrow().removed.clone()
    }

    /// The rows the query returned, if it ran.
    pub fn loaded_nodes(&self) -> Option<Vec<Node>> {
        self.state.borrow().loaded.clone()
    }

    /// Do both handles share state?
    pub fn ptr_eq(&self, other: &CollectionProxy) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl Default for CollectionProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Node>> for CollectionProxy {
    fn from(nodes: Vec<Node>) -> Self {
        Self::with_state(None, Some(nodes))
    }
}

impl AddAssign<Node> for CollectionProxy {
    fn add_assign(&mut self, node: Node) {
        self.push(node);
    }
}

impl SubAssign<&Node> for CollectionProxy {
    fn sub_assign(&mut self, node: &Node) {
        self.delete(node);
    }
}

impl Add<Node> for CollectionProxy {
    type Output = CollectionProxy;

    fn add(self, node: Node) -> CollectionProxy {
        self.push(node);
        self
    }
}

impl Sub<&Node> for CollectionProxy {
    type Output = CollectionProxy;

    fn sub(self, node: &Node) -> CollectionProxy {
        self.delete(node);
        self
    }
}

impl fmt::Debug for CollectionProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("CollectionProxy")
            .field("loaded", &state.loaded.as_ref().map(Vec::len))
            .field("committed", &state.committed.len())
            .field("added", &state.added.len())
            .field("removed", &state.removed.len())
            .finish()
    }
}

enum Target {
    Unresolved(FetchOne),
    Resolved(Option<Node>),
    Assigned(Option<Node>),
}

struct SingleState {
    known: Attributes,
    target: Target,
}

/// The target of a to-one association.
///
/// Reads of the known fields (typically the key the parent row already
/// carries) are answered without resolving. Any other read resolves the
/// target exactly once.
#[derive(Clone)]
pub struct SingleProxy {
    state: Rc<RefCell<SingleState>>,
}

impl SingleProxy {
    /// A proxy resolved by `fetch` on first read of an unknown field.
    pub fn lazy(known: Attributes, fetch: impl Fn() -> Result<Option<Node>> + 'static) -> Self {
        Self::with_target(known, Target::Unresolved(Rc::new(fetch)))
    }

    /// A proxy pointing at an in-memory object.
    pub fn to(node: Node) -> Self {
        Self::with_target(Attributes::new(), Target::Assigned(Some(node)))
    }

    fn with_target(known: Attributes, target: Target) -> Self {
        Self {
            state: Rc::new(RefCell::new(SingleState { known, target })),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self.state.borrow().target, Target::Unresolved(_))
    }

    /// Was the target set explicitly rather than loaded?
    pub fn is_assigned(&self) -> bool {
        matches!(self.state.borrow().target, Target::Assigned(_))
    }

    pub fn known(&self) -> Attributes {
        self.state.borrow().known.clone()
    }

    /// The target, resolving it if needed.
    pub fn get(&self) -> Result<Option<Node>> {
        let fetch = match &self.state.borrow().target {
            Target::Resolved(node) | Target::Assigned(node) => return Ok(node.clone()),
            Target::Unresolved(fetch) => Rc::clone(fetch),
        };
        let node = fetch()?;

        let mut state = self.state.borrow_mut();
        if let Target::Unresolved(_) = state.target {
            tracing::trace!(found = node.is_some(), "single proxy resolved");
            state.target = Target::Resolved(node.clone());
        }
        Ok(node)
    }

    pub fn downcast<T: Entity>(&self) -> Result<Option<ObjectRef<T>>> {
        Ok(self.get()?.and_then(|n| n.downcast::<T>()))
    }

    /// Read a field of the target, answering known fields without resolving.
    pub fn read(&self, field: &str) -> Result<Option<Value>> {
        {
            let state = self.state.borrow();
            if let Target::Unresolved(_) = state.target {
                if let Some(value) = state.known.get(field) {
                    return Ok(Some(value.clone()));
                }
            }
        }
        Ok(self.get()?.and_then(|n| n.field(field)))
    }

    /// Point the association at another object, or at nothing.
    pub fn set(&self, node: Option<Node>) {
        self.state.borrow_mut().target = Target::Assigned(node);
    }

    /// The target if resolved or assigned, without resolving.
    pub fn current(&self) -> Option<Option<Node>> {
        match &self.state.borrow().target {
            Target::Unresolved(_) => None,
            Target::Resolved(node) | Target::Assigned(node) => Some(node.clone()),
        }
    }
}

impl fmt::Debug for SingleProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        let target = match &state.target {
            Target::Unresolved(_) => "unresolved",
            Target::Resolved(_) => "resolved",
            Target::Assigned(_) => "assigned",
        };
        f.debug_struct("SingleProxy")
            .field("known", &state.known)
            .field("target", &target)
            .finish()
    }
}
