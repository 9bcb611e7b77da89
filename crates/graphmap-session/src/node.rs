//! Type-erased handles to domain objects.
//!
//! Domain objects are ordinary structs living in an [`ObjectRef<T>`]
//! (`Rc<RefCell<T>>`). The engine moves them around as [`Node`]s, which keep
//! the shared reference but forget the concrete type. Two nodes are the same
//! object iff [`Node::ptr_eq`] holds; attribute equality is never used for
//! identity.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use graphmap_core::Value;

/// Shared, mutable reference to a domain object.
pub type ObjectRef<T> = Rc<RefCell<T>>;

/// The capability every mapped domain type provides.
///
/// Single-object proxies forward field reads to the resolved target through
/// this method.
pub trait Entity: Any {
    /// Read a persisted field by name.
    fn field(&self, name: &str) -> Option<Value>;
}

trait Slot: Any {
    fn read(&self, name: &str) -> Option<Value>;
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
    fn type_name(&self) -> &'static str;
}

impl<T: Entity> Slot for RefCell<T> {
    fn read(&self, name: &str) -> Option<Value> {
        self.borrow().field(name)
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Address-based identity of a live node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// A clonable, type-erased handle to a domain object.
#[derive(Clone)]
pub struct Node(Rc<dyn Slot>);

impl Node {
    /// Move `value` into a fresh shared cell.
    pub fn new<T: Entity>(value: T) -> Self {
        Node(Rc::new(RefCell::new(value)))
    }

    /// Wrap an existing shared reference without copying it.
    pub fn from_ref<T: Entity>(object: ObjectRef<T>) -> Self {
        Node(object)
    }

    /// Recover the typed reference, if this node holds a `T`.
    pub fn downcast<T: Entity>(&self) -> Option<ObjectRef<T>> {
        Rc::clone(&self.0).into_any().downcast::<RefCell<T>>().ok()
    }

    /// Does this node hold a `T`?
    pub fn is<T: Entity>(&self) -> bool {
        self.downcast::<T>().is_some()
    }

    /// Reference identity.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }

    /// Identity usable as a map key while the node is alive.
    pub fn id(&self) -> NodeId {
        NodeId(Rc::as_ptr(&self.0).cast::<()>() as usize)
    }

    /// Read a field through [`Entity::field`].
    ///
    /// # Panics
    ///
    /// Panics if the object is currently mutably borrowed.
    pub fn field(&self, name: &str) -> Option<Value> {
        self.0.read(name)
    }

    /// Name of the concrete type behind the handle.
    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    pub fn downgrade(&self) -> WeakNode {
        WeakNode(Rc::downgrade(&self.0))
    }
}

impl<T: Entity> From<ObjectRef<T>> for Node {
    fn from(object: ObjectRef<T>) -> Self {
        Node::from_ref(object)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({}@{:#x})", self.type_name(), self.id().0)
    }
}

/// A non-owning [`Node`].
#[derive(Clone)]
pub struct WeakNode(Weak<dyn Slot>);

impl WeakNode {
    pub fn upgrade(&self) -> Option<Node> {
        self.0.upgrade().map(Node)
    }
}

impl fmt::Debug for WeakNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(node) => write!(f, "WeakNode({node:?})"),
            None => write!(f, "WeakNode(<dropped>)"),
        }
    }
}

/// Is `node` (by reference) in `nodes`?
pub(crate) fn contains(nodes: &[Node], node: &Node) -> bool {
    nodes.iter().any(|n| n.ptr_eq(node))
}
