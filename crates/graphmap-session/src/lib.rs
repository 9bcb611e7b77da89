//! Object graph loading and saving for graphmap.
//!
//! `graphmap-session` is the **engine layer**. It turns rows into object
//! graphs and object graphs back into the minimal set of ordered writes.
//!
//! # Role In The Architecture
//!
//! - **Mappings**: a [`MappingRegistry`] of [`RelationMapping`]s describes how
//!   rows become objects and objects become attributes.
//! - **Identity map**: one in-memory object per `(namespace, primary key)`
//!   within a traversal, whichever association path reached it.
//! - **Dirty tracking**: attribute snapshots decide which records, and which
//!   fields of them, a save writes.
//! - **Graph serialization**: a cycle-safe walk that injects foreign keys and
//!   assigns each record a depth so parents are written before children.
//!
//! # Example
//!
//! ```ignore
//! let facade = StoreFacade::new(Rc::new(registry), Arc::new(storage))?;
//! let users = facade.store("user")?;
//!
//! let user = users.where_eq("id", "u1").first()?.unwrap();
//! user.downcast::<User>().unwrap().borrow_mut().name = "Ada".into();
//!
//! // Writes only the changed field of the one changed row.
//! users.save(&user)?;
//! ```

pub mod association;
pub mod dirty_map;
pub mod eager;
pub mod identity_map;
pub mod loader;
pub mod mapping;
pub mod n1_detection;
pub mod node;
pub mod proxy;
pub mod serializer;
pub mod store;

pub use association::{Association, JoinTable};
pub use dirty_map::DirtyMap;
pub use eager::{EagerData, EagerEntry, EagerLoad, Superset};
pub use identity_map::{IdentityKey, IdentityMap};
pub use loader::GraphLoader;
pub use mapping::{
    AssociationValue, Dump, Factory, LoadedRow, MappingRegistry, RelationMapping, Serializer,
    SubsetFn,
};
pub use n1_detection::{N1QueryTracker, N1Stats};
pub use node::{Entity, Node, NodeId, ObjectRef, WeakNode};
pub use proxy::{CollectionProxy, SingleProxy};
pub use serializer::{GraphSerializer, Serialized};
pub use store::{SaveResult, Store, StoreConfig, StoreEvent, StoreEventCallbacks, StoreFacade};
