//! graphmap - identity-preserving object graph persistence.
//!
//! graphmap maps graphs of plain Rust objects onto relational rows and back:
//!
//! - Loading preserves identity: one in-memory object per row per traversal
//! - Associations are lazy proxies, or prefetched in one query per hop
//! - Saving walks the graph, writes only what changed, parents first
//! - Every save is one transaction; a failure leaves storage untouched
//!
//! # Quick Start
//!
//! ```ignore
//! use graphmap::prelude::*;
//!
//! struct User {
//!     id: String,
//!     name: String,
//!     posts: CollectionProxy,
//! }
//!
//! impl Entity for User {
//!     fn field(&self, name: &str) -> Option<Value> {
//!         match name {
//!             "id" => Some(Value::from(&self.id)),
//!             "name" => Some(Value::from(&self.name)),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! let users = RelationMapping::new(
//!     "user",
//!     "users",
//!     |row| {
//!         Ok(Node::new(User {
//!             id: row.value("id")?,
//!             name: row.value("name")?,
//!             posts: row.collection("posts")?,
//!         }))
//!     },
//!     |node| {
//!         let user = node.downcast::<User>().ok_or("not a user")?;
//!         let user = user.borrow();
//!         Ok(Dump::new()
//!             .attr("id", &user.id)
//!             .attr("name", &user.name)
//!             .many("posts", &user.posts))
//!     },
//! )
//! .fields(["id", "name"])
//! .association("posts", Association::one_to_many("post", "id", "author_id"));
//!
//! let facade = StoreFacade::new(Rc::new(registry), Arc::new(MemoryStorage::new()))?;
//! let store = facade.store("user")?;
//!
//! let user = store.where_eq("id", "u1").first()?.unwrap();
//! user.downcast::<User>().unwrap().borrow_mut().name = "Ada".into();
//! store.save(&user)?;
//! ```
//!
//! # Crates
//!
//! - `graphmap-core`: values, records, datasets, the `Storage` trait, errors
//! - `graphmap-session`: mappings, proxies, loader, serializer, store façade
//! - `graphmap-memory`: an in-process `Storage` with rollback and a write log

pub use graphmap_core::{
    Attributes, BoxError, Criterion, Dataset, Direction, Error, LoadError, MappingError,
    MappingErrorKind, OrderBy, Record, RecordKind, Result, SerializationError, Storage,
    StorageError, StorageErrorKind, TypeError, UpsertError, Value,
};

pub use graphmap_session::{
    Association, AssociationValue, CollectionProxy, DirtyMap, Dump, EagerData, EagerLoad, Entity,
    GraphLoader, GraphSerializer, IdentityKey, IdentityMap, JoinTable, LoadedRow,
    MappingRegistry, N1QueryTracker, N1Stats, Node, NodeId, ObjectRef, RelationMapping,
    SaveResult, SingleProxy, Store, StoreConfig, StoreEvent, StoreFacade,
};

pub use graphmap_memory::MemoryStorage;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use graphmap::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Associations
        Association,
        CollectionProxy,
        Direction,
        Dump,
        EagerLoad,
        // Objects
        Entity,
        Error,
        JoinTable,
        LoadedRow,
        // Mappings
        MappingRegistry,
        // Storage
        MemoryStorage,
        Node,
        ObjectRef,
        Record,
        RelationMapping,
        Result,
        SingleProxy,
        Storage,
        // Store
        Store,
        StoreConfig,
        StoreFacade,
        Value,
    };
}
