//! Graph loading: rows in, object graphs out.
//!
//! A [`GraphLoader`] is one traversal. It owns a fresh [`IdentityMap`] and
//! shares the façade's [`DirtyMap`]. Every association on a loaded object gets
//! a proxy; proxies built from prefetched [`EagerData`] slice an in-memory
//! superset, all others run a query scoped to their owner's key on first read.
//! Either way they materialize rows through the same traversal, so identity is
//! preserved across every path and across lazy and eager loading.

use std::cell::{Ref, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use graphmap_core::{Attributes, Dataset, Record, Result, Storage};

use crate::association::Association;
use crate::dirty_map::DirtyMap;
use crate::eager::{EagerData, EagerEntry, EagerLoad, Superset};
use crate::identity_map::{IdentityKey, IdentityMap};
use crate::mapping::{AssociationValue, LoadedRow, MappingRegistry, RelationMapping};
use crate::n1_detection::N1QueryTracker;
use crate::node::Node;
use crate::proxy::{CollectionProxy, SingleProxy};
use crate::store::StoreConfig;

struct Traversal {
    registry: Rc<MappingRegistry>,
    storage: Arc<dyn Storage>,
    config: StoreConfig,
    identity_map: RefCell<IdentityMap>,
    dirty_map: Rc<RefCell<DirtyMap>>,
    n1: Rc<RefCell<N1QueryTracker>>,
}

/// One identity-preserving traversal over the store.
///
/// Cloning shares the traversal.
#[derive(Clone)]
pub struct GraphLoader {
    inner: Rc<Traversal>,
}

impl GraphLoader {
    pub fn new(
        registry: Rc<MappingRegistry>,
        storage: Arc<dyn Storage>,
        dirty_map: Rc<RefCell<DirtyMap>>,
        n1: Rc<RefCell<N1QueryTracker>>,
        config: StoreConfig,
    ) -> Self {
        Self {
            inner: Rc::new(Traversal {
                registry,
                storage,
                config,
                identity_map: RefCell::new(IdentityMap::new()),
                dirty_map,
                n1,
            }),
        }
    }

    pub fn identity_map(&self) -> Ref<'_, IdentityMap> {
        self.inner.identity_map.borrow()
    }

    /// Run `dataset`, prefetch `plan` for the returned rows and load them.
    #[tracing::instrument(level = "debug", skip(self, dataset, plan), fields(namespace = dataset.namespace()))]
    pub fn fetch(
        &self,
        mapping_name: &str,
        dataset: &Dataset,
        plan: &EagerLoad,
    ) -> Result<Vec<Node>> {
        if dataset.is_statically_empty() {
            return Ok(Vec::new());
        }
        let rows = self.inner.storage.fetch(dataset)?;
        tracing::debug!(rows = rows.len(), eager = plan.len(), "fetched root rows");

        let eager = if plan.is_empty() {
            EagerData::new()
        } else {
            self.prefetch(mapping_name, &rows, plan)?
        };
        self.load_all(mapping_name, rows, &eager)
    }

    /// Compute the supersets `plan` names for a batch of parent rows.
    ///
    /// Issues one query per one-to-many or many-to-one hop and two per
    /// many-to-many hop, however many parents there are.
    pub fn prefetch(
        &self,
        mapping_name: &str,
        parents: &[Attributes],
        plan: &EagerLoad,
    ) -> Result<EagerData> {
        let registry = &self.inner.registry;
        let mapping = registry.get(mapping_name)?;
        let mut data = EagerData::new();

        for (name, nested_plan) in plan.iter() {
            let association = mapping.get_association(name)?;
            let target = registry.get(association.target())?;
            let superset = association.eager_superset(
                self.inner.storage.as_ref(),
                target,
                parents,
                self.inner.config.select_mapped_fields,
            )?;
            self.snapshot_join_rows(association, &superset);

            let nested = if nested_plan.is_empty() {
                EagerData::new()
            } else {
                self.prefetch(target.name(), &superset.rows, nested_plan)?
            };
            tracing::trace!(
                association = name,
                rows = superset.rows.len(),
                "prefetched association"
            );
            data.insert(name, EagerEntry { superset, nested });
        }
        Ok(data)
    }

    pub fn load_all(
        &self,
        mapping_name: &str,
        rows: Vec<Attributes>,
        eager: &EagerData,
    ) -> Result<Vec<Node>> {
        rows.into_iter()
            .map(|row| self.load(mapping_name, row, eager))
            .collect()
    }

    /// Materialize one row.
    ///
    /// A row whose identity is already live in this traversal yields the
    /// existing object and the factory is not called.
    ///
    /// The identity map is not borrowed while the factory runs, since a
    /// factory may read an eager proxy and so load rows through this same
    /// traversal. Hence the lookup and the insert are separate steps here
    /// rather than one [`IdentityMap::get_or_create`].
    pub fn load(&self, mapping_name: &str, row: Attributes, eager: &EagerData) -> Result<Node> {
        let mapping = self.inner.registry.get(mapping_name)?;
        let key =
            IdentityKey::from_attributes(mapping.namespace(), mapping.primary_key_fields(), &row);
        if let Some(key) = &key {
            if let Some(node) = self.inner.identity_map.borrow().get(key) {
                tracing::trace!(namespace = mapping.namespace(), "identity map hit");
                return Ok(node);
            }
        }

        let mut values = Vec::with_capacity(mapping.associations().len());
        for (name, association) in mapping.associations() {
            let value = self.association_value(mapping, name, association, &row, eager.get(name))?;
            values.push((name.clone(), value));
        }
        let loaded = values
            .into_iter()
            .fold(LoadedRow::new(row), |loaded, (name, value)| {
                loaded.with_association(name, value)
            });
        let node = mapping.build(&loaded)?;

        match key {
            Some(key) => {
                self.inner.dirty_map.borrow_mut().load(&Record::upsert(
                    mapping.namespace(),
                    mapping.primary_key_fields().iter().cloned(),
                    loaded.attributes().clone(),
                    0,
                ));
                Ok(self.inner.identity_map.borrow_mut().insert_if_absent(key, node))
            }
            None => Ok(node),
        }
    }

    fn association_value(
        &self,
        owner: &RelationMapping,
        name: &str,
        association: &Association,
        row: &Attributes,
        eager: Option<&Rc<EagerEntry>>,
    ) -> Result<AssociationValue> {
        let owner_key = association.owner_key();
        let Some(key) = row.get(owner_key).filter(|v| !v.is_null()) else {
            // No key, nothing associated.
            return Ok(match association {
                Association::ManyToOne { .. } => AssociationValue::One(None),
                _ => AssociationValue::Many(CollectionProxy::new()),
            });
        };

        let mut scope = Attributes::new();
        scope.insert(owner_key.to_string(), key.clone());

        let loader = self.clone();
        let owner_namespace = owner.namespace().to_string();
        let name = name.to_string();
        let association_ = association.clone();
        let eager = eager.cloned();
        let scope_ = scope.clone();
        let resolve = move || {
            loader.resolve(
                &owner_namespace,
                &name,
                &association_,
                &scope_,
                eager.as_deref(),
            )
        };

        Ok(match association {
            Association::ManyToOne { target_key, .. } => {
                let mut known = Attributes::new();
                known.insert(target_key.clone(), key.clone());
                AssociationValue::One(Some(SingleProxy::lazy(known, move || {
                    Ok(resolve()?.into_iter().next())
                })))
            }
            _ => {
                let adopter = self.clone();
                let target = association.target().to_string();
                AssociationValue::Many(
                    CollectionProxy::lazy(resolve).adopting(move |node| adopter.adopt(&target, node)),
                )
            }
        })
    }

    /// Register an object a save persisted through one of this traversal's
    /// collections, so a later load of its row yields that object.
    fn adopt(&self, mapping_name: &str, node: &Node) {
        let Ok(mapping) = self.inner.registry.get(mapping_name) else {
            return;
        };
        let values = mapping
            .primary_key_fields()
            .iter()
            .map(|field| node.field(field).filter(|v| !v.is_null()))
            .collect::<Option<Vec<_>>>();
        let Some(values) = values else {
            tracing::trace!(namespace = mapping.namespace(), "adopted object has no key");
            return;
        };

        let key = IdentityKey::new(mapping.namespace(), values);
        let kept = self
            .inner
            .identity_map
            .borrow_mut()
            .get_or_create(key, || Ok(node.clone()));
        if kept.is_ok_and(|kept| !kept.ptr_eq(node)) {
            tracing::debug!(
                namespace = mapping.namespace(),
                "identity already live in traversal, keeping it"
            );
        }
    }

    /// Produce the members of one association for one owner.
    fn resolve(
        &self,
        owner_namespace: &str,
        name: &str,
        association: &Association,
        scope: &Attributes,
        eager: Option<&EagerEntry>,
    ) -> Result<Vec<Node>> {
        let target = self.inner.registry.get(association.target())?;

        if let Some(entry) = eager {
            let rows = association.slice(&entry.superset, scope);
            return self.load_all(target.name(), rows, &entry.nested);
        }

        if let Some(node) = self.cached_target(association, target, scope) {
            return Ok(vec![node]);
        }

        self.inner.n1.borrow_mut().record_load(owner_namespace, name);
        tracing::debug!(
            namespace = owner_namespace,
            association = name,
            "lazy association load"
        );
        let superset = association.eager_superset(
            self.inner.storage.as_ref(),
            target,
            std::slice::from_ref(scope),
            self.inner.config.select_mapped_fields,
        )?;
        self.snapshot_join_rows(association, &superset);
        let rows = association.slice(&superset, scope);
        self.load_all(target.name(), rows, &EagerData::new())
    }

    /// A many-to-one target already live in this traversal, found without a
    /// query when the target key is the target's whole primary key.
    fn cached_target(
        &self,
        association: &Association,
        target: &RelationMapping,
        scope: &Attributes,
    ) -> Option<Node> {
        let Association::ManyToOne {
            foreign_key,
            target_key,
            ..
        } = association
        else {
            return None;
        };
        if target.primary_key_fields() != std::slice::from_ref(target_key) {
            return None;
        }
        let key = IdentityKey::new(target.namespace(), vec![scope.get(foreign_key)?.clone()]);
        self.inner.identity_map.borrow().get(&key)
    }

    fn snapshot_join_rows(&self, association: &Association, superset: &Superset) {
        if superset.join_rows.is_empty() {
            return;
        }
        let mut dirty = self.inner.dirty_map.borrow_mut();
        for row in &superset.join_rows {
            if let Some(record) = association.join_record_for_row(row) {
                dirty.load(&record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::JoinTable;
    use crate::mapping::Dump;
    use crate::node::{Entity, ObjectRef};
    use graphmap_core::Value;
    use graphmap_memory::MemoryStorage;
    use std::cell::Cell;

    struct User {
        id: String,
        posts: CollectionProxy,
    }

    struct Post {
        id: String,
        author: Option<SingleProxy>,
        tags: CollectionProxy,
    }

    struct Tag {
        id: String,
    }

    impl Entity for User {
        fn field(&self, name: &str) -> Option<Value> {
            (name == "id").then(|| Value::from(&self.id))
        }
    }

    impl Entity for Post {
        fn field(&self, name: &str) -> Option<Value> {
            (name == "id").then(|| Value::from(&self.id))
        }
    }

    impl Entity for Tag {
        fn field(&self, name: &str) -> Option<Value> {
            (name == "id").then(|| Value::from(&self.id))
        }
    }

    fn registry(user_builds: Rc<Cell<usize>>) -> Rc<MappingRegistry> {
        let user = RelationMapping::new(
            "user",
            "users",
            move |row| {
                user_builds.set(user_builds.get() + 1);
                Ok(Node::new(User {
                    id: row.value("id")?,
                    posts: row.collection("posts")?,
                }))
            },
            |_| Ok(Dump::new()),
        )
        .fields(["id", "name"])
        .association("posts", Association::one_to_many("post", "id", "author_id"));

        let post = RelationMapping::new(
            "post",
            "posts",
            |row| {
                Ok(Node::new(Post {
                    id: row.value("id")?,
                    author: row.single("author")?,
                    tags: row.collection("tags")?,
                }))
            },
            |_| Ok(Dump::new()),
        )
        .fields(["id", "author_id", "subject"])
        .association("author", Association::many_to_one("user", "author_id", "id"))
        .association(
            "tags",
            Association::many_to_many(
                "tag",
                "id",
                "id",
                JoinTable::new("posts_tags", "post_id", "tag_id"),
            ),
        );

        let tag = RelationMapping::new(
            "tag",
            "tags",
            |row| Ok(Node::new(Tag { id: row.value("id")? })),
            |_| Ok(Dump::new()),
        )
        .fields(["id"]);

        Rc::new(MappingRegistry::new().with(user).with(post).with(tag))
    }

    fn storage() -> Arc<MemoryStorage> {
        let storage = MemoryStorage::new();
        for (id, name) in [("u1", "Ada"), ("u2", "Bob")] {
            storage.insert_row("users", [("id", Value::from(id)), ("name", Value::from(name))]);
        }
        for (id, author) in [("p1", Some("u1")), ("p2", Some("u1")), ("p3", None)] {
            storage.insert_row(
                "posts",
                [
                    ("id", Value::from(id)),
                    ("author_id", Value::from(author)),
                    ("subject", Value::from("s")),
                ],
            );
        }
        storage.insert_row("tags", [("id", Value::from("t1"))]);
        storage.insert_row(
            "posts_tags",
            [("post_id", Value::from("p1")), ("tag_id", Value::from("t1"))],
        );
        Arc::new(storage)
    }

    fn loader(registry: Rc<MappingRegistry>, storage: Arc<MemoryStorage>) -> GraphLoader {
        GraphLoader::new(
            registry,
            storage,
            Rc::new(RefCell::new(DirtyMap::new())),
            Rc::new(RefCell::new(N1QueryTracker::new())),
            StoreConfig::default(),
        )
    }

    fn user(node: &Node) -> ObjectRef<User> {
        node.downcast::<User>().unwrap()
    }

    #[test]
    fn loading_is_lazy() {
        let storage = storage();
        let loader = loader(registry(Rc::new(Cell::new(0))), Arc::clone(&storage));

        let users = loader
            .fetch("user", &Dataset::new("users"), &EagerLoad::new())
            .unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(storage.query_count(), 1);

        let posts = user(&users[0]).borrow().posts.clone();
        assert_eq!(posts.len().unwrap(), 2);
        assert_eq!(storage.query_count(), 2);
    }

    #[test]
    fn same_row_via_two_paths_is_one_object() {
        let storage = storage();
        let builds = Rc::new(Cell::new(0));
        let loader = loader(registry(Rc::clone(&builds)), Arc::clone(&storage));

        let users = loader
            .fetch("user", &Dataset::new("users").where_eq("id", "u1"), &EagerLoad::new())
            .unwrap();
        let ada = users[0].clone();
        let posts = user(&ada).borrow().posts.items::<Post>().unwrap();
        let queries = storage.query_count();

        for post in posts {
            let author = post.borrow().author.clone().unwrap().get().unwrap().unwrap();
            assert!(author.ptr_eq(&ada));
        }
        assert_eq!(builds.get(), 1);
        // Authors came from the identity map.
        assert_eq!(storage.query_count(), queries);
    }

    #[test]
    fn null_foreign_key_yields_no_proxy() {
        let storage = storage();
        let loader = loader(registry(Rc::new(Cell::new(0))), Arc::clone(&storage));

        let posts = loader
            .fetch("post", &Dataset::new("posts").where_eq("id", "p3"), &EagerLoad::new())
            .unwrap();
        let post = posts[0].downcast::<Post>().unwrap();
        assert!(post.borrow().author.is_none());
    }

    #[test]
    fn known_key_reads_without_a_query() {
        let storage = storage();
        let loader = loader(registry(Rc::new(Cell::new(0))), Arc::clone(&storage));

        let posts = loader
            .fetch("post", &Dataset::new("posts").where_eq("id", "p1"), &EagerLoad::new())
            .unwrap();
        let author = posts[0].downcast::<Post>().unwrap().borrow().author.clone().unwrap();
        assert_eq!(author.read("id").unwrap(), Some(Value::from("u1")));
        assert_eq!(storage.query_count(), 1);
    }

    #[test]
    fn eager_load_issues_one_query_per_hop() {
        let storage = storage();
        let loader = loader(registry(Rc::new(Cell::new(0))), Arc::clone(&storage));
        let plan = EagerLoad::new().include_nested("posts.tags");

        let users = loader.fetch("user", &Dataset::new("users"), &plan).unwrap();
        // users + posts + posts_tags + tags
        assert_eq!(storage.query_count(), 4);

        for node in &users {
            for post in user(node).borrow().posts.items::<Post>().unwrap() {
                post.borrow().tags.len().unwrap();
            }
        }
        assert_eq!(storage.query_count(), 4);
    }

    #[test]
    fn loaded_rows_and_join_rows_are_snapshotted() {
        let storage = storage();
        let dirty = Rc::new(RefCell::new(DirtyMap::new()));
        let loader = GraphLoader::new(
            registry(Rc::new(Cell::new(0))),
            storage,
            Rc::clone(&dirty),
            Rc::new(RefCell::new(N1QueryTracker::new())),
            StoreConfig::default(),
        );

        let posts = loader
            .fetch("post", &Dataset::new("posts").where_eq("id", "p1"), &EagerLoad::new())
            .unwrap();
        posts[0].downcast::<Post>().unwrap().borrow().tags.load().unwrap();

        let dirty = dirty.borrow();
        assert!(dirty.snapshot(&IdentityKey::new("posts", vec![Value::from("p1")])).is_some());
        assert!(dirty
            .snapshot(&IdentityKey::new(
                "posts_tags",
                vec![Value::from("p1"), Value::from("t1")]
            ))
            .is_some());
        assert!(dirty.snapshot(&IdentityKey::new("tags", vec![Value::from("t1")])).is_some());
    }

    #[test]
    fn committed_member_is_the_object_a_later_read_yields() {
        let storage = storage();
        let builds = Rc::new(Cell::new(0));
        let loader = loader(registry(Rc::clone(&builds)), Arc::clone(&storage));

        let users = loader
            .fetch("user", &Dataset::new("users").where_eq("id", "u2"), &EagerLoad::new())
            .unwrap();
        let posts = user(&users[0]).borrow().posts.clone();
        let p9 = Node::new(Post {
            id: "p9".into(),
            author: None,
            tags: CollectionProxy::new(),
        });
        posts.push(p9.clone());

        // What a successful save does.
        storage.insert_row(
            "posts",
            [
                ("id", Value::from("p9")),
                ("author_id", Value::from("u2")),
                ("subject", Value::from("s")),
            ],
        );
        posts.commit();
        assert!(
            loader
                .identity_map()
                .get(&IdentityKey::new("posts", vec![Value::from("p9")]))
                .is_some_and(|n| n.ptr_eq(&p9))
        );

        let members = posts.nodes().unwrap();
        assert_eq!(members.len(), 1);
        assert!(members[0].ptr_eq(&p9));
    }

    #[test]
    fn factory_may_read_eager_proxies() {
        let storage = storage();
        let user = RelationMapping::new(
            "user",
            "users",
            |row| {
                let posts = row.collection("posts")?;
                posts.load()?;
                Ok(Node::new(User {
                    id: row.value("id")?,
                    posts,
                }))
            },
            |_| Ok(Dump::new()),
        )
        .fields(["id", "name"])
        .association("posts", Association::one_to_many("post", "id", "author_id"));
        let base = registry(Rc::new(Cell::new(0)));
        let registry = MappingRegistry::new()
            .with(user)
            .with(base.get("post").unwrap().clone())
            .with(base.get("tag").unwrap().clone());
        let loader = loader(Rc::new(registry), Arc::clone(&storage));

        let users = loader
            .fetch("user", &Dataset::new("users"), &EagerLoad::new().include("posts"))
            .unwrap();
        let ada = users[0].downcast::<User>().unwrap();
        assert!(ada.borrow().posts.is_loaded());
        assert_eq!(ada.borrow().posts.len().unwrap(), 2);
        assert_eq!(storage.query_count(), 2);
    }

    #[test]
    fn lazy_loads_feed_the_n1_tracker() {
        let storage = storage();
        let n1 = Rc::new(RefCell::new(N1QueryTracker::new()));
        let loader = GraphLoader::new(
            registry(Rc::new(Cell::new(0))),
            storage,
            Rc::new(RefCell::new(DirtyMap::new())),
            Rc::clone(&n1),
            StoreConfig::default(),
        );

        for node in loader
            .fetch("user", &Dataset::new("users"), &EagerLoad::new())
            .unwrap()
        {
            user(&node).borrow().posts.load().unwrap();
        }
        assert_eq!(n1.borrow().count_for("users", "posts"), 2);
    }
}
