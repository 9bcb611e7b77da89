//! Relation mappings and the registry that holds them.
//!
//! A [`RelationMapping`] describes one entity type: where its rows live, which
//! fields are persisted, which of them form the primary key, how to build an
//! object from a row ([`Factory`]) and how to take one apart again
//! ([`Serializer`]). Mappings refer to each other by name through a
//! [`MappingRegistry`], which is built once and passed around explicitly.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use graphmap_core::{
    Attributes, BoxError, Dataset, Error, LoadError, MappingError, MappingErrorKind, Result,
    SerializationError, TypeError, Value,
};

use crate::association::Association;
use crate::node::Node;
use crate::proxy::{CollectionProxy, SingleProxy};

/// Builds a domain object from a loaded row.
pub type Factory = Rc<dyn Fn(&LoadedRow) -> std::result::Result<Node, BoxError>>;

/// Takes a domain object apart into attributes and association values.
pub type Serializer = Rc<dyn Fn(&Node) -> std::result::Result<Dump, BoxError>>;

/// Narrows a dataset; registered as a named subset.
pub type SubsetFn = Rc<dyn Fn(Dataset) -> Dataset>;

/// The value of one association on an object.
#[derive(Debug, Clone)]
pub enum AssociationValue {
    /// To-many association members.
    Many(CollectionProxy),
    /// To-one association target. `None` when the foreign key is NULL.
    One(Option<SingleProxy>),
}

/// What a factory receives: the row plus ready-made association proxies.
#[derive(Debug, Clone, Default)]
pub struct LoadedRow {
    attributes: Attributes,
    associations: BTreeMap<String, AssociationValue>,
}

impl LoadedRow {
    pub fn new(attributes: Attributes) -> Self {
        Self {
            attributes,
            associations: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_association(mut self, name: impl Into<String>, value: AssociationValue) -> Self {
        self.associations.insert(name.into(), value);
        self
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    /// Convert a field. A missing field converts as NULL.
    pub fn value<T>(&self, field: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        let raw = self.attributes.get(field).cloned().unwrap_or(Value::Null);
        T::try_from(raw).map_err(|e| match e {
            Error::Type(inner) => Error::Type(TypeError {
                field: Some(field.to_string()),
                ..inner
            }),
            other => other,
        })
    }

    /// The proxy built for a to-many association.
    pub fn collection(&self, name: &str) -> Result<CollectionProxy> {
        match self.associations.get(name) {
            Some(AssociationValue::Many(proxy)) => Ok(proxy.clone()),
            Some(AssociationValue::One(_)) => Err(Error::Mapping(MappingError::new(
                MappingErrorKind::Invalid,
                format!("association '{name}' is to-one, not a collection"),
            ))),
            None => Err(Error::Mapping(MappingError::new(
                MappingErrorKind::UnknownAssociation,
                format!("row has no association '{name}'"),
            ))),
        }
    }

    /// The proxy built for a to-one association, `None` for a NULL key.
    pub fn single(&self, name: &str) -> Result<Option<SingleProxy>> {
        match self.associations.get(name) {
            Some(AssociationValue::One(proxy)) => Ok(proxy.clone()),
            Some(AssociationValue::Many(_)) => Err(Error::Mapping(MappingError::new(
                MappingErrorKind::Invalid,
                format!("association '{name}' is a collection, not to-one"),
            ))),
            None => Err(Error::Mapping(MappingError::new(
                MappingErrorKind::UnknownAssociation,
                format!("row has no association '{name}'"),
            ))),
        }
    }
}

/// What a serializer returns.
///
/// Associations left out of the dump are treated as untouched and are not
/// walked.
#[derive(Debug, Clone, Default)]
pub struct Dump {
    attributes: Attributes,
    associations: BTreeMap<String, AssociationValue>,
}

impl Dump {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn many(mut self, name: impl Into<String>, proxy: &CollectionProxy) -> Self {
        self.associations
            .insert(name.into(), AssociationValue::Many(proxy.clone()));
        self
    }

    #[must_use]
    pub fn one(mut self, name: impl Into<String>, proxy: Option<&SingleProxy>) -> Self {
        self.associations
            .insert(name.into(), AssociationValue::One(proxy.cloned()));
        self
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn association(&self, name: &str) -> Option<&AssociationValue> {
        self.associations.get(name)
    }
}

/// How one entity type maps onto one namespace.
#[derive(Clone)]
pub struct RelationMapping {
    name: String,
    namespace: String,
    fields: Vec<String>,
    primary_key: Vec<String>,
    factory: Factory,
    serializer: Serializer,
    associations: BTreeMap<String, Association>,
    subsets: BTreeMap<String, SubsetFn>,
}

impl RelationMapping {
    /// Create a mapping with primary key `id` and no declared fields.
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        factory: impl Fn(&LoadedRow) -> std::result::Result<Node, BoxError> + 'static,
        serializer: impl Fn(&Node) -> std::result::Result<Dump, BoxError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            fields: Vec::new(),
            primary_key: vec!["id".to_string()],
            factory: Rc::new(factory),
            serializer: Rc::new(serializer),
            associations: BTreeMap::new(),
            subsets: BTreeMap::new(),
        }
    }

    /// Declare the persisted fields, in order.
    #[must_use]
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn primary_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn association(mut self, name: impl Into<String>, association: Association) -> Self {
        self.associations.insert(name.into(), association);
        self
    }

    /// Register a named subset query.
    #[must_use]
    pub fn subset(
        mut self,
        name: impl Into<String>,
        narrow: impl Fn(Dataset) -> Dataset + 'static,
    ) -> Self {
        self.subsets.insert(name.into(), Rc::new(narrow));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn field_names(&self) -> &[String] {
        &self.fields
    }

    pub fn primary_key_fields(&self) -> &[String] {
        &self.primary_key
    }

    pub fn associations(&self) -> &BTreeMap<String, Association> {
        &self.associations
    }

    pub fn associations_mut(&mut self) -> &mut BTreeMap<String, Association> {
        &mut self.associations
    }

    pub fn get_association(&self, name: &str) -> Result<&Association> {
        self.associations
            .get(name)
            .ok_or_else(|| MappingError::unknown_association(&self.name, name).into())
    }

    pub fn subset_fn(&self, name: &str) -> Result<&SubsetFn> {
        self.subsets.get(name).ok_or_else(|| {
            Error::Mapping(MappingError::new(
                MappingErrorKind::UnknownSubset,
                format!("mapping '{}' has no subset '{name}'", self.name),
            ))
        })
    }

    /// Does `field` belong to this mapping? Without declared fields every
    /// field does.
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.is_empty() || self.fields.iter().any(|f| f == field)
    }

    /// All rows of the namespace, optionally restricted to declared fields.
    pub fn dataset(&self, select_fields: bool) -> Dataset {
        let dataset = Dataset::new(&self.namespace);
        if select_fields && !self.fields.is_empty() {
            dataset.select(self.fields.iter().cloned())
        } else {
            dataset
        }
    }

    /// Keep only declared fields.
    pub fn project(&self, attributes: &Attributes) -> Attributes {
        attributes
            .iter()
            .filter(|(k, _)| self.has_field(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Run the factory, wrapping failures in [`LoadError`].
    pub fn build(&self, row: &LoadedRow) -> Result<Node> {
        (self.factory)(row).map_err(|source| {
            Error::Load(LoadError {
                mapping: self.name.clone(),
                row: row.attributes.clone(),
                source,
            })
        })
    }

    /// Run the serializer, wrapping failures in [`SerializationError`].
    pub fn dump(&self, node: &Node) -> Result<Dump> {
        (self.serializer)(node).map_err(|source| {
            Error::Serialization(SerializationError {
                mapping: self.name.clone(),
                source,
            })
        })
    }
}

impl fmt::Debug for RelationMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationMapping")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("fields", &self.fields)
            .field("primary_key", &self.primary_key)
            .field("associations", &self.associations)
            .field("subsets", &self.subsets.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Every mapping, by name.
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    mappings: BTreeMap<String, RelationMapping>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping, replacing any mapping with the same name.
    pub fn register(&mut self, mapping: RelationMapping) -> &mut Self {
        self.mappings.insert(mapping.name.clone(), mapping);
        self
    }

    #[must_use]
    pub fn with(mut self, mapping: RelationMapping) -> Self {
        self.register(mapping);
        self
    }

    pub fn get(&self, name: &str) -> Result<&RelationMapping> {
        self.mappings
            .get(name)
            .ok_or_else(|| MappingError::unknown_mapping(name).into())
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut RelationMapping> {
        self.mappings
            .get_mut(name)
            .ok_or_else(|| MappingError::unknown_mapping(name).into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.mappings.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.mappings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Check every mapping and association for consistency.
    pub fn validate(&self) -> Result<()> {
        for mapping in self.mappings.values() {
            if mapping.primary_key.is_empty() {
                return Err(MappingError::new(
                    MappingErrorKind::MissingPrimaryKey,
                    format!("mapping '{}' has an empty primary key", mapping.name),
                )
                .into());
            }
            if let Some(field) = mapping.primary_key.iter().find(|k| !mapping.has_field(k)) {
                return Err(MappingError::new(
                    MappingErrorKind::MissingPrimaryKey,
                    format!(
                        "primary key field '{field}' of mapping '{}' is not a declared field",
                        mapping.name
                    ),
                )
                .into());
            }
            for (name, association) in &mapping.associations {
                let target = self.get(association.target()).map_err(|_| {
                    Error::Mapping(MappingError::new(
                        MappingErrorKind::UnknownMapping,
                        format!(
                            "association '{}.{name}' targets unregistered mapping '{}'",
                            mapping.name,
                            association.target()
                        ),
                    ))
                })?;
                association
                    .validate(mapping, target)
                    .map_err(|message| {
                        MappingError::new(
                            MappingErrorKind::Invalid,
                            format!("association '{}.{name}': {message}", mapping.name),
                        )
                    })?;
            }
        }
        tracing::debug!(mappings = self.mappings.len(), "mapping registry validated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::JoinTable;
    use crate::node::Entity;

    struct Row;

    impl Entity for Row {
        fn field(&self, _name: &str) -> Option<Value> {
            None
        }
    }

    fn mapping(name: &str, namespace: &str) -> RelationMapping {
        RelationMapping::new(name, namespace, |_| Ok(Node::new(Row)), |_| Ok(Dump::new()))
    }

    #[test]
    fn loaded_row_converts_values_with_field_context() {
        let mut attrs = Attributes::new();
        attrs.insert("id".into(), Value::from("u1"));
        attrs.insert("age".into(), Value::from("old"));
        let row = LoadedRow::new(attrs);

        assert_eq!(row.value::<String>("id").unwrap(), "u1");
        assert_eq!(row.value::<Option<String>>("missing").unwrap(), None);
        match row.value::<i64>("age") {
            Err(Error::Type(e)) => assert_eq!(e.field.as_deref(), Some("age")),
            other => panic!("expected a type error, got {other:?}"),
        }
    }

    #[test]
    fn loaded_row_association_shapes() {
        let row = LoadedRow::new(Attributes::new())
            .with_association("posts", AssociationValue::Many(CollectionProxy::new()))
            .with_association("author", AssociationValue::One(None));

        assert!(row.collection("posts").is_ok());
        assert!(row.single("author").unwrap().is_none());
        assert!(row.collection("author").is_err());
        assert!(row.single("nope").is_err());
    }

    #[test]
    fn factory_failure_becomes_load_error() {
        let m = RelationMapping::new(
            "user",
            "users",
            |_| Err("boom".into()),
            |_| Ok(Dump::new()),
        );
        let err = m.build(&LoadedRow::default()).unwrap_err();
        assert!(matches!(err, Error::Load(ref e) if e.mapping == "user"));
    }

    #[test]
    fn dataset_selects_declared_fields() {
        let m = mapping("user", "users").fields(["id", "name"]);
        assert_eq!(
            m.dataset(true).columns().unwrap(),
            ["id".to_string(), "name".to_string()]
        );
        assert!(m.dataset(false).columns().is_none());
        assert!(mapping("user", "users").dataset(true).columns().is_none());
    }

    #[test]
    fn validate_accepts_consistent_registry() {
        let registry = MappingRegistry::new()
            .with(
                mapping("user", "users")
                    .fields(["id", "name"])
                    .association("posts", Association::one_to_many("post", "id", "author_id")),
            )
            .with(
                mapping("post", "posts")
                    .fields(["id", "author_id"])
                    .association("author", Association::many_to_one("user", "author_id", "id"))
                    .association(
                        "tags",
                        Association::many_to_many(
                            "tag",
                            "id",
                            "id",
                            JoinTable::new("posts_tags", "post_id", "tag_id"),
                        ),
                    ),
            )
            .with(mapping("tag", "tags").fields(["id"]));

        registry.validate().unwrap();
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn validate_rejects_bad_mappings() {
        let missing_pk = MappingRegistry::new().with(mapping("user", "users").fields(["name"]));
        assert!(matches!(
            missing_pk.validate(),
            Err(Error::Mapping(MappingError { kind: MappingErrorKind::MissingPrimaryKey, .. }))
        ));

        let dangling = MappingRegistry::new().with(
            mapping("user", "users").association("posts", Association::one_to_many("post", "id", "author_id")),
        );
        assert!(matches!(
            dangling.validate(),
            Err(Error::Mapping(MappingError { kind: MappingErrorKind::UnknownMapping, .. }))
        ));

        let wrong_fk = MappingRegistry::new()
            .with(
                mapping("user", "users")
                    .fields(["id"])
                    .association("posts", Association::one_to_many("post", "id", "owner_id")),
            )
            .with(mapping("post", "posts").fields(["id", "author_id"]));
        assert!(matches!(
            wrong_fk.validate(),
            Err(Error::Mapping(MappingError { kind: MappingErrorKind::Invalid, .. }))
        ));
    }

    #[test]
    fn unknown_lookups() {
        let registry = MappingRegistry::new().with(mapping("user", "users"));
        assert!(registry.get("ghost").is_err());
        let user = registry.get("user").unwrap();
        assert!(user.get_association("friends").is_err());
        assert!(user.subset_fn("active").is_err());
    }
}
