//! Query descriptions handed to the storage collaborator.
//!
//! A [`Dataset`] names a namespace and narrows it with equality or set
//! membership criteria, an ordering, an optional projection and an optional
//! limit. It carries no SQL; adapters translate it however they like.

use crate::value::{Attributes, Value};

/// Sort direction for an ordering term.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One filtering criterion.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    /// `field = value`
    Eq(String, Value),
    /// `field IN (values)`
    In(String, Vec<Value>),
}

impl Criterion {
    /// The field this criterion constrains.
    pub fn field(&self) -> &str {
        match self {
            Criterion::Eq(field, _) | Criterion::In(field, _) => field,
        }
    }

    /// Evaluate the criterion against an in-memory row.
    ///
    /// A missing field never matches, and NULL never equals anything.
    pub fn matches(&self, row: &Attributes) -> bool {
        let Some(actual) = row.get(self.field()) else {
            return false;
        };
        if actual.is_null() {
            return false;
        }
        match self {
            Criterion::Eq(_, expected) => actual == expected,
            Criterion::In(_, set) => set.contains(actual),
        }
    }
}

/// An ordering term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// An immutable query description over one namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    namespace: String,
    criteria: Vec<Criterion>,
    order: Vec<OrderBy>,
    columns: Option<Vec<String>>,
    limit: Option<usize>,
}

impl Dataset {
    /// All rows of `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            criteria: Vec::new(),
            order: Vec::new(),
            columns: None,
            limit: None,
        }
    }

    /// Add an equality criterion.
    #[must_use]
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.criteria.push(Criterion::Eq(field.into(), value.into()));
        self
    }

    /// Add a set-membership criterion.
    #[must_use]
    pub fn where_in<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.criteria.push(Criterion::In(
            field.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Add a prebuilt criterion.
    #[must_use]
    pub fn filter(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// Append an ordering term.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Restrict the returned columns.
    #[must_use]
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Return at most `limit` rows.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn order(&self) -> &[OrderBy] {
        &self.order
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    pub fn row_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Does any `In` criterion have an empty set? Such a dataset is
    /// statically empty and need not be sent to the store.
    pub fn is_statically_empty(&self) -> bool {
        self.criteria
            .iter()
            .any(|c| matches!(c, Criterion::In(_, set) if set.is_empty()))
    }

    /// Evaluate every criterion against an in-memory row.
    pub fn matches(&self, row: &Attributes) -> bool {
        self.criteria.iter().all(|c| c.matches(row))
    }
}
