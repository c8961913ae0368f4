//! Validated operations.
//!
//! Operations arrive parsed and validated: arguments are already coerced and
//! `@skip`/`@include` are already evaluated into [`Field::included`].

use crate::schema::{Schema, TypeId};
use graft_core::Location;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// The kind of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Mutation => write!(f, "mutation"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

/// A validated operation.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub selection_set: SelectionSet,
    pub fragments: IndexMap<String, FragmentDefinition>,
}

impl Operation {
    /// Creates an anonymous operation with an empty selection set.
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            name: None,
            selection_set: SelectionSet::default(),
            fragments: IndexMap::new(),
        }
    }

    /// Creates a query.
    pub fn query() -> Self {
        Self::new(OperationKind::Query)
    }

    /// Creates a mutation.
    pub fn mutation() -> Self {
        Self::new(OperationKind::Mutation)
    }

    /// Sets the operation name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a root selection.
    pub fn select(mut self, selection: impl Into<Selection>) -> Self {
        self.selection_set.items.push(selection.into());
        self
    }

    /// Adds a named fragment.
    pub fn fragment(mut self, fragment: FragmentDefinition) -> Self {
        self.fragments.insert(fragment.name.clone(), fragment);
        self
    }

    /// Collects the fields of `selection_sets` that apply to `object`,
    /// grouped by response key in document order.
    ///
    /// Fragments whose type condition does not match are skipped, as are
    /// excluded selections and fragment spreads already visited.
    pub fn collect_fields<'a>(
        &'a self,
        schema: &Schema,
        object: TypeId,
        selection_sets: impl IntoIterator<Item = &'a SelectionSet>,
    ) -> IndexMap<&'a str, Vec<&'a Arc<Field>>> {
        let mut fields = IndexMap::new();
        let mut visited = FxHashSet::default();
        for selection_set in selection_sets {
            self.collect_into(schema, object, selection_set, &mut fields, &mut visited);
        }
        fields
    }

    fn collect_into<'a>(
        &'a self,
        schema: &Schema,
        object: TypeId,
        selection_set: &'a SelectionSet,
        fields: &mut IndexMap<&'a str, Vec<&'a Arc<Field>>>,
        visited: &mut FxHashSet<&'a str>,
    ) {
        for selection in &selection_set.items {
            match selection {
                Selection::Field(field) => {
                    if field.included {
                        fields.entry(field.response_key()).or_default().push(field);
                    }
                }
                Selection::InlineFragment(fragment) => {
                    let applies = fragment
                        .type_condition
                        .as_deref()
                        .map_or(true, |condition| schema.type_condition_applies(condition, object));
                    if fragment.included && applies {
                        self.collect_into(schema, object, &fragment.selection_set, fields, visited);
                    }
                }
                Selection::FragmentSpread(spread) => {
                    if !spread.included || !visited.insert(spread.name.as_str()) {
                        continue;
                    }
                    let Some(fragment) = self.fragments.get(&spread.name) else {
                        continue;
                    };
                    if schema.type_condition_applies(&fragment.type_condition, object) {
                        self.collect_into(schema, object, &fragment.selection_set, fields, visited);
                    }
                }
            }
        }
    }
}

/// A named fragment.
#[derive(Debug, Clone)]
pub struct FragmentDefinition {
    pub name: String,
    pub type_condition: String,
    pub selection_set: SelectionSet,
}

impl FragmentDefinition {
    /// Creates a fragment on `type_condition`.
    pub fn new(name: impl Into<String>, type_condition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_condition: type_condition.into(),
            selection_set: SelectionSet::default(),
        }
    }

    /// Adds a selection.
    pub fn select(mut self, selection: impl Into<Selection>) -> Self {
        self.selection_set.items.push(selection.into());
        self
    }
}

/// An ordered list of selections.
#[derive(Debug, Clone, Default)]
pub struct SelectionSet {
    pub items: Vec<Selection>,
}

impl SelectionSet {
    /// Returns true if there are no selections.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A selection.
#[derive(Debug, Clone)]
pub enum Selection {
    Field(Arc<Field>),
    InlineFragment(InlineFragment),
    FragmentSpread(FragmentSpread),
}

impl From<Field> for Selection {
    fn from(field: Field) -> Self {
        Self::Field(Arc::new(field))
    }
}

impl From<InlineFragment> for Selection {
    fn from(fragment: InlineFragment) -> Self {
        Self::InlineFragment(fragment)
    }
}

impl From<FragmentSpread> for Selection {
    fn from(spread: FragmentSpread) -> Self {
        Self::FragmentSpread(spread)
    }
}

/// An inline fragment, with or without a type condition.
#[derive(Debug, Clone)]
pub struct InlineFragment {
    pub type_condition: Option<String>,
    pub selection_set: SelectionSet,
    pub included: bool,
}

impl InlineFragment {
    /// Creates an inline fragment on `type_condition`.
    pub fn on(type_condition: impl Into<String>) -> Self {
        Self {
            type_condition: Some(type_condition.into()),
            selection_set: SelectionSet::default(),
            included: true,
        }
    }

    /// Creates an inline fragment without a type condition.
    pub fn untyped() -> Self {
        Self {
            type_condition: None,
            selection_set: SelectionSet::default(),
            included: true,
        }
    }

    /// Adds a selection.
    pub fn select(mut self, selection: impl Into<Selection>) -> Self {
        self.selection_set.items.push(selection.into());
        self
    }

    /// Sets whether the fragment is included.
    pub fn included(mut self, included: bool) -> Self {
        self.included = included;
        self
    }
}

/// A fragment spread.
#[derive(Debug, Clone)]
pub struct FragmentSpread {
    pub name: String,
    pub included: bool,
}

impl FragmentSpread {
    /// Spreads the named fragment.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            included: true,
        }
    }

    /// Sets whether the spread is included.
    pub fn included(mut self, included: bool) -> Self {
        self.included = included;
        self
    }
}

/// A field selection.
#[derive(Debug, Clone)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    /// Coerced argument values.
    pub arguments: IndexMap<String, Value>,
    pub selection_set: SelectionSet,
    /// False when `@skip`/`@include` excluded the field.
    pub included: bool,
    pub location: Option<Location>,
}

impl Field {
    /// Selects the named field.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            alias: None,
            name: name.into(),
            arguments: IndexMap::new(),
            selection_set: SelectionSet::default(),
            included: true,
            location: None,
        }
    }

    /// The key the field is reported under.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Sets the alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Adds an argument.
    pub fn argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    /// Adds a sub-selection.
    pub fn select(mut self, selection: impl Into<Selection>) -> Self {
        self.selection_set.items.push(selection.into());
        self
    }

    /// Sets whether the field is included.
    pub fn included(mut self, included: bool) -> Self {
        self.included = included;
        self
    }

    /// Sets the source location.
    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}
