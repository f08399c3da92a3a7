//! Filter input types generated per output type.
//!
//! Scalars map to fixed operator sets. Single relationships recurse into the
//! target type's filter while the nesting depth is below the maximum; past
//! it, and for lists, they only support `exists`. Every nested filter below
//! the top level also carries `exists`.

use std::collections::HashMap;

use async_graphql::dynamic::{InputObject, InputValue, TypeRef};
use indexmap::IndexMap;

use super::definition::{ScalarKind, ValueShape};
use super::registry::{FieldKind, TypeDescriptor, TypeRegistry};
use crate::conditions::FilterTypes;

pub const STRING_FILTER: &str = "_StringInputFilter";
pub const INT_FILTER: &str = "_IntInputFilter";
pub const FLOAT_FILTER: &str = "_FloatInputFilter";
pub const BOOLEAN_FILTER: &str = "_BooleanInputFilter";
/// Existence-only filter for lists and relationships past the nesting limit.
pub const OBJECT_FILTER: &str = "_ObjectInputFilter";

const EXISTS: &str = "exists";

/// The filter input type for a scalar kind.
pub fn scalar_filter_name(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::String => STRING_FILTER,
        ScalarKind::Int => INT_FILTER,
        ScalarKind::Float => FLOAT_FILTER,
        ScalarKind::Boolean => BOOLEAN_FILTER,
    }
}

/// The operators supported for a scalar kind.
pub fn operators(kind: ScalarKind) -> &'static [&'static str] {
    match kind {
        ScalarKind::String => &[
            "exists", "eq", "in", "startsWith", "endsWith", "contains", "geq", "gt", "leq", "lt",
        ],
        ScalarKind::Int | ScalarKind::Float => &["exists", "eq", "in", "geq", "gt", "leq", "lt"],
        ScalarKind::Boolean => &["exists", "eq"],
    }
}

fn scalar_filter(kind: ScalarKind) -> InputObject {
    let scalar = kind.graphql_name();
    operators(kind)
        .iter()
        .fold(InputObject::new(scalar_filter_name(kind)), |object, &op| {
            let ty = match op {
                EXISTS => TypeRef::named(TypeRef::BOOLEAN),
                "in" => TypeRef::named_list(scalar),
                _ => TypeRef::named(scalar),
            };
            object.field(InputValue::new(op, ty))
        })
}

/// The fixed scalar filters plus the existence-only filter.
pub fn builtin_filters() -> Vec<InputObject> {
    let mut filters: Vec<InputObject> = [
        ScalarKind::String,
        ScalarKind::Int,
        ScalarKind::Float,
        ScalarKind::Boolean,
    ]
    .into_iter()
    .map(scalar_filter)
    .collect();
    filters.push(
        InputObject::new(OBJECT_FILTER)
            .field(InputValue::new(EXISTS, TypeRef::named(TypeRef::BOOLEAN))),
    );
    filters
}

/// The input type of one filter field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterInput {
    /// One of the fixed scalar or existence-only filters.
    Builtin(&'static str),
    /// A generated filter of another type.
    Nested(String),
    /// The plain `exists: Boolean` flag of nested filters.
    Exists,
}

/// A generated object filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterShape {
    pub name: String,
    pub fields: Vec<(String, FilterInput)>,
}

impl FilterShape {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_input_object(&self) -> InputObject {
        self.fields
            .iter()
            .fold(InputObject::new(&self.name), |object, (field, input)| {
                let ty = match input {
                    FilterInput::Builtin(name) => TypeRef::named(*name),
                    FilterInput::Nested(name) => TypeRef::named(name.clone()),
                    FilterInput::Exists => TypeRef::named(TypeRef::BOOLEAN),
                };
                object.field(InputValue::new(field.clone(), ty))
            })
    }
}

/// filter name → field → nested filter name.
#[derive(Debug, Clone, Default)]
pub struct FilterCatalog {
    nested: HashMap<String, HashMap<String, String>>,
}

impl FilterTypes for FilterCatalog {
    fn nested_filter(&self, filter: &str, field: &str) -> Option<&str> {
        self.nested.get(filter)?.get(field).map(String::as_str)
    }
}

/// The generated filter name of `type_name` at `depth`.
pub fn filter_name(type_name: &str, depth: usize) -> String {
    if depth == 0 {
        format!("_{}Filter", type_name)
    } else {
        format!("_{}Filter_{}", type_name, depth)
    }
}

/// Generates object filters, memoized by name.
#[derive(Debug)]
pub struct FilterFactory<'r> {
    registry: &'r TypeRegistry,
    max_depth: usize,
    shapes: IndexMap<String, FilterShape>,
}

impl<'r> FilterFactory<'r> {
    pub fn new(registry: &'r TypeRegistry, max_depth: usize) -> Self {
        Self {
            registry,
            max_depth,
            shapes: IndexMap::new(),
        }
    }

    /// The top-level filter of `descriptor`; `None` if nothing is filterable.
    pub fn filter_for(&mut self, descriptor: &TypeDescriptor) -> Option<String> {
        let name = self.shape(descriptor, 0);
        self.shapes
            .get(&name)
            .filter(|shape| !shape.is_empty())
            .map(|shape| shape.name.clone())
    }

    fn shape(&mut self, descriptor: &TypeDescriptor, depth: usize) -> String {
        let name = filter_name(&descriptor.short_id, depth);
        if self.shapes.contains_key(&name) {
            return name;
        }
        let registry = self.registry;
        let mut fields = Vec::new();
        for field in registry.fields(descriptor) {
            let input = match &field.kind {
                FieldKind::Context => continue,
                FieldKind::Value(ValueShape::Scalar(kind)) => {
                    FilterInput::Builtin(scalar_filter_name(*kind))
                }
                FieldKind::Value(ValueShape::List(_)) => FilterInput::Builtin(OBJECT_FILTER),
                FieldKind::Relationship {
                    target_full_id,
                    many: false,
                } if depth < self.max_depth => match registry.get(target_full_id) {
                    Some(target) => FilterInput::Nested(self.shape(target, depth + 1)),
                    None => FilterInput::Builtin(OBJECT_FILTER),
                },
                FieldKind::Relationship { .. } | FieldKind::Reverse { .. } => {
                    FilterInput::Builtin(OBJECT_FILTER)
                }
            };
            fields.push((field.name.clone(), input));
        }
        if depth > 0 && !fields.iter().any(|(f, _)| f == EXISTS) {
            fields.push((EXISTS.to_string(), FilterInput::Exists));
        }
        self.shapes.insert(
            name.clone(),
            FilterShape {
                name: name.clone(),
                fields,
            },
        );
        name
    }

    /// All generated shapes, including nested ones.
    pub fn shapes(&self) -> impl Iterator<Item = &FilterShape> {
        self.shapes.values()
    }

    /// Which filter fields are nested filters, for typed argument parsing.
    pub fn catalog(&self) -> FilterCatalog {
        let nested = self
            .shapes
            .values()
            .map(|shape| {
                let fields = shape
                    .fields
                    .iter()
                    .filter_map(|(field, input)| match input {
                        FilterInput::Nested(child) => Some((field.clone(), child.clone())),
                        _ => None,
                    })
                    .collect();
                (shape.name.clone(), fields)
            })
            .collect();
        FilterCatalog { nested }
    }

    /// The non-empty shapes as GraphQL input objects.
    pub fn into_input_objects(self) -> Vec<InputObject> {
        self.shapes
            .values()
            .filter(|shape| !shape.is_empty())
            .map(FilterShape::to_input_object)
            .collect()
    }
}
