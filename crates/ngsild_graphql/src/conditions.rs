//! Filter conditions and their evaluation against entities.
//!
//! A filter argument such as
//!
//! ```graphql
//! rooms(filter: { name: { startsWith: "K" }, partOf: { height: { gt: 10 } } })
//! ```
//!
//! is parsed once into a [`FilterCondition`]. Each attribute maps to either a
//! [`LeafCondition`] (operator/operand pairs) or a nested [`FilterCondition`]
//! that applies to a nested object value or, for relationships, to the
//! dereferenced target entity.
//!
//! [`FilterCondition::parse`] classifies by shape: a condition object is a
//! leaf iff at least one of its direct values is not an object, so an
//! object-valued operand next to a scalar one cannot be expressed.
//! [`FilterCondition::parse_typed`] uses the declared filter types instead;
//! there a relationship's condition is always nested and its `exists` flag
//! applies to the dereferenced target.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};

use crate::entity::{attribute, Entity};
use crate::error::{Error, Result};
use crate::resolution::{RequestContext, Resolution};

/// A set of per-attribute conditions, all of which must hold.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterCondition {
    entries: Vec<(String, Condition)>,
    /// For nested conditions: whether the object or target must exist.
    exists: Option<bool>,
}

/// The declared filter types, as far as parsing needs them.
pub trait FilterTypes {
    /// The nested filter type of `field` within filter type `filter`, if
    /// `field` is a relationship with a generated filter.
    fn nested_filter(&self, filter: &str, field: &str) -> Option<&str>;
}

/// The condition attached to one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Operator/operand pairs compared against the attribute value.
    Leaf(LeafCondition),
    /// Conditions on a nested object or a relationship target.
    Nested(FilterCondition),
}

/// Operator/operand pairs, all of which must hold.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LeafCondition {
    comparisons: Vec<Comparison>,
}

/// A single filter operator with its operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Exists(bool),
    Eq(Value),
    Gt(Value),
    Geq(Value),
    Lt(Value),
    Leq(Value),
    In(Vec<Value>),
    StartsWith(String),
    EndsWith(String),
    Contains(String),
}

impl FilterCondition {
    /// Parse a filter argument (already converted to JSON).
    pub fn parse(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::from_map(map),
            other => Err(Error::InvalidFilter(format!(
                "expected an object, found {}",
                other
            ))),
        }
    }

    fn from_map(map: &Map<String, Value>) -> Result<Self> {
        let mut entries = Vec::with_capacity(map.len());
        for (key, value) in map {
            if value.is_null() {
                continue;
            }
            let Value::Object(inner) = value else {
                return Err(Error::InvalidFilter(format!(
                    "condition for `{}` must be an object",
                    key
                )));
            };
            entries.push((key.clone(), Condition::from_map(inner)?));
        }
        Ok(Self {
            entries,
            exists: None,
        })
    }

    /// Parse a filter argument of the declared filter type `filter`.
    pub fn parse_typed(value: &Value, types: &dyn FilterTypes, filter: &str) -> Result<Self> {
        match value {
            Value::Object(map) => Self::from_typed_map(map, types, filter, false),
            other => Err(Error::InvalidFilter(format!(
                "expected an object, found {}",
                other
            ))),
        }
    }

    fn from_typed_map(
        map: &Map<String, Value>,
        types: &dyn FilterTypes,
        filter: &str,
        nested: bool,
    ) -> Result<Self> {
        let mut entries = Vec::with_capacity(map.len());
        let mut exists = None;
        for (key, value) in map {
            if value.is_null() {
                continue;
            }
            if nested && key == "exists" {
                exists = Some(value.as_bool().ok_or_else(|| {
                    Error::InvalidFilter("`exists` expects a boolean".into())
                })?);
                continue;
            }
            let Value::Object(inner) = value else {
                return Err(Error::InvalidFilter(format!(
                    "condition for `{}` must be an object",
                    key
                )));
            };
            let condition = match types.nested_filter(filter, key) {
                Some(child) => Condition::Nested(Self::from_typed_map(inner, types, child, true)?),
                None => Condition::Leaf(LeafCondition::from_map(inner)?),
            };
            entries.push((key.clone(), condition));
        }
        Ok(Self { entries, exists })
    }

    /// The attribute conditions in argument order.
    pub fn entries(&self) -> &[(String, Condition)] {
        &self.entries
    }

    /// The `exists` flag of a nested condition.
    pub fn exists(&self) -> Option<bool> {
        self.exists
    }

    /// `true` if nothing is constrained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.exists.is_none()
    }

    /// `true` iff some condition, however deeply nested, needs the attribute
    /// to be present.
    pub fn requires_existence(&self) -> bool {
        self.exists == Some(true) || self.entries.iter().any(|(_, c)| c.requires_existence())
    }
}

impl Condition {
    fn from_map(map: &Map<String, Value>) -> Result<Self> {
        let is_leaf = map
            .values()
            .any(|v| !v.is_null() && !v.is_object());
        if is_leaf {
            LeafCondition::from_map(map).map(Condition::Leaf)
        } else {
            FilterCondition::from_map(map).map(Condition::Nested)
        }
    }

    /// See [`FilterCondition::requires_existence`].
    pub fn requires_existence(&self) -> bool {
        match self {
            Condition::Leaf(leaf) => leaf
                .comparisons
                .iter()
                .any(|c| !matches!(c, Comparison::Exists(false))),
            Condition::Nested(nested) => nested.requires_existence(),
        }
    }
}

impl LeafCondition {
    fn from_map(map: &Map<String, Value>) -> Result<Self> {
        let comparisons = map
            .iter()
            .filter(|(_, operand)| !operand.is_null())
            .map(|(op, operand)| Comparison::parse(op, operand))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { comparisons })
    }

    /// The comparisons of this leaf.
    pub fn comparisons(&self) -> &[Comparison] {
        &self.comparisons
    }

    /// `true` iff every comparison holds for `value`.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        self.comparisons.iter().all(|c| c.matches(value))
    }
}

impl Comparison {
    fn parse(op: &str, operand: &Value) -> Result<Self> {
        let string_operand = || {
            operand
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidFilter(format!("`{}` expects a string", op)))
        };
        Ok(match op {
            "exists" => Comparison::Exists(
                operand
                    .as_bool()
                    .ok_or_else(|| Error::InvalidFilter("`exists` expects a boolean".into()))?,
            ),
            "eq" => Comparison::Eq(operand.clone()),
            "gt" => Comparison::Gt(operand.clone()),
            "geq" => Comparison::Geq(operand.clone()),
            "lt" => Comparison::Lt(operand.clone()),
            "leq" => Comparison::Leq(operand.clone()),
            "in" => match operand {
                Value::Array(items) => Comparison::In(items.clone()),
                _ => return Err(Error::InvalidFilter("`in` expects a list".into())),
            },
            "startsWith" => Comparison::StartsWith(string_operand()?),
            "endsWith" => Comparison::EndsWith(string_operand()?),
            "contains" => Comparison::Contains(string_operand()?),
            other => {
                return Err(Error::InvalidFilter(format!(
                    "unexpected filter condition {}: {}",
                    other, operand
                )))
            }
        })
    }

    /// Evaluate against an unwrapped attribute value (`None` = absent).
    pub fn matches(&self, value: Option<&Value>) -> bool {
        use std::cmp::Ordering;

        let Some(value) = value else {
            return matches!(self, Comparison::Exists(false));
        };
        match self {
            Comparison::Exists(expected) => *expected,
            Comparison::Eq(operand) => values_equal(value, operand),
            Comparison::Gt(operand) => compare(value, operand) == Some(Ordering::Greater),
            Comparison::Geq(operand) => matches!(
                compare(value, operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Comparison::Lt(operand) => compare(value, operand) == Some(Ordering::Less),
            Comparison::Leq(operand) => matches!(
                compare(value, operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Comparison::In(candidates) => candidates.iter().any(|c| values_equal(value, c)),
            Comparison::StartsWith(s) => value.as_str().is_some_and(|v| v.starts_with(s.as_str())),
            Comparison::EndsWith(s) => value.as_str().is_some_and(|v| v.ends_with(s.as_str())),
            Comparison::Contains(s) => value.as_str().is_some_and(|v| v.contains(s.as_str())),
        }
    }
}

/// Strict equality, except that `1` and `1.0` compare equal.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering between two numbers or two strings; anything else is unordered.
fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Keep the entities that satisfy every condition of `filter`.
pub async fn filter_entities(
    entities: Vec<Arc<Entity>>,
    filter: Option<&FilterCondition>,
    ctx: &RequestContext,
    resolution: &dyn Resolution,
) -> Result<Vec<Arc<Entity>>> {
    let Some(filter) = filter.filter(|f| !f.is_empty()) else {
        return Ok(entities);
    };
    let mut accepted = Vec::with_capacity(entities.len());
    for entity in entities {
        if accept_all(&entity, filter, ctx, resolution).await? {
            accepted.push(entity);
        }
    }
    Ok(accepted)
}

/// `true` iff every attribute condition of `filter` holds for `object`.
pub fn accept_all<'a>(
    object: &'a Map<String, Value>,
    filter: &'a FilterCondition,
    ctx: &'a RequestContext,
    resolution: &'a dyn Resolution,
) -> BoxFuture<'a, Result<bool>> {
    async move {
        for (key, condition) in filter.entries() {
            if !accept(object, key, condition, ctx, resolution).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
    .boxed()
}

/// Evaluate one attribute condition against `object`.
///
/// Nested conditions recurse into object values directly. On any other value
/// the attribute is treated as a reference and the target is fetched through
/// `resolution`; a missing target satisfies the condition only if nothing in
/// it requires existence.
pub fn accept<'a>(
    object: &'a Map<String, Value>,
    key: &'a str,
    condition: &'a Condition,
    ctx: &'a RequestContext,
    resolution: &'a dyn Resolution,
) -> BoxFuture<'a, Result<bool>> {
    async move {
        let attr = attribute(object, key);
        let nested = match condition {
            Condition::Leaf(leaf) => return Ok(leaf.matches(attr.value())),
            Condition::Nested(nested) => nested,
        };

        if let (Some(Value::Object(inner)), None) = (attr.value(), attr.reference()) {
            if nested.exists() == Some(false) {
                return Ok(false);
            }
            return accept_all(inner, nested, ctx, resolution).await;
        }

        let target = match attr.reference() {
            Some(target_id) => match resolution.find_one(ctx, None, Some(target_id)).await {
                Ok(found) => found,
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            },
            None => None,
        };
        match target {
            Some(_) if nested.exists() == Some(false) => Ok(false),
            Some(target) => accept_all(&target, nested, ctx, resolution).await,
            None => Ok(!nested.requires_existence()),
        }
    }
    .boxed()
}
