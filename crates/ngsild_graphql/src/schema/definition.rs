//! Type definitions and the classification of their properties.
//!
//! A definition is a JSON schema document with a `$id` and a `properties`
//! map. Each property is either a plain value (scalar or list), a
//! relationship to another type, or something without a GraphQL mapping.

use serde_json::{Map, Value};

/// Annotation naming the target type of a relationship.
pub const REF_TYPE: &str = "x-ref-type";

/// Annotation naming the parent type(s) of a definition.
pub const EXTENDS: &str = "x-extends";

/// The identifier without path and extension: `.../types/Room.json` → `Room`.
pub fn short_id(id: &str) -> &str {
    let name = match id.rfind('/') {
        Some(slash) if slash + 1 < id.len() => &id[slash + 1..],
        _ => id,
    };
    match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}

/// The identifier without extension: `.../types/Room.json` → `.../types/Room`.
///
/// Only a dot inside the last path segment starts an extension.
pub fn full_id(id: &str) -> &str {
    let segment_start = id.rfind('/').map_or(0, |slash| slash + 1);
    match id[segment_start..].rfind('.') {
        Some(dot) if dot > 0 => &id[..segment_start + dot],
        _ => id,
    }
}

/// One input definition with its derived identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefinition {
    pub short_id: String,
    pub full_id: String,
    pub properties: Map<String, Value>,
}

/// Why a document could not become a [`TypeDefinition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingId,
    MissingProperties,
}

impl TypeDefinition {
    pub fn from_json(document: &Value) -> std::result::Result<Self, Rejection> {
        let id = document
            .get("$id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or(Rejection::MissingId)?;
        let properties = document
            .get("properties")
            .and_then(Value::as_object)
            .ok_or(Rejection::MissingProperties)?;
        Ok(Self {
            short_id: short_id(id).to_string(),
            full_id: full_id(id).to_string(),
            properties: properties.clone(),
        })
    }
}

/// GraphQL scalar a property maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    String,
    Int,
    Float,
    Boolean,
}

impl ScalarKind {
    pub fn graphql_name(self) -> &'static str {
        match self {
            ScalarKind::String => "String",
            ScalarKind::Int => "Int",
            ScalarKind::Float => "Float",
            ScalarKind::Boolean => "Boolean",
        }
    }
}

/// A non-relationship value: a scalar or a (possibly nested) list of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueShape {
    Scalar(ScalarKind),
    List(Box<ValueShape>),
}

/// How a property is exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyShape {
    Value(ValueShape),
    /// A reference to (an array of) entities; `target` is the raw annotation.
    Relationship { target: Option<String>, many: bool },
    Unsupported,
}

/// `anyOf`/`oneOf` alternatives of a schema without `type`.
fn alternatives(schema: &Value) -> Option<&Vec<Value>> {
    if schema.get("type").is_some() {
        return None;
    }
    schema
        .get("anyOf")
        .or_else(|| schema.get("oneOf"))
        .and_then(Value::as_array)
}

fn type_name(schema: &Value) -> Option<String> {
    schema.get("type").and_then(Value::as_str).map(str::to_ascii_lowercase)
}

/// `true` for the schema of a single reference.
fn is_reference(schema: &Value) -> bool {
    if schema.get(REF_TYPE).and_then(Value::as_str).is_some() {
        return true;
    }
    let declared = schema.get("type").and_then(Value::as_str);
    if declared.is_none() {
        return false;
    }
    schema.get("@type").and_then(Value::as_str) == Some("@id")
        || declared == Some("@id")
        || (declared == Some("string")
            && schema.get("format").and_then(Value::as_str) == Some("uri"))
}

/// The reference schema of a single relationship, looking into alternatives.
fn reference_schema(schema: &Value) -> Option<&Value> {
    if is_reference(schema) {
        return Some(schema);
    }
    alternatives(schema)?.iter().find(|alt| is_reference(alt))
}

fn ref_type(schema: &Value, reference: &Value) -> Option<String> {
    reference
        .get(REF_TYPE)
        .or_else(|| schema.get(REF_TYPE))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Classify the property `name` with schema `schema`.
///
/// Properties named `id` or `type`, or starting with `@`, are never
/// relationships.
pub fn classify(name: &str, schema: &Value) -> PropertyShape {
    let reserved = name == "id" || name == "type" || name.starts_with('@');
    if !reserved {
        if let Some(reference) = reference_schema(schema) {
            return PropertyShape::Relationship {
                target: ref_type(schema, reference),
                many: false,
            };
        }
        if type_name(schema).as_deref() == Some("array") {
            if let Some(items) = schema.get("items") {
                if let Some(reference) = reference_schema(items) {
                    return PropertyShape::Relationship {
                        target: ref_type(items, reference),
                        many: true,
                    };
                }
            }
        }
    }
    value_shape(schema).map_or(PropertyShape::Unsupported, PropertyShape::Value)
}

/// The GraphQL value shape of a schema, if it has one.
pub fn value_shape(schema: &Value) -> Option<ValueShape> {
    let schema = match alternatives(schema) {
        Some(alts) => alts
            .iter()
            .find(|alt| type_name(alt).as_deref() == Some("string"))
            .or_else(|| alts.first())?,
        None => schema,
    };
    let shape = match type_name(schema)?.as_str() {
        "int" | "integer" => ValueShape::Scalar(ScalarKind::Int),
        "float" | "number" | "double" => ValueShape::Scalar(ScalarKind::Float),
        "boolean" | "bool" => ValueShape::Scalar(ScalarKind::Boolean),
        "string" => ValueShape::Scalar(ScalarKind::String),
        "array" => ValueShape::List(Box::new(value_shape(schema.get("items")?)?)),
        _ => return None,
    };
    Some(shape)
}

/// Field description: `description`, else `Enum [a, b]` for enumerations.
pub fn description(schema: &Value) -> Option<String> {
    if let Some(text) = schema.get("description").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let values = schema.get("enum")?.as_array()?;
    let listed: Vec<String> = values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    Some(format!("Enum [{}]", listed.join(", ")))
}

/// The parents declared through `x-extends` (string or list).
pub fn extends(document: &Value) -> Vec<String> {
    match document.get(EXTENDS) {
        Some(Value::String(parent)) => vec![parent.clone()],
        Some(Value::Array(parents)) => parents
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
