//! Entities as returned by the upstream stores.
//!
//! An entity is a JSON object with at least `id` and `type`. Attributes come
//! either in the simplified representation (plain values) or wrapped in
//! NGSI-LD envelopes:
//!
//! ```json
//! { "name": { "type": "Property", "value": "Kitchen" },
//!   "partOf": { "type": "Relationship", "object": "urn:ngsi-ld:Building:1" } }
//! ```
//!
//! Every reader goes through [`attribute`] so both forms behave the same.

use serde_json::{Map, Value};

/// One upstream record.
pub type Entity = Map<String, Value>;

/// JSON-LD bookkeeping attribute carrying the entity's context list.
pub const CONTEXT_ATTRIBUTE: &str = "@context";

/// An attribute value with any envelope removed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attribute<'a> {
    /// The attribute is missing or `null`.
    Absent,
    /// A `{type: "Property", value}` envelope.
    Property(&'a Value),
    /// A `{type: "Relationship", object}` envelope; the value is the target id(s).
    Relationship(&'a Value),
    /// A plain value (simplified representation).
    Plain(&'a Value),
}

impl<'a> Attribute<'a> {
    /// The unwrapped value, if present.
    pub fn value(&self) -> Option<&'a Value> {
        match *self {
            Attribute::Absent => None,
            Attribute::Property(v) | Attribute::Relationship(v) | Attribute::Plain(v) => {
                if v.is_null() {
                    None
                } else {
                    Some(v)
                }
            }
        }
    }

    /// The id a relationship-style value points at.
    ///
    /// Plain strings count as references because the simplified representation
    /// drops the envelope that would mark them.
    pub fn reference(&self) -> Option<&'a str> {
        match *self {
            Attribute::Relationship(v) | Attribute::Plain(v) => v.as_str(),
            Attribute::Property(_) | Attribute::Absent => None,
        }
    }

    /// All referenced ids (single or array relationship).
    pub fn references(&self) -> Vec<&'a str> {
        match *self {
            Attribute::Relationship(v) | Attribute::Plain(v) => match v {
                Value::String(s) => vec![s.as_str()],
                Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            },
            Attribute::Property(_) | Attribute::Absent => Vec::new(),
        }
    }
}

/// Read `key` from a JSON object, unwrapping Property / Relationship envelopes.
pub fn attribute<'a>(object: &'a Map<String, Value>, key: &str) -> Attribute<'a> {
    let Some(raw) = object.get(key) else {
        return Attribute::Absent;
    };
    if raw.is_null() {
        return Attribute::Absent;
    }
    let Some(envelope) = raw.as_object() else {
        return Attribute::Plain(raw);
    };
    match envelope.get("type").and_then(Value::as_str) {
        Some("Property") | Some("GeoProperty") => {
            let value = envelope.get("value").unwrap_or(&Value::Null);
            Attribute::Property(literal(value))
        }
        Some("Relationship") => Attribute::Relationship(envelope.get("object").unwrap_or(&Value::Null)),
        _ => Attribute::Plain(raw),
    }
}

/// Collapse a JSON-LD typed literal `{"@type": .., "@value": x}` to `x`.
fn literal(value: &Value) -> &Value {
    value
        .as_object()
        .and_then(|o| o.get("@value"))
        .unwrap_or(value)
}

/// The entity id, if present.
pub fn entity_id(entity: &Entity) -> Option<&str> {
    entity.get("id").and_then(Value::as_str)
}

/// The `@context` list of an entity.
pub fn contexts(entity: &Entity) -> Vec<String> {
    match entity.get(CONTEXT_ATTRIBUTE) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
