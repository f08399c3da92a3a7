//! The registry of compiled output types.
//!
//! All descriptors are registered first; each descriptor's field list is
//! computed on first access by looking other types up by id. Types may
//! therefore reference each other in any order, including cycles.

use std::collections::HashMap;
use std::sync::OnceLock;

use tracing::warn;

use super::definition::{
    classify, description, full_id, PropertyShape, ScalarKind, TypeDefinition, ValueShape,
};
use super::relationships::RelationshipIndex;
use crate::entity::CONTEXT_ATTRIBUTE;
use crate::error::{Error, Result};

/// Name of the field exposing an entity's `@context` list.
pub const CONTEXT_FIELD: &str = "_context";

/// `true` for a valid GraphQL name that is not reserved for introspection.
pub fn is_graphql_name(name: &str) -> bool {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic());
    valid_start && chars.all(|c| c == '_' || c.is_ascii_alphanumeric()) && !name.starts_with("__")
}

/// How a field's value is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// A declared property read from the entity.
    Value(ValueShape),
    /// A declared reference, dereferenced through the resolution engine.
    Relationship { target_full_id: String, many: bool },
    /// Entities of `source_full_id` whose `original_field` points here.
    Reverse {
        source_full_id: String,
        original_field: String,
    },
    /// The entity's `@context` list.
    Context,
}

/// One field of an output type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub description: Option<String>,
    pub kind: FieldKind,
}

impl FieldSpec {
    /// The attribute read from entities for this field.
    pub fn attribute(&self) -> &str {
        match self.kind {
            FieldKind::Context => CONTEXT_ATTRIBUTE,
            _ => &self.name,
        }
    }
}

/// One compiled output type.
#[derive(Debug)]
pub struct TypeDescriptor {
    pub short_id: String,
    pub full_id: String,
    definition: TypeDefinition,
    fields: OnceLock<Vec<FieldSpec>>,
}

/// Arena of [`TypeDescriptor`]s addressed by full or short id.
#[derive(Debug)]
pub struct TypeRegistry {
    types: Vec<TypeDescriptor>,
    by_full_id: HashMap<String, usize>,
    by_short_id: HashMap<String, usize>,
    relationships: RelationshipIndex,
}

impl TypeRegistry {
    /// Register every definition.
    ///
    /// Two definitions with the same full id are a fatal error. Definitions
    /// whose short id is not a GraphQL name, or clashes with an earlier one,
    /// are skipped.
    pub fn build(definitions: Vec<TypeDefinition>, relationships: RelationshipIndex) -> Result<Self> {
        let mut registry = Self {
            types: Vec::with_capacity(definitions.len()),
            by_full_id: HashMap::new(),
            by_short_id: HashMap::new(),
            relationships,
        };
        for definition in definitions {
            if registry.by_full_id.contains_key(&definition.full_id) {
                return Err(Error::Definition(format!(
                    "duplicate type id {}",
                    definition.full_id
                )));
            }
            if !is_graphql_name(&definition.short_id) {
                warn!(id = %definition.full_id, "type name is not a valid GraphQL name, skipped");
                continue;
            }
            if registry.by_short_id.contains_key(&definition.short_id) {
                warn!(id = %definition.full_id, name = %definition.short_id, "type name already taken, skipped");
                continue;
            }
            let index = registry.types.len();
            registry.by_full_id.insert(definition.full_id.clone(), index);
            registry.by_short_id.insert(definition.short_id.clone(), index);
            registry.types.push(TypeDescriptor {
                short_id: definition.short_id.clone(),
                full_id: definition.full_id.clone(),
                definition,
                fields: OnceLock::new(),
            });
        }
        Ok(registry)
    }

    /// Descriptors in registration order.
    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, full_id: &str) -> Option<&TypeDescriptor> {
        self.by_full_id.get(full_id).map(|&i| &self.types[i])
    }

    pub fn get_by_short_id(&self, short_id: &str) -> Option<&TypeDescriptor> {
        self.by_short_id.get(short_id).map(|&i| &self.types[i])
    }

    /// The definitions of all registered types.
    pub fn definitions(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.iter().map(|t| &t.definition)
    }

    /// Look up the type a relationship annotation names: a full id, or a bare
    /// short name.
    pub fn resolve(&self, annotation: &str) -> Option<&TypeDescriptor> {
        if annotation.contains('/') {
            return self.get(full_id(annotation));
        }
        self.get_by_short_id(annotation)
            .or_else(|| self.get(annotation))
    }

    pub fn relationships(&self) -> &RelationshipIndex {
        &self.relationships
    }

    /// The fields of `descriptor`, computed on first access.
    pub fn fields<'a>(&self, descriptor: &'a TypeDescriptor) -> &'a [FieldSpec] {
        descriptor.fields.get_or_init(|| self.compute_fields(descriptor))
    }

    /// Declared properties first, then `_context`, then reverse
    /// relationships. A reverse field never replaces a declared property.
    fn compute_fields(&self, descriptor: &TypeDescriptor) -> Vec<FieldSpec> {
        let mut fields: Vec<FieldSpec> = Vec::new();

        for (name, schema) in &descriptor.definition.properties {
            if name == CONTEXT_FIELD {
                continue;
            }
            if !is_graphql_name(name) {
                warn!(type_id = %descriptor.full_id, field = %name, "not a valid GraphQL field name, skipped");
                continue;
            }
            let kind = match classify(name, schema) {
                PropertyShape::Value(shape) => FieldKind::Value(shape),
                PropertyShape::Relationship { target: None, many } => {
                    let text = ValueShape::Scalar(ScalarKind::String);
                    FieldKind::Value(if many { ValueShape::List(Box::new(text)) } else { text })
                }
                PropertyShape::Relationship {
                    target: Some(annotation),
                    many,
                } => match self.resolve(&annotation) {
                    Some(target) => FieldKind::Relationship {
                        target_full_id: target.full_id.clone(),
                        many,
                    },
                    None => {
                        warn!(type_id = %descriptor.full_id, field = %name, target = %annotation, "reference type not found, skipped");
                        continue;
                    }
                },
                PropertyShape::Unsupported => {
                    warn!(type_id = %descriptor.full_id, field = %name, "no GraphQL type for property, skipped");
                    continue;
                }
            };
            fields.push(FieldSpec {
                name: name.clone(),
                description: description(schema),
                kind,
            });
        }

        fields.push(FieldSpec {
            name: CONTEXT_FIELD.to_string(),
            description: Some("The JSON-LD contexts of the entity".to_string()),
            kind: FieldKind::Context,
        });

        for relationship in self.relationships.inbound(&descriptor.full_id) {
            let name = &relationship.reverse_field_name;
            if fields.iter().any(|f| &f.name == name) {
                warn!(type_id = %descriptor.full_id, field = %name, "reverse relationship collides with a declared field, skipped");
                continue;
            }
            if !is_graphql_name(name) || self.get(&relationship.source_full_id).is_none() {
                warn!(type_id = %descriptor.full_id, field = %name, "reverse relationship cannot be exposed, skipped");
                continue;
            }
            fields.push(FieldSpec {
                name: name.clone(),
                description: Some(format!(
                    "Entities whose {} points to this entity",
                    relationship.original_field_name
                )),
                kind: FieldKind::Reverse {
                    source_full_id: relationship.source_full_id.clone(),
                    original_field: relationship.original_field_name.clone(),
                },
            });
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::hierarchy::TypeHierarchy;
    use serde_json::json;

    fn def(id: &str, properties: serde_json::Value) -> TypeDefinition {
        TypeDefinition::from_json(&json!({ "$id": id, "properties": properties })).unwrap()
    }

    fn registry(defs: Vec<TypeDefinition>) -> TypeRegistry {
        let index = RelationshipIndex::build(&defs, &TypeHierarchy::default(), &Default::default());
        TypeRegistry::build(defs, index).unwrap()
    }

    #[test]
    fn test_graphql_names() {
        assert!(is_graphql_name("Room"));
        assert!(is_graphql_name("_context"));
        assert!(is_graphql_name("floor2"));
        assert!(!is_graphql_name("2floor"));
        assert!(!is_graphql_name("my-type"));
        assert!(!is_graphql_name("__typename"));
        assert!(!is_graphql_name(""));
    }

    #[test]
    fn test_duplicate_full_id_is_fatal() {
        let defs = vec![def("t/Room.json", json!({})), def("t/Room.schema", json!({}))];
        let err = TypeRegistry::build(defs, RelationshipIndex::default()).unwrap_err();
        assert!(matches!(err, Error::Definition(_)));
    }

    #[test]
    fn test_cyclic_references_resolve() {
        let reg = registry(vec![
            def("t/Room", json!({ "partOf": { "x-ref-type": "Building" } })),
            def("t/Building", json!({ "mainRoom": { "x-ref-type": "t/Room" } })),
        ]);
        let room = reg.get("t/Room").unwrap();
        let names: Vec<_> = reg.fields(room).iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["partOf", "_context", "mainRoomReverse"]);
        assert_eq!(
            reg.fields(room)[0].kind,
            FieldKind::Relationship {
                target_full_id: "t/Building".into(),
                many: false
            }
        );
    }

    #[test]
    fn test_field_degradation() {
        let reg = registry(vec![def(
            "t/Room",
            json!({
                "name": { "type": "string" },
                "link": { "type": "string", "format": "uri" },
                "ghost": { "x-ref-type": "Nowhere" },
                "blob": { "type": "object" },
                "bad-name": { "type": "string" },
                "_context": { "type": "string" }
            }),
        )]);
        let room = reg.get_by_short_id("Room").unwrap();
        let fields = reg.fields(room);
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "link", "_context"]);
        assert_eq!(fields[1].kind, FieldKind::Value(ValueShape::Scalar(ScalarKind::String)));
        assert_eq!(fields[2].attribute(), "@context");
    }

    #[test]
    fn test_declared_field_beats_reverse() {
        let reg = registry(vec![
            def("t/Room", json!({ "partOf": { "x-ref-type": "Building" } })),
            def("t/Building", json!({ "partOfReverse": { "type": "string" } })),
        ]);
        let building = reg.get("t/Building").unwrap();
        let fields = reg.fields(building);
        assert_eq!(fields.len(), 2);
        assert!(matches!(fields[0].kind, FieldKind::Value(_)));
    }
}
