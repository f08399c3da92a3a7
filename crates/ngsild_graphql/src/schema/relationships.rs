//! Reverse relationships: inbound edges exposed on the target type.

use indexmap::IndexMap;
use tracing::{debug, warn};

use super::definition::{classify, full_id, PropertyShape, TypeDefinition};
use super::hierarchy::TypeHierarchy;

/// Which outbound fields get a reverse counterpart, and under what name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipOptions {
    /// If non-empty, only these fields are reversed.
    pub enabled: Vec<String>,
    /// Fields that are never reversed.
    pub disabled: Vec<String>,
    /// `field → reverse field name`; unlisted fields use `<field>Reverse`.
    pub renamed: IndexMap<String, String>,
}

impl RelationshipOptions {
    pub fn allows(&self, field: &str) -> bool {
        !self.disabled.iter().any(|f| f == field)
            && (self.enabled.is_empty() || self.enabled.iter().any(|f| f == field))
    }

    pub fn reverse_name(&self, field: &str) -> String {
        self.renamed
            .get(field)
            .cloned()
            .unwrap_or_else(|| format!("{}Reverse", field))
    }
}

/// A directed edge discovered on a source type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub source_full_id: String,
    pub target_full_id: String,
    pub reverse_field_name: String,
    pub original_field_name: String,
}

/// target full id → reverse field name → relationship.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipIndex {
    by_target: IndexMap<String, IndexMap<String, Relationship>>,
}

/// Resolve a relationship annotation to a full type id. Bare names are looked
/// up among the definitions by short id.
pub fn resolve_target(annotation: &str, definitions: &[TypeDefinition]) -> Option<String> {
    if annotation.contains('/') {
        return Some(full_id(annotation).to_string());
    }
    definitions
        .iter()
        .find(|d| d.short_id == annotation || d.full_id == annotation)
        .map(|d| d.full_id.clone())
}

impl RelationshipIndex {
    /// Scan every definition's relationship fields.
    pub fn build(
        definitions: &[TypeDefinition],
        hierarchy: &TypeHierarchy,
        options: &RelationshipOptions,
    ) -> Self {
        let mut index = Self::default();
        for definition in definitions {
            for (field, schema) in &definition.properties {
                if !options.allows(field) {
                    continue;
                }
                let PropertyShape::Relationship {
                    target: Some(annotation),
                    ..
                } = classify(field, schema)
                else {
                    continue;
                };
                let Some(target) = resolve_target(&annotation, definitions) else {
                    warn!(
                        source = %definition.full_id,
                        field = %field,
                        target = %annotation,
                        "relationship target not found, no reverse field"
                    );
                    continue;
                };
                index.register(
                    Relationship {
                        source_full_id: definition.full_id.clone(),
                        target_full_id: target,
                        reverse_field_name: options.reverse_name(field),
                        original_field_name: field.clone(),
                    },
                    hierarchy,
                );
            }
        }
        index
    }

    /// Add `relationship`. On a name collision the more specific source wins;
    /// between unrelated sources the later one replaces the earlier.
    pub fn register(&mut self, relationship: Relationship, hierarchy: &TypeHierarchy) {
        let fields = self
            .by_target
            .entry(relationship.target_full_id.clone())
            .or_default();
        if let Some(existing) = fields.get(&relationship.reverse_field_name) {
            if hierarchy.is_subtype_of(&existing.source_full_id, &relationship.source_full_id) {
                debug!(
                    field = %relationship.reverse_field_name,
                    kept = %existing.source_full_id,
                    "reverse relationship already registered for a subtype"
                );
                return;
            }
            if !hierarchy.is_subtype_of(&relationship.source_full_id, &existing.source_full_id) {
                warn!(
                    target = %relationship.target_full_id,
                    field = %relationship.reverse_field_name,
                    replaced = %existing.source_full_id,
                    by = %relationship.source_full_id,
                    "conflicting reverse relationships"
                );
            }
        }
        fields.insert(relationship.reverse_field_name.clone(), relationship);
    }

    /// The reverse relationships exposed on `target_full_id`.
    pub fn inbound(&self, target_full_id: &str) -> impl Iterator<Item = &Relationship> {
        self.by_target
            .get(target_full_id)
            .into_iter()
            .flat_map(|fields| fields.values())
    }

    pub fn get(&self, target_full_id: &str, reverse_field_name: &str) -> Option<&Relationship> {
        self.by_target.get(target_full_id)?.get(reverse_field_name)
    }

    /// Total number of registered reverse relationships.
    pub fn len(&self) -> usize {
        self.by_target.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
