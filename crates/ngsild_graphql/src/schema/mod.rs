//! Schema compilation: type definitions in, an executable GraphQL schema out.
//!
//! ```text
//! documents ─► TypeDefinition ─► RelationshipIndex ─► TypeRegistry
//!                                                         │
//!                                   FilterFactory ◄───────┤
//!                                         │               ▼
//!                                         └────► Query { Room, Rooms, .. }
//! ```
//!
//! Every type gets a singular accessor named after its short id and a plural
//! accessor with `limit`, `offset` and `filter` arguments. Resolvers delegate
//! to the [`Resolution`] backend chosen at startup.

pub mod definition;
pub mod fields;
pub mod filters;
pub mod hierarchy;
pub mod registry;
pub mod relationships;

pub use definition::{short_id, full_id, TypeDefinition};
pub use filters::{FilterCatalog, FilterFactory};
pub use hierarchy::TypeHierarchy;
pub use registry::{TypeDescriptor, TypeRegistry};
pub use relationships::{Relationship, RelationshipIndex, RelationshipOptions};

use std::collections::HashSet;
use std::sync::Arc;

use async_graphql::dynamic::{Field, FieldFuture, FieldValue, InputValue, Object, Schema, TypeRef};
use async_graphql::Value as GqlValue;
use serde_json::Value;
use tracing::{debug, info, warn};

use self::definition::Rejection;
use self::fields::{entity_list, int_arg, output_object, pagination_arg, request_context, settle};
use crate::conditions::FilterCondition;
use crate::error::{Error, Result};
use crate::resolution::{FindOptions, Resolution};

/// Name of the root query type.
pub const QUERY_TYPE: &str = "Query";

/// Default maximum depth of nested object filters.
pub const DEFAULT_FILTER_NESTING_LEVEL: usize = 2;

/// Compiler inputs beyond the definitions themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaOptions {
    pub filter_nesting_level: usize,
    pub reverse_relationships: bool,
    pub relationships: RelationshipOptions,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            filter_nesting_level: DEFAULT_FILTER_NESTING_LEVEL,
            reverse_relationships: true,
            relationships: RelationshipOptions::default(),
        }
    }
}

/// The plural accessor name: `Room` → `Rooms`, `Category` → `Categories`.
pub fn pluralize(word: &str) -> String {
    match word.strip_suffix('y') {
        Some(stem) => format!("{}ies", stem),
        None if word.is_empty() => String::new(),
        None => format!("{}s", word),
    }
}

/// The result of a successful compilation.
pub struct CompiledSchema {
    pub schema: Schema,
    /// Short ids of the compiled output types, in registration order.
    pub base_types: Vec<String>,
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("base_types", &self.base_types)
            .finish_non_exhaustive()
    }
}

/// Builds the GraphQL schema from type definition documents.
#[derive(Debug, Clone, Default)]
pub struct SchemaCompiler {
    options: SchemaOptions,
}

impl SchemaCompiler {
    pub fn new(options: SchemaOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SchemaOptions {
        &self.options
    }

    /// Parse the documents that can become type definitions; the rest are
    /// skipped with a warning.
    pub fn definitions(documents: &[Value]) -> Vec<TypeDefinition> {
        documents
            .iter()
            .filter_map(|document| match TypeDefinition::from_json(document) {
                Ok(definition) => Some(definition),
                Err(Rejection::MissingId) => {
                    warn!("type definition without $id, skipped");
                    None
                }
                Err(Rejection::MissingProperties) => {
                    let id = document.get("$id").and_then(Value::as_str).unwrap_or_default();
                    warn!(id, "type definition without properties, skipped");
                    None
                }
            })
            .collect()
    }

    /// Register all types, then derive their fields, filters and accessors.
    pub fn registry(&self, documents: &[Value], hierarchy: &TypeHierarchy) -> Result<TypeRegistry> {
        let definitions = Self::definitions(documents);
        let index = if self.options.reverse_relationships {
            RelationshipIndex::build(&definitions, hierarchy, &self.options.relationships)
        } else {
            RelationshipIndex::default()
        };
        debug!(reverse = index.len(), "relationship index built");
        TypeRegistry::build(definitions, index)
    }

    /// Compile `documents` into an executable schema resolved by `resolution`.
    pub fn compile(
        &self,
        documents: &[Value],
        hierarchy: &TypeHierarchy,
        resolution: Arc<dyn Resolution>,
    ) -> Result<CompiledSchema> {
        let registry = self.registry(documents, hierarchy)?;
        if registry.is_empty() {
            return Err(Error::Schema("no type definitions to compile".into()));
        }

        let mut factory = FilterFactory::new(&registry, self.options.filter_nesting_level);
        let mut query = Object::new(QUERY_TYPE);
        let mut taken: HashSet<String> = HashSet::new();
        let mut objects = Vec::with_capacity(registry.len());
        let mut filter_names = Vec::with_capacity(registry.len());

        for descriptor in registry.types() {
            objects.push(output_object(&registry, descriptor, &resolution));
            filter_names.push(factory.filter_for(descriptor));
        }
        let catalog = Arc::new(factory.catalog());

        for (descriptor, filter) in registry.types().zip(filter_names) {
            let plural = pluralize(&descriptor.short_id);
            for name in [&descriptor.short_id, &plural] {
                if !taken.insert(name.clone()) {
                    return Err(Error::Schema(format!("query field {} defined twice", name)));
                }
            }
            query = query
                .field(single_accessor(descriptor, &resolution))
                .field(plural_accessor(descriptor, plural, filter, &catalog, &resolution));
        }

        let base_types: Vec<String> = registry.types().map(|t| t.short_id.clone()).collect();
        let mut builder = Schema::build(QUERY_TYPE, None, None).register(query);
        for object in objects {
            builder = builder.register(object);
        }
        for input in filters::builtin_filters() {
            builder = builder.register(input);
        }
        for input in factory.into_input_objects() {
            builder = builder.register(input);
        }
        let schema = builder
            .finish()
            .map_err(|e| Error::Schema(e.to_string()))?;
        info!(types = base_types.len(), "GraphQL schema compiled");
        Ok(CompiledSchema { schema, base_types })
    }
}

fn single_accessor(descriptor: &TypeDescriptor, resolution: &Arc<dyn Resolution>) -> Field {
    let type_id = descriptor.full_id.clone();
    let resolution = Arc::clone(resolution);
    Field::new(
        descriptor.short_id.clone(),
        TypeRef::named(descriptor.short_id.clone()),
        move |ctx| {
            let type_id = type_id.clone();
            let resolution = Arc::clone(&resolution);
            FieldFuture::new(async move {
                let rc = request_context(&ctx)?;
                let id = match ctx.args.as_index_map().get("id") {
                    Some(GqlValue::String(id)) => Some(id.as_str()),
                    _ => None,
                };
                let found = resolution.find_one(rc, Some(&type_id), id).await;
                Ok(settle(found, false)?.flatten().map(FieldValue::owned_any))
            })
        },
    )
    .argument(InputValue::new("id", TypeRef::named(TypeRef::STRING)).description("The entity id"))
}

fn plural_accessor(
    descriptor: &TypeDescriptor,
    name: String,
    filter: Option<String>,
    catalog: &Arc<FilterCatalog>,
    resolution: &Arc<dyn Resolution>,
) -> Field {
    let type_id = descriptor.full_id.clone();
    let resolution = Arc::clone(resolution);
    let catalog = Arc::clone(catalog);
    let filter_type = filter.clone();
    let field = Field::new(
        name,
        TypeRef::named_list(descriptor.short_id.clone()),
        move |ctx| {
            let type_id = type_id.clone();
            let resolution = Arc::clone(&resolution);
            let catalog = Arc::clone(&catalog);
            let filter_type = filter_type.clone();
            FieldFuture::new(async move {
                let rc = request_context(&ctx)?;
                let filter = match (ctx.args.as_index_map().get("filter"), &filter_type) {
                    (Some(value), Some(filter_type)) if *value != GqlValue::Null => {
                        let json = value.clone().into_json()?;
                        Some(
                            FilterCondition::parse_typed(&json, catalog.as_ref(), filter_type)
                                .map_err(Error::into_graphql)?,
                        )
                    }
                    _ => None,
                };
                let options = FindOptions {
                    limit: int_arg(&ctx, "limit")?,
                    offset: int_arg(&ctx, "offset")?,
                    filter,
                };
                let found = resolution.find(rc, &type_id, &options).await;
                Ok(settle(found, false)?.map(entity_list))
            })
        },
    )
    .argument(pagination_arg("limit", "The maximum number of entities to return"))
    .argument(pagination_arg("offset", "The number of entities to skip"));
    match filter {
        Some(filter) => field.argument(
            InputValue::new("filter", TypeRef::named(filter))
                .description("Filter based on attribute values"),
        ),
        None => field,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::resolution::RequestContext;
    use async_trait::async_trait;
    use serde_json::json;

    struct Nothing;

    #[async_trait]
    impl Resolution for Nothing {
        fn name(&self) -> &'static str {
            "nothing"
        }

        async fn find_one(
            &self,
            _ctx: &RequestContext,
            _type_id: Option<&str>,
            entity_id: Option<&str>,
        ) -> Result<Option<Arc<Entity>>> {
            Err(Error::NotFound(entity_id.unwrap_or_default().to_string()))
        }

        async fn find(
            &self,
            _ctx: &RequestContext,
            _type_id: &str,
            _options: &FindOptions,
        ) -> Result<Vec<Arc<Entity>>> {
            Ok(Vec::new())
        }
    }

    fn documents() -> Vec<Value> {
        vec![
            json!({
                "$id": "https://example.org/types/Room.json",
                "properties": {
                    "name": { "type": "string", "description": "Room name" },
                    "partOf": { "type": "string", "x-ref-type": "Building" }
                }
            }),
            json!({
                "$id": "https://example.org/types/Building.json",
                "properties": { "height": { "type": "number" } }
            }),
            json!({ "properties": { "orphan": { "type": "string" } } }),
        ]
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("Room"), "Rooms");
        assert_eq!(pluralize("Category"), "Categories");
        assert_eq!(pluralize(""), "");
    }

    async fn arguments(schema: &Schema, type_name: &str, field: &str) -> Vec<String> {
        let query = format!(
            "{{ __type(name: \"{}\") {{ fields {{ name args {{ name }} }} }} }}",
            type_name
        );
        let data = schema.execute(query.as_str()).await.data.into_json().unwrap();
        data["__type"]["fields"]
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["name"] == field)
            .map(|f| {
                f["args"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|a| a["name"].as_str().unwrap().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_compiled_surface() {
        let compiled = SchemaCompiler::default()
            .compile(&documents(), &TypeHierarchy::default(), Arc::new(Nothing))
            .unwrap();
        assert_eq!(compiled.base_types, vec!["Room", "Building"]);

        let schema = &compiled.schema;
        assert_eq!(arguments(schema, "Query", "Rooms").await, vec!["limit", "offset", "filter"]);
        assert_eq!(arguments(schema, "Query", "Building").await, vec!["id"]);
        assert_eq!(arguments(schema, "Building", "partOfReverse").await, vec!["limit", "offset"]);

        let sdl = schema.sdl();
        assert!(sdl.contains("input _RoomFilter"));
        assert!(sdl.contains("input _BuildingFilter_1"));
        assert!(sdl.contains("input _BooleanInputFilter"));
        assert!(sdl.contains("_context: [String]"));
    }

    #[test]
    fn test_reverse_relationships_disabled() {
        let options = SchemaOptions {
            reverse_relationships: false,
            ..Default::default()
        };
        let compiled = SchemaCompiler::new(options)
            .compile(&documents(), &TypeHierarchy::default(), Arc::new(Nothing))
            .unwrap();
        assert!(!compiled.schema.sdl().contains("partOfReverse"));
        assert!(compiled.schema.sdl().contains("partOf: Building"));
    }

    #[test]
    fn test_nothing_to_compile() {
        let err = SchemaCompiler::default()
            .compile(&[json!({ "$id": "Room" })], &TypeHierarchy::default(), Arc::new(Nothing))
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn test_accessor_collision() {
        let docs = vec![
            json!({ "$id": "t/Room", "properties": { "a": { "type": "string" } } }),
            json!({ "$id": "t/Rooms", "properties": { "b": { "type": "string" } } }),
        ];
        let err = SchemaCompiler::default()
            .compile(&docs, &TypeHierarchy::default(), Arc::new(Nothing))
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[tokio::test]
    async fn test_dangling_reference_resolves_to_null() {
        struct OneRoom;

        #[async_trait]
        impl Resolution for OneRoom {
            fn name(&self) -> &'static str {
                "one-room"
            }

            async fn find_one(
                &self,
                _ctx: &RequestContext,
                _type_id: Option<&str>,
                entity_id: Option<&str>,
            ) -> Result<Option<Arc<Entity>>> {
                Err(Error::NotFound(entity_id.unwrap_or_default().to_string()))
            }

            async fn find(
                &self,
                _ctx: &RequestContext,
                _type_id: &str,
                _options: &FindOptions,
            ) -> Result<Vec<Arc<Entity>>> {
                let room = json!({ "id": "r1", "type": "Room", "partOf": "b404" });
                let Value::Object(room) = room else { unreachable!() };
                Ok(vec![Arc::new(room)])
            }
        }

        let compiled = SchemaCompiler::default()
            .compile(&documents(), &TypeHierarchy::default(), Arc::new(OneRoom))
            .unwrap();
        let request = async_graphql::Request::new("{ Rooms { name partOf { height } } Room(id: \"x\") { name } }")
            .data(RequestContext::new());
        let response = compiled.schema.execute(request).await;
        assert_eq!(response.errors.len(), 1);
        let data = response.data.into_json().unwrap();
        assert_eq!(data["Rooms"], json!([{ "name": null, "partOf": null }]));
        assert_eq!(data["Room"], Value::Null);
    }
}
