//! Output object types and their field resolvers.
//!
//! Parent values are `Arc<Entity>`. Missing relationship targets resolve to
//! `null`, as does every field of a cancelled request.

use std::sync::Arc;

use async_graphql::dynamic::{
    Field, FieldFuture, FieldValue, InputValue, Object, ResolverContext, TypeRef,
};
use async_graphql::Value as GqlValue;
use futures::future::join_all;
use serde_json::Value;

use super::definition::ValueShape;
use super::registry::{FieldKind, FieldSpec, TypeDescriptor, TypeRegistry};
use crate::entity::{attribute, contexts, entity_id, Entity};
use crate::error::{Error, Result};
use crate::resolution::{FindOptions, RequestContext, Resolution};

/// The entity a field is resolved on.
pub(crate) fn parent<'a>(ctx: &ResolverContext<'a>) -> async_graphql::Result<&'a Arc<Entity>> {
    ctx.parent_value.try_downcast_ref::<Arc<Entity>>()
}

/// The per-request state attached to the GraphQL request.
pub(crate) fn request_context<'a>(ctx: &ResolverContext<'a>) -> async_graphql::Result<&'a RequestContext> {
    ctx.data::<RequestContext>()
}

/// An optional integer argument; explicit `null` counts as absent.
pub(crate) fn int_arg(ctx: &ResolverContext<'_>, name: &str) -> async_graphql::Result<Option<i64>> {
    match ctx.args.as_index_map().get(name) {
        None | Some(GqlValue::Null) => Ok(None),
        Some(GqlValue::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| async_graphql::Error::new(format!("`{}` must be an integer", name))),
        Some(_) => Err(async_graphql::Error::new(format!("`{}` must be an integer", name))),
    }
}

/// Map a resolution outcome to a field result. Cancellation yields `null`;
/// with `missing_is_null`, so does an unknown entity.
pub(crate) fn settle<T>(result: Result<T>, missing_is_null: bool) -> async_graphql::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Error::Cancelled) => Ok(None),
        Err(e) if missing_is_null && e.is_not_found() => Ok(None),
        Err(e) => Err(e.into_graphql()),
    }
}

pub(crate) fn entity_list(entities: Vec<Arc<Entity>>) -> FieldValue<'static> {
    FieldValue::list(entities.into_iter().map(FieldValue::owned_any))
}

fn value_type(shape: &ValueShape) -> TypeRef {
    match shape {
        ValueShape::Scalar(kind) => TypeRef::named(kind.graphql_name()),
        ValueShape::List(inner) => TypeRef::List(Box::new(value_type(inner))),
    }
}

fn plain_value(value: &Value, shape: &ValueShape) -> async_graphql::Result<FieldValue<'static>> {
    match shape {
        ValueShape::Scalar(_) => Ok(FieldValue::value(GqlValue::from_json(value.clone())?)),
        ValueShape::List(inner) => {
            let items = match value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| plain_value(item, inner))
                    .collect::<async_graphql::Result<Vec<_>>>()?,
                single => vec![plain_value(single, inner)?],
            };
            Ok(FieldValue::list(items))
        }
    }
}

fn value_field(spec: &FieldSpec, shape: &ValueShape) -> Field {
    let name = spec.name.clone();
    let shape = shape.clone();
    Field::new(spec.name.clone(), value_type(&shape), move |ctx| {
        let name = name.clone();
        let shape = shape.clone();
        FieldFuture::new(async move {
            let entity = parent(&ctx)?;
            match attribute(entity, &name).value() {
                Some(value) => Ok(Some(plain_value(value, &shape)?)),
                None => Ok(None),
            }
        })
    })
}

fn context_field(spec: &FieldSpec) -> Field {
    Field::new(spec.name.clone(), TypeRef::named_list(TypeRef::STRING), |ctx| {
        FieldFuture::new(async move {
            let entity = parent(&ctx)?;
            let list = contexts(entity);
            if list.is_empty() {
                return Ok(None);
            }
            Ok(Some(FieldValue::list(
                list.into_iter().map(|c| FieldValue::value(GqlValue::String(c))),
            )))
        })
    })
}

fn relationship_field(
    spec: &FieldSpec,
    target: &TypeDescriptor,
    many: bool,
    resolution: &Arc<dyn Resolution>,
) -> Field {
    let ty = if many {
        TypeRef::named_list(target.short_id.clone())
    } else {
        TypeRef::named(target.short_id.clone())
    };
    let name = spec.name.clone();
    let target_id = target.full_id.clone();
    let resolution = Arc::clone(resolution);
    Field::new(spec.name.clone(), ty, move |ctx| {
        let name = name.clone();
        let target_id = target_id.clone();
        let resolution = Arc::clone(&resolution);
        FieldFuture::new(async move {
            let entity = parent(&ctx)?;
            let rc = request_context(&ctx)?;
            let attr = attribute(entity, &name);
            if !many {
                let Some(id) = attr.reference() else {
                    return Ok(None);
                };
                let found = settle(resolution.find_one(rc, Some(&target_id), Some(id)).await, true)?;
                return Ok(found.flatten().map(FieldValue::owned_any));
            }
            if attr.value().is_none() {
                return Ok(None);
            }
            let lookups = attr
                .references()
                .into_iter()
                .map(|id| resolution.find_one(rc, Some(&target_id), Some(id)));
            let mut items = Vec::new();
            for result in join_all(lookups).await {
                match result {
                    Ok(Some(found)) => items.push(FieldValue::owned_any(found)),
                    Ok(None) => items.push(FieldValue::NULL),
                    Err(e) if e.is_not_found() => items.push(FieldValue::NULL),
                    Err(Error::Cancelled) => return Ok(None),
                    Err(e) => return Err(e.into_graphql()),
                }
            }
            Ok(Some(FieldValue::list(items)))
        })
    })
}

fn reverse_field(
    spec: &FieldSpec,
    source: &TypeDescriptor,
    original_field: &str,
    resolution: &Arc<dyn Resolution>,
) -> Field {
    let original_field = original_field.to_string();
    let resolution = Arc::clone(resolution);
    Field::new(
        spec.name.clone(),
        TypeRef::named_list(source.short_id.clone()),
        move |ctx| {
            let original_field = original_field.clone();
            let resolution = Arc::clone(&resolution);
            FieldFuture::new(async move {
                let entity = parent(&ctx)?;
                let rc = request_context(&ctx)?;
                let Some(id) = entity_id(entity) else {
                    return Ok(None);
                };
                let options = FindOptions {
                    limit: int_arg(&ctx, "limit")?,
                    offset: int_arg(&ctx, "offset")?,
                    filter: None,
                };
                let found = resolution
                    .find_by_reference(rc, &original_field, id, &options)
                    .await;
                Ok(settle(found, false)?.map(entity_list))
            })
        },
    )
    .argument(pagination_arg("limit", "The maximum number of entities to return"))
    .argument(pagination_arg("offset", "The number of entities to skip"))
}

pub(crate) fn pagination_arg(name: &str, description: &str) -> InputValue {
    InputValue::new(name, TypeRef::named(TypeRef::INT)).description(description)
}

/// The GraphQL object type of `descriptor`.
pub fn output_object(
    registry: &TypeRegistry,
    descriptor: &TypeDescriptor,
    resolution: &Arc<dyn Resolution>,
) -> Object {
    let mut object = Object::new(descriptor.short_id.clone());
    for spec in registry.fields(descriptor) {
        let field = match &spec.kind {
            FieldKind::Value(shape) => value_field(spec, shape),
            FieldKind::Context => context_field(spec),
            FieldKind::Relationship {
                target_full_id,
                many,
            } => match registry.get(target_full_id) {
                Some(target) => relationship_field(spec, target, *many, resolution),
                None => continue,
            },
            FieldKind::Reverse {
                source_full_id,
                original_field,
            } => match registry.get(source_full_id) {
                Some(source) => reverse_field(spec, source, original_field, resolution),
                None => continue,
            },
        };
        object = object.field(match &spec.description {
            Some(description) => field.description(description.clone()),
            None => field,
        });
    }
    object
}
