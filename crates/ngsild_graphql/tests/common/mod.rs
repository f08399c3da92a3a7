//! Shared fixtures: an in-memory broker with call counters.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ngsild_graphql::entity::{attribute, Entity};
use ngsild_graphql::resolution::{BrokerApi, EntityPage, EntityQuery, EntitySelector, FetchedEntity};
use ngsild_graphql::{Error, Result};
use serde_json::{json, Value};

/// Broker answering from a fixed list of entities.
#[derive(Default)]
pub struct InMemoryBroker {
    entities: Vec<Entity>,
    pub entity_calls: AtomicUsize,
    pub queries: Mutex<Vec<EntityQuery>>,
}

impl InMemoryBroker {
    pub fn new(entities: Vec<Value>) -> Self {
        Self {
            entities: entities
                .into_iter()
                .map(|e| e.as_object().cloned().expect("entity must be an object"))
                .collect(),
            ..Default::default()
        }
    }

    pub fn entity_calls(&self) -> usize {
        self.entity_calls.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    fn selects(&self, entity: &Entity, selector: &EntitySelector) -> bool {
        match selector {
            EntitySelector::Type(types) => {
                let entity_type = entity.get("type").and_then(Value::as_str).unwrap_or_default();
                types.split(',').any(|t| t == entity_type)
            }
            EntitySelector::Query(q) => {
                let (field, target) = q.split_once("==").expect("only == queries are supported");
                let target = target.trim_matches('"');
                attribute(entity, field).references().contains(&target)
            }
        }
    }
}

#[async_trait]
impl BrokerApi for InMemoryBroker {
    async fn entity(&self, id: &str) -> Result<FetchedEntity> {
        self.entity_calls.fetch_add(1, Ordering::SeqCst);
        self.entities
            .iter()
            .find(|e| e.get("id") == Some(&json!(id)))
            .map(|e| FetchedEntity {
                entity: e.clone(),
                link: None,
            })
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn entities(&self, query: &EntityQuery) -> Result<EntityPage> {
        self.queries.lock().unwrap().push(query.clone());
        let matching: Vec<&Entity> = self
            .entities
            .iter()
            .filter(|e| self.selects(e, &query.selector))
            .collect();
        Ok(EntityPage {
            entities: matching
                .iter()
                .skip(query.offset)
                .take(query.limit)
                .map(|e| (*e).clone())
                .collect(),
            link: Some("<https://example.org/ngsi-context.jsonld>".to_string()),
            total_count: Some(matching.len()),
        })
    }
}

/// `Room` and `Building` definitions; `Room.partOf` points at `Building`.
pub fn room_and_building() -> Vec<Value> {
    vec![
        json!({
            "$id": "Room.json",
            "properties": {
                "id": { "type": "string" },
                "type": { "type": "string" },
                "name": { "type": "string" },
                "floor": { "type": "integer" },
                "partOf": { "type": "string", "format": "uri", "x-ref-type": "Building" }
            }
        }),
        json!({
            "$id": "Building.json",
            "properties": {
                "id": { "type": "string" },
                "type": { "type": "string" },
                "name": { "type": "string" },
                "height": { "type": "number" }
            }
        }),
    ]
}

pub fn property(value: Value) -> Value {
    json!({ "type": "Property", "value": value })
}

pub fn relationship(object: &str) -> Value {
    json!({ "type": "Relationship", "object": object })
}

/// Two buildings and four rooms: two pointing at existing buildings, one
/// dangling and one without `partOf`.
pub fn campus() -> Vec<Value> {
    vec![
        json!({ "id": "urn:b1", "type": "Building", "name": property(json!("HQ")), "height": property(json!(42.5)) }),
        json!({ "id": "urn:b2", "type": "Building", "name": property(json!("Lab")), "height": property(json!(12)) }),
        json!({ "id": "urn:r1", "type": "Room", "name": property(json!("Kitchen")), "floor": property(json!(1)), "partOf": relationship("urn:b1") }),
        json!({ "id": "urn:r2", "type": "Room", "name": property(json!("Office")), "floor": property(json!(2)), "partOf": relationship("urn:b2") }),
        json!({ "id": "urn:r3", "type": "Room", "name": property(json!("Attic")), "floor": property(json!(3)), "partOf": relationship("urn:gone") }),
        json!({ "id": "urn:r4", "type": "Room", "name": property(json!("Shed")), "floor": property(json!(0)) }),
    ]
}
