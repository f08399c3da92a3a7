//! Adaptive pagination and request-cache behavior of the broker backend.

mod common;

use std::sync::Arc;

use common::{property, InMemoryBroker};
use ngsild_graphql::conditions::FilterCondition;
use ngsild_graphql::entity::entity_id;
use ngsild_graphql::ld_context::LdContext;
use ngsild_graphql::resolution::{BrokerResolution, FindOptions, RequestContext, Resolution};
use ngsild_graphql::schema::TypeHierarchy;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

/// `total` rooms; every seventh one is lucky.
fn rooms(total: usize) -> Vec<Value> {
    (0..total)
        .map(|i| {
            json!({
                "id": format!("urn:room:{}", i),
                "type": "Room",
                "floor": property(json!(i)),
                "lucky": property(json!(i % 7 == 0)),
            })
        })
        .collect()
}

fn resolution(broker: &Arc<InMemoryBroker>) -> BrokerResolution {
    BrokerResolution::new(broker.clone(), &TypeHierarchy::default(), LdContext::empty())
}

fn ids(entities: &[Arc<ngsild_graphql::entity::Entity>]) -> Vec<String> {
    entities
        .iter()
        .filter_map(|e| entity_id(e).map(str::to_string))
        .collect()
}

#[tokio::test]
async fn test_page_size_is_min_of_limit_and_total() {
    for total in [0, 3, 10, 25, 250] {
        for limit in [1, 5, 10, 40] {
            let broker = Arc::new(InMemoryBroker::new(rooms(total)));
            let found = resolution(&broker)
                .find(&RequestContext::new(), "Room", &FindOptions::with_limit(limit))
                .await
                .unwrap();
            assert_eq!(
                found.len(),
                total.min(limit as usize),
                "limit {} over {} rooms",
                limit,
                total
            );
        }
    }
}

#[tokio::test]
async fn test_selective_filter_still_fills_the_page() {
    let broker = Arc::new(InMemoryBroker::new(rooms(300)));
    let options = FindOptions {
        limit: Some(10),
        filter: Some(FilterCondition::parse(&json!({ "lucky": { "eq": true } })).unwrap()),
        ..Default::default()
    };
    let found = resolution(&broker)
        .find(&RequestContext::new(), "Room", &options)
        .await
        .unwrap();

    let expected: Vec<String> = (0..10).map(|i| format!("urn:room:{}", i * 7)).collect();
    assert_eq!(ids(&found), expected);
    // three small batches, then the batch size grows
    assert_eq!(broker.query_count(), 4);
}

#[tokio::test]
async fn test_unmatched_filter_stops_when_exhausted() {
    let broker = Arc::new(InMemoryBroker::new(rooms(250)));
    let options = FindOptions {
        filter: Some(FilterCondition::parse(&json!({ "floor": { "lt": 0 } })).unwrap()),
        ..Default::default()
    };
    let found = resolution(&broker)
        .find(&RequestContext::new(), "Room", &options)
        .await
        .unwrap();
    assert!(found.is_empty());
    assert!(broker.query_count() <= 6, "{} queries", broker.query_count());
}

#[tokio::test]
async fn test_offset_past_the_end() {
    let broker = Arc::new(InMemoryBroker::new(rooms(5)));
    let options = FindOptions {
        offset: Some(5),
        ..Default::default()
    };
    let found = resolution(&broker)
        .find(&RequestContext::new(), "Room", &options)
        .await
        .unwrap();
    assert!(found.is_empty());
    assert_eq!(broker.query_count(), 1);
}

#[tokio::test]
async fn test_find_one_is_cached_per_request() {
    let broker = Arc::new(InMemoryBroker::new(rooms(3)));
    let resolution = resolution(&broker);
    let ctx = RequestContext::new();

    let first = resolution
        .find_one(&ctx, None, Some("urn:room:1"))
        .await
        .unwrap()
        .unwrap();
    let second = resolution
        .find_one(&ctx, Some("Room"), Some("urn:room:1"))
        .await
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(broker.entity_calls(), 1);

    // a new request starts with an empty cache
    resolution
        .find_one(&RequestContext::new(), None, Some("urn:room:1"))
        .await
        .unwrap();
    assert_eq!(broker.entity_calls(), 2);
}

#[tokio::test]
async fn test_queried_entities_serve_later_lookups() {
    let broker = Arc::new(InMemoryBroker::new(rooms(3)));
    let resolution = resolution(&broker);
    let ctx = RequestContext::new();

    resolution
        .find(&ctx, "Room", &FindOptions::default())
        .await
        .unwrap();
    let found = resolution
        .find_one(&ctx, None, Some("urn:room:2"))
        .await
        .unwrap();
    assert!(found.is_some());
    assert_eq!(broker.entity_calls(), 0);
}
