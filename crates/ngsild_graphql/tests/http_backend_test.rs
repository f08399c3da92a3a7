//! The HTTP clients of both backends against a local mock server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ngsild_graphql::resolution::{
    BrokerApi, BrokerConfig, EntityQuery, EntitySelector, HttpBroker, HttpTwin, RecordsRequest,
    TwinApi, WhereClause,
};
use ngsild_graphql::Error;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::net::TcpListener;

const CONTEXT: &str = "http://context/ngsi-context.jsonld";

#[derive(Clone, Default)]
struct Recorded {
    headers: Arc<Mutex<Vec<HeaderMap>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

async fn entity(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    recorded.headers.lock().unwrap().push(headers);
    if id != "urn:b1" {
        return StatusCode::NOT_FOUND.into_response();
    }
    (
        [(header::LINK, format!("<{}>; rel=\"context\"", CONTEXT))],
        Json(json!({ "id": "urn:b1", "type": "Building" })),
    )
        .into_response()
}

async fn entities(
    State(recorded): State<Recorded>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let failing = params.get("type").is_some_and(|t| t == "Broken");
    recorded.queries.lock().unwrap().push(params);
    if failing {
        return (StatusCode::BAD_REQUEST, "bad type").into_response();
    }
    (
        [("NGSILD-Results-Count", "7")],
        Json(json!([{ "id": "urn:r1", "type": "Room" }, { "id": "urn:r2", "type": "Room" }])),
    )
        .into_response()
}

async fn records(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    recorded.bodies.lock().unwrap().push(body);
    Json(json!([{ "id": "urn:r1", "name": "Kitchen" }]))
}

async fn mock() -> (SocketAddr, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/ngsi-ld/v1/entities/{id}", get(entity))
        .route("/ngsi-ld/v1/entities", get(entities))
        .route("/api/records-get", post(records))
        .with_state(recorded.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, recorded)
}

fn broker(addr: SocketAddr, simplified: bool) -> HttpBroker {
    HttpBroker::new(BrokerConfig {
        base_url: format!("http://{}/ngsi-ld/v1/", addr),
        simplified,
        context_url: Some(CONTEXT.to_string()),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn test_broker_entity_with_headers() {
    let (addr, recorded) = mock().await;
    let fetched = broker(addr, false).entity("urn:b1").await.unwrap();

    assert_eq!(fetched.entity["type"], json!("Building"));
    assert_eq!(
        fetched.link.as_deref(),
        Some("<http://context/ngsi-context.jsonld>; rel=\"context\"")
    );

    let headers = recorded.headers.lock().unwrap();
    assert_eq!(headers[0][header::ACCEPT], "application/ld+json");
    assert!(headers[0][header::LINK].to_str().unwrap().contains(CONTEXT));
}

#[tokio::test]
async fn test_broker_simplified_accept_header() {
    let (addr, recorded) = mock().await;
    broker(addr, true).entity("urn:b1").await.unwrap();
    assert_eq!(
        recorded.headers.lock().unwrap()[0][header::ACCEPT],
        "application/json"
    );
}

#[tokio::test]
async fn test_broker_missing_entity() {
    let (addr, _) = mock().await;
    let err = broker(addr, false).entity("urn:nope").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(ref id) if id == "urn:nope"));
}

#[tokio::test]
async fn test_broker_entities_page() {
    let (addr, recorded) = mock().await;
    let query = EntityQuery {
        selector: EntitySelector::Query("partOf==\"urn:b1\"".to_string()),
        limit: 2,
        offset: 4,
    };
    let page = broker(addr, false).entities(&query).await.unwrap();

    assert_eq!(page.entities.len(), 2);
    assert_eq!(page.total_count, Some(7));

    let queries = recorded.queries.lock().unwrap();
    assert_eq!(queries[0]["q"], "partOf==\"urn:b1\"");
    assert_eq!(queries[0]["limit"], "2");
    assert_eq!(queries[0]["offset"], "4");
    assert_eq!(queries[0]["count"], "true");
}

#[tokio::test]
async fn test_broker_upstream_error() {
    let (addr, _) = mock().await;
    let query = EntityQuery {
        selector: EntitySelector::Type("Broken".to_string()),
        limit: 10,
        offset: 0,
    };
    let err = broker(addr, false).entities(&query).await.unwrap_err();
    match err {
        Error::Upstream { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "bad type");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_twin_records_request_body() {
    let (addr, recorded) = mock().await;
    let twin = HttpTwin::new(&format!("http://{}/api/", addr), Duration::from_secs(5)).unwrap();
    let request = RecordsRequest {
        table: Some("Room".to_string()),
        where_clause: Some(WhereClause::id_equals("urn:r1")),
        limit: 1,
        offset: None,
    };
    let records = twin.records(&request).await.unwrap();
    assert_eq!(records[0]["name"], json!("Kitchen"));

    assert_eq!(
        recorded.bodies.lock().unwrap()[0],
        json!({
            "table": "Room",
            "where": {
                "condition": "AND",
                "fields": [{ "condition": "=", "fields": ["id", "urn:r1"] }]
            },
            "limit": 1
        })
    );
}
