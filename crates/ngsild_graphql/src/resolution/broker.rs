//! Resolution against an NGSI-LD broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, LINK};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::{paginate, Batch, FindOptions, RequestContext, Resolution};
use crate::entity::{Entity, CONTEXT_ATTRIBUTE};
use crate::error::{Error, Result};
use crate::ld_context::{link_header, parse_link_header, LdContext};
use crate::schema::TypeHierarchy;

/// Header carrying the total match count when `count=true` is requested.
pub const RESULTS_COUNT_HEADER: &str = "NGSILD-Results-Count";

/// A single entity plus the `Link` header it came with.
#[derive(Debug, Clone, Default)]
pub struct FetchedEntity {
    pub entity: Entity,
    pub link: Option<String>,
}

/// One page of a broker query.
#[derive(Debug, Clone, Default)]
pub struct EntityPage {
    pub entities: Vec<Entity>,
    pub link: Option<String>,
    /// Value of the results-count header, if sent.
    pub total_count: Option<usize>,
}

/// What a broker query selects on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitySelector {
    /// `type=` with a comma separated list of short type names.
    Type(String),
    /// `q=` with an NGSI-LD query expression (not yet url encoded).
    Query(String),
}

/// A paginated broker query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityQuery {
    pub selector: EntitySelector,
    pub limit: usize,
    pub offset: usize,
}

impl EntityQuery {
    /// The query string of `GET /entities`.
    pub fn to_query_string(&self) -> String {
        let selector = match &self.selector {
            EntitySelector::Type(types) => format!("type={}", urlencoding::encode(types)),
            EntitySelector::Query(q) => format!("q={}", urlencoding::encode(q)),
        };
        format!(
            "{}&limit={}&offset={}&count=true",
            selector, self.limit, self.offset
        )
    }
}

/// The broker's REST surface used by [`BrokerResolution`].
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// `GET /entities/{id}`; fails with `NotFound` on 404.
    async fn entity(&self, id: &str) -> Result<FetchedEntity>;

    /// `GET /entities?...`
    async fn entities(&self, query: &EntityQuery) -> Result<EntityPage>;
}

/// Settings of [`HttpBroker`].
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// NGSI-LD API root, e.g. `http://localhost:1026/ngsi-ld/v1`.
    pub base_url: String,
    /// Ask for the simplified representation (`application/json`).
    pub simplified: bool,
    /// Context URL announced in the `Link` header.
    pub context_url: Option<String>,
    pub timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1026/ngsi-ld/v1".to_string(),
            simplified: false,
            context_url: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// [`BrokerApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBroker {
    base_url: String,
    http: Client,
}

impl HttpBroker {
    pub fn new(config: BrokerConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let accept = if config.simplified {
            "application/json"
        } else {
            "application/ld+json"
        };
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        if let Some(url) = &config.context_url {
            let link = HeaderValue::from_str(&link_header(url))
                .map_err(|e| Error::Config(format!("invalid context url {}: {}", url, e)))?;
            headers.insert(LINK, link);
        }
        let http = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn upstream_error(response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("unknown").to_string()
    } else {
        body
    };
    Error::Upstream {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl BrokerApi for HttpBroker {
    async fn entity(&self, id: &str) -> Result<FetchedEntity> {
        let url = self.url(&format!("/entities/{}", urlencoding::encode(id)));
        debug!(%url, "fetching entity");
        let response = self.http.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(id.to_string()));
        }
        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }
        let link = header_string(response.headers(), LINK.as_str());
        let entity: Entity = response.json().await?;
        Ok(FetchedEntity { entity, link })
    }

    async fn entities(&self, query: &EntityQuery) -> Result<EntityPage> {
        let url = self.url(&format!("/entities?{}", query.to_query_string()));
        debug!(%url, limit = query.limit, offset = query.offset, "querying entities");
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }
        let link = header_string(response.headers(), LINK.as_str());
        let total_count = header_string(response.headers(), RESULTS_COUNT_HEADER)
            .and_then(|count| count.trim().parse().ok());
        let entities: Vec<Entity> = response.json().await?;
        Ok(EntityPage {
            entities,
            link,
            total_count,
        })
    }
}

/// Bring a fetched entity into the shape every reader expects.
///
/// - `{value: {"@value": x}}` collapses to `{value: x}`
/// - contexts from the `Link` header are attached when the entity has none
/// - a single context string becomes a one-element list
pub fn normalize(entity: &mut Entity, link: Option<&str>) {
    for value in entity.values_mut() {
        let Some(envelope) = value.as_object_mut() else {
            continue;
        };
        let literal = envelope
            .get("value")
            .and_then(Value::as_object)
            .and_then(|v| v.get("@value"))
            .cloned();
        if let Some(literal) = literal {
            envelope.insert("value".to_string(), literal);
        }
    }

    let has_context = entity
        .get(CONTEXT_ATTRIBUTE)
        .is_some_and(|c| !c.is_null());
    if !has_context {
        let links = link.map(parse_link_header).unwrap_or_default();
        if !links.is_empty() {
            entity.insert(
                CONTEXT_ATTRIBUTE.to_string(),
                Value::Array(links.into_iter().map(Value::String).collect()),
            );
        }
    }
    if let Some(Value::String(single)) = entity.get(CONTEXT_ATTRIBUTE) {
        let list = Value::Array(vec![Value::String(single.clone())]);
        entity.insert(CONTEXT_ATTRIBUTE.to_string(), list);
    }
}

/// [`Resolution`] backed by an NGSI-LD broker.
///
/// Type queries include all known subtypes, translated to short terms
/// through the `@context`.
pub struct BrokerResolution {
    api: Arc<dyn BrokerApi>,
    context: LdContext,
    /// Full type id → `type=` value, for types that have subtypes.
    subtype_queries: IndexMap<String, String>,
}

impl BrokerResolution {
    pub fn new(api: Arc<dyn BrokerApi>, hierarchy: &TypeHierarchy, context: LdContext) -> Self {
        let mut subtype_queries = IndexMap::new();
        for (_, parents) in hierarchy.iter() {
            for parent in parents {
                if !subtype_queries.contains_key(parent) {
                    let query = hierarchy.subtype_query(parent, &context);
                    subtype_queries.insert(parent.clone(), query);
                }
            }
        }
        Self {
            api,
            context,
            subtype_queries,
        }
    }

    /// The `type=` value for a full type id.
    pub fn type_query(&self, type_id: &str) -> String {
        match self.subtype_queries.get(type_id) {
            Some(query) => query.clone(),
            None => self.context.shorten(type_id).to_string(),
        }
    }

    async fn fetch_batch(&self, ctx: &RequestContext, query: EntityQuery) -> Result<Batch> {
        let page = self.api.entities(&query).await?;
        let link = page.link.as_deref();
        let entities = page
            .entities
            .into_iter()
            .map(|mut entity| {
                normalize(&mut entity, link);
                ctx.remember(entity)
            })
            .collect();
        Ok(Batch {
            entities,
            total: page.total_count,
        })
    }

    async fn query(
        &self,
        ctx: &RequestContext,
        selector: EntitySelector,
        options: &FindOptions,
    ) -> Result<Vec<Arc<Entity>>> {
        paginate(ctx, self, options, |limit, offset| {
            let query = EntityQuery {
                selector: selector.clone(),
                limit,
                offset,
            };
            self.fetch_batch(ctx, query).boxed()
        })
        .await
    }
}

#[async_trait]
impl Resolution for BrokerResolution {
    fn name(&self) -> &'static str {
        "broker"
    }

    async fn find_one(
        &self,
        ctx: &RequestContext,
        type_id: Option<&str>,
        entity_id: Option<&str>,
    ) -> Result<Option<Arc<Entity>>> {
        let type_id = type_id.filter(|t| !t.is_empty());
        match entity_id.filter(|id| !id.is_empty()) {
            Some(id) => {
                if let Some(cached) = ctx.cached(id) {
                    return Ok(Some(cached));
                }
                let fetched = ctx.guard(self.api.entity(id)).await?;
                let mut entity = fetched.entity;
                normalize(&mut entity, fetched.link.as_deref());
                Ok(Some(ctx.remember_as(id.to_string(), Arc::new(entity))))
            }
            None => match type_id {
                Some(type_id) => Ok(self
                    .find(ctx, type_id, &FindOptions::with_limit(1))
                    .await?
                    .into_iter()
                    .next()),
                None => Err(Error::InvalidInput(
                    "type or entity id must be provided".to_string(),
                )),
            },
        }
    }

    async fn find(
        &self,
        ctx: &RequestContext,
        type_id: &str,
        options: &FindOptions,
    ) -> Result<Vec<Arc<Entity>>> {
        let selector = EntitySelector::Type(self.type_query(type_id));
        self.query(ctx, selector, options).await
    }

    async fn find_by_reference(
        &self,
        ctx: &RequestContext,
        field: &str,
        target_entity_id: &str,
        options: &FindOptions,
    ) -> Result<Vec<Arc<Entity>>> {
        if field.is_empty() || target_entity_id.is_empty() {
            return Ok(Vec::new());
        }
        let selector = EntitySelector::Query(format!("{}==\"{}\"", field, target_entity_id));
        self.query(ctx, selector, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBroker {
        entities: Vec<Entity>,
        queries: Mutex<Vec<EntityQuery>>,
    }

    impl FakeBroker {
        fn with(entities: Vec<Value>) -> Self {
            Self {
                entities: entities
                    .into_iter()
                    .map(|e| e.as_object().cloned().unwrap())
                    .collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl BrokerApi for FakeBroker {
        async fn entity(&self, id: &str) -> Result<FetchedEntity> {
            self.entities
                .iter()
                .find(|e| e["id"] == json!(id))
                .map(|e| FetchedEntity {
                    entity: e.clone(),
                    link: Some("<http://ctx>".into()),
                })
                .ok_or_else(|| Error::NotFound(id.to_string()))
        }

        async fn entities(&self, query: &EntityQuery) -> Result<EntityPage> {
            self.queries.lock().unwrap().push(query.clone());
            let page = self
                .entities
                .iter()
                .skip(query.offset)
                .take(query.limit)
                .cloned()
                .collect();
            Ok(EntityPage {
                entities: page,
                link: None,
                total_count: Some(self.entities.len()),
            })
        }
    }

    fn resolution(fake: Arc<FakeBroker>) -> BrokerResolution {
        let hierarchy = TypeHierarchy::from_pairs([("urn:types/Office", vec!["urn:types/Room"])]);
        BrokerResolution::new(fake, &hierarchy, LdContext::empty())
    }

    #[test]
    fn test_query_string() {
        let q = EntityQuery {
            selector: EntitySelector::Query("partOf==\"urn:B:1\"".into()),
            limit: 10,
            offset: 20,
        };
        assert_eq!(
            q.to_query_string(),
            "q=partOf%3D%3D%22urn%3AB%3A1%22&limit=10&offset=20&count=true"
        );
        let q = EntityQuery {
            selector: EntitySelector::Type("Room,Office".into()),
            limit: 1,
            offset: 0,
        };
        assert_eq!(q.to_query_string(), "type=Room%2COffice&limit=1&offset=0&count=true");
    }

    #[test]
    fn test_normalize() {
        let mut e = json!({
            "id": "urn:R:1",
            "since": { "type": "Property", "value": { "@type": "DateTime", "@value": "2021" } },
            "@context": "http://ctx"
        })
        .as_object()
        .cloned()
        .unwrap();
        normalize(&mut e, Some("<http://other>"));
        assert_eq!(e["since"]["value"], json!("2021"));
        assert_eq!(e["@context"], json!(["http://ctx"]));

        let mut e = json!({ "id": "urn:R:2" }).as_object().cloned().unwrap();
        normalize(&mut e, Some("<http://a>; rel=\"x\""));
        assert_eq!(e["@context"], json!(["http://a"]));
    }

    #[test]
    fn test_type_query_includes_subtypes() {
        let r = resolution(Arc::new(FakeBroker::default()));
        assert_eq!(r.type_query("urn:types/Room"), "urn:types/Room,urn:types/Office");
        assert_eq!(r.type_query("urn:types/Building"), "urn:types/Building");
    }

    #[tokio::test]
    async fn test_find_one_requires_an_argument() {
        let r = resolution(Arc::new(FakeBroker::default()));
        let err = r
            .find_one(&RequestContext::new(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_find_one_caches() {
        let fake = Arc::new(FakeBroker::with(vec![json!({ "id": "urn:R:1", "type": "Room" })]));
        let r = resolution(fake);
        let ctx = RequestContext::new();
        let first = r.find_one(&ctx, None, Some("urn:R:1")).await.unwrap().unwrap();
        let second = r.find_one(&ctx, None, Some("urn:R:1")).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first["@context"], json!(["http://ctx"]));
    }

    #[tokio::test]
    async fn test_find_one_by_type() {
        let fake = Arc::new(FakeBroker::with(vec![
            json!({ "id": "urn:R:1", "type": "Room" }),
            json!({ "id": "urn:R:2", "type": "Room" }),
        ]));
        let r = resolution(Arc::clone(&fake));
        let ctx = RequestContext::new();
        let found = r.find_one(&ctx, Some("urn:types/Room"), None).await.unwrap().unwrap();
        assert_eq!(found["id"], json!("urn:R:1"));
        let queries = fake.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].limit, 1);
    }

    #[tokio::test]
    async fn test_find_stops_at_reported_total() {
        let fake = Arc::new(FakeBroker::with(
            (0..20).map(|i| json!({ "id": format!("urn:R:{}", i), "n": i })).collect(),
        ));
        let r = resolution(Arc::clone(&fake));
        let ctx = RequestContext::new();
        let options = FindOptions {
            limit: Some(5),
            offset: None,
            filter: Some(
                crate::conditions::FilterCondition::parse(&json!({ "n": { "lt": 3 } })).unwrap(),
            ),
        };
        let found = r.find(&ctx, "urn:types/Room", &options).await.unwrap();
        assert_eq!(found.len(), 3);
        // 4 batches of 5 cover the total of 20
        assert_eq!(fake.queries.lock().unwrap().len(), 4);
        assert_eq!(ctx.cached_count(), 20);
    }

    #[tokio::test]
    async fn test_find_by_reference_empty_arguments() {
        let fake = Arc::new(FakeBroker::default());
        let r = resolution(Arc::clone(&fake));
        let ctx = RequestContext::new();
        let found = r
            .find_by_reference(&ctx, "", "urn:B:1", &FindOptions::default())
            .await
            .unwrap();
        assert!(found.is_empty());
        assert!(fake.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_by_reference_query() {
        let fake = Arc::new(FakeBroker::default());
        let r = resolution(Arc::clone(&fake));
        let ctx = RequestContext::new();
        r.find_by_reference(&ctx, "partOf", "urn:B:1", &FindOptions::default())
            .await
            .unwrap();
        let queries = fake.queries.lock().unwrap();
        assert_eq!(
            queries[0].selector,
            EntitySelector::Query("partOf==\"urn:B:1\"".into())
        );
    }
}
