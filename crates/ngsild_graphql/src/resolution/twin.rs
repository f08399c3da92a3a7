//! Resolution against a tabular twin store.
//!
//! The store exposes a single `records-get` endpoint taking the table name,
//! an optional where clause and limit/offset in one JSON body, and returns a
//! plain array of records in the simplified representation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{paginate, Batch, FindOptions, RequestContext, Resolution};
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::schema::definition::short_id;

/// One condition of a where clause: either a comparison over
/// `[field, value]` or a nested group of clauses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhereClause {
    pub condition: String,
    pub fields: Vec<WhereField>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WhereField {
    Clause(WhereClause),
    Value(Value),
}

impl WhereClause {
    /// `AND(id = <id>)`
    pub fn id_equals(id: &str) -> Self {
        WhereClause {
            condition: "AND".to_string(),
            fields: vec![WhereField::Clause(WhereClause {
                condition: "=".to_string(),
                fields: vec![
                    WhereField::Value(Value::String("id".to_string())),
                    WhereField::Value(Value::String(id.to_string())),
                ],
            })],
        }
    }
}

/// Body of a `records-get` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<WhereClause>,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

/// The twin store's API used by [`TwinResolution`].
#[async_trait]
pub trait TwinApi: Send + Sync {
    async fn records(&self, request: &RecordsRequest) -> Result<Vec<Entity>>;
}

/// [`TwinApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTwin {
    endpoint: String,
    http: Client,
}

impl HttpTwin {
    /// `api_url` is the API root; requests go to `{api_url}/records-get`.
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            endpoint: format!("{}/records-get", api_url.trim_end_matches('/')),
            http,
        })
    }
}

#[async_trait]
impl TwinApi for HttpTwin {
    async fn records(&self, request: &RecordsRequest) -> Result<Vec<Entity>> {
        debug!(endpoint = %self.endpoint, table = ?request.table, limit = request.limit, offset = ?request.offset, "records-get");
        let response = self.http.post(&self.endpoint).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }
        Ok(response.json().await?)
    }
}

/// [`Resolution`] backed by the twin store. Reverse lookups are not supported.
pub struct TwinResolution {
    api: Arc<dyn TwinApi>,
}

impl TwinResolution {
    pub fn new(api: Arc<dyn TwinApi>) -> Self {
        Self { api }
    }

    async fn fetch_batch(&self, ctx: &RequestContext, request: RecordsRequest) -> Result<Batch> {
        let records = self.api.records(&request).await?;
        Ok(Batch {
            entities: records.into_iter().map(|r| ctx.remember(r)).collect(),
            total: None,
        })
    }
}

#[async_trait]
impl Resolution for TwinResolution {
    fn name(&self) -> &'static str {
        "twin"
    }

    async fn find_one(
        &self,
        ctx: &RequestContext,
        type_id: Option<&str>,
        entity_id: Option<&str>,
    ) -> Result<Option<Arc<Entity>>> {
        let type_id = type_id.filter(|t| !t.is_empty());
        let Some(id) = entity_id.filter(|id| !id.is_empty()) else {
            return match type_id {
                Some(type_id) => Ok(self
                    .find(ctx, type_id, &FindOptions::with_limit(1))
                    .await?
                    .into_iter()
                    .next()),
                None => Err(Error::InvalidInput(
                    "type or entity id must be provided".to_string(),
                )),
            };
        };
        if let Some(cached) = ctx.cached(id) {
            return Ok(Some(cached));
        }
        let request = RecordsRequest {
            table: type_id.map(|t| short_id(t).to_string()),
            where_clause: Some(WhereClause::id_equals(id)),
            limit: 1,
            offset: None,
        };
        let records = ctx.guard(self.api.records(&request)).await?;
        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(Some(ctx.remember_as(id.to_string(), Arc::new(record))))
    }

    async fn find(
        &self,
        ctx: &RequestContext,
        type_id: &str,
        options: &FindOptions,
    ) -> Result<Vec<Arc<Entity>>> {
        let table = short_id(type_id).to_string();
        paginate(ctx, self, options, |limit, offset| {
            let request = RecordsRequest {
                table: Some(table.clone()),
                where_clause: None,
                limit,
                offset: Some(offset),
            };
            self.fetch_batch(ctx, request).boxed()
        })
        .await
    }
}
