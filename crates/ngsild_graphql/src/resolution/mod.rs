//! Resolution engine: fetching entities from the upstream store.
//!
//! Two interchangeable backends implement [`Resolution`]:
//!
//! - [`BrokerResolution`]: an NGSI-LD broker REST API
//! - [`TwinResolution`]: a tabular twin store exchanging `records-get` requests
//!
//! The backend is chosen once at startup from the configuration; the compiled
//! schema only ever sees `Arc<dyn Resolution>`.

pub mod broker;
mod context;
pub mod twin;

pub use broker::{
    BrokerApi, BrokerConfig, BrokerResolution, EntityPage, EntityQuery, EntitySelector, FetchedEntity,
    HttpBroker,
};
pub use context::RequestContext;
pub use twin::{HttpTwin, RecordsRequest, TwinApi, TwinResolution, WhereClause};

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::debug;

use crate::conditions::{filter_entities, FilterCondition};
use crate::entity::Entity;
use crate::error::Result;

/// Page size used when a query does not ask for a positive limit.
pub const DEFAULT_LIMIT: usize = 10;

/// Upper bound for the adaptive upstream batch size.
pub const MAX_QUERY_LIMIT: usize = 100;

/// Pagination and filter arguments of a plural query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub filter: Option<FilterCondition>,
}

impl FindOptions {
    /// Options with only a limit.
    pub fn with_limit(limit: i64) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// The requested limit, or [`DEFAULT_LIMIT`] when unset or non-positive.
    pub fn effective_limit(&self) -> usize {
        match self.limit {
            Some(limit) if limit > 0 => limit as usize,
            _ => DEFAULT_LIMIT,
        }
    }

    /// The requested offset, or 0.
    pub fn effective_offset(&self) -> usize {
        self.offset.filter(|o| *o > 0).map_or(0, |o| o as usize)
    }
}

/// Entity lookups against an upstream store.
#[async_trait]
pub trait Resolution: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Fetch a single entity.
    ///
    /// With an `entity_id`, the request cache is consulted first and a miss
    /// issues one upstream fetch; an unknown id fails with `NotFound`. With
    /// only a type, the first entity of that type is returned. Fails with
    /// `InvalidInput` when neither is given.
    async fn find_one(
        &self,
        ctx: &RequestContext,
        type_id: Option<&str>,
        entity_id: Option<&str>,
    ) -> Result<Option<Arc<Entity>>>;

    /// Entities of a type, paginated and filtered.
    async fn find(
        &self,
        ctx: &RequestContext,
        type_id: &str,
        options: &FindOptions,
    ) -> Result<Vec<Arc<Entity>>>;

    /// Entities whose `field` references `target_entity_id`.
    async fn find_by_reference(
        &self,
        _ctx: &RequestContext,
        field: &str,
        target_entity_id: &str,
        _options: &FindOptions,
    ) -> Result<Vec<Arc<Entity>>> {
        debug!(
            backend = self.name(),
            field, target_entity_id, "reverse lookups not supported"
        );
        Ok(Vec::new())
    }
}

/// One upstream round trip of a paginated query.
#[derive(Debug, Default)]
pub struct Batch {
    /// The raw (unfiltered) entities returned by the store.
    pub entities: Vec<Arc<Entity>>,
    /// Total number of matches reported by the store, if it reports one.
    pub total: Option<usize>,
}

/// Drive a paginated query: fetch raw batches with `fetch(limit, offset)`,
/// filter each one, and collect matches until `options`' limit is reached
/// or the store is exhausted.
///
/// The offset advances by the raw batch size. When the filter is selective
/// the batch size grows to [`MAX_QUERY_LIMIT`] after a few rounds.
pub async fn paginate<'f, F>(
    ctx: &RequestContext,
    resolution: &dyn Resolution,
    options: &FindOptions,
    mut fetch: F,
) -> Result<Vec<Arc<Entity>>>
where
    F: FnMut(usize, usize) -> BoxFuture<'f, Result<Batch>>,
{
    let limit = options.effective_limit();
    let mut offset = options.effective_offset();
    let mut query_limit = limit;
    let mut results: Vec<Arc<Entity>> = Vec::new();
    let mut rounds = 0usize;

    loop {
        let batch = ctx.guard(fetch(query_limit, offset)).await?;
        let raw = batch.entities.len();
        let matching = filter_entities(batch.entities, options.filter.as_ref(), ctx, resolution).await?;

        if results.len() + matching.len() >= limit {
            let missing = limit - results.len();
            results.extend(matching.into_iter().take(missing));
            break;
        }
        results.extend(matching);

        offset += raw;
        let exhausted = raw < query_limit || batch.total.is_some_and(|total| offset >= total);
        if exhausted {
            break;
        }
        rounds += 1;
        if query_limit < MAX_QUERY_LIMIT && ((rounds > 2 && results.len() < 10) || rounds > 10) {
            query_limit = MAX_QUERY_LIMIT;
        }
    }
    debug!(limit, found = results.len(), rounds, "paginated query done");
    Ok(results)
}
