//! Per-request state shared by all resolvers of one query.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::entity::{entity_id, Entity};
use crate::error::{Error, Result};

/// Created once per incoming query and dropped when it completes.
///
/// Holds the entity cache (`id → entity`) and the cancellation token of the
/// request. Two sibling resolvers racing on the same uncached id may both
/// fetch it; the first stored copy wins and is what every later lookup sees.
#[derive(Debug, Default)]
pub struct RequestContext {
    cache: DashMap<String, Arc<Entity>>,
    cancellation: CancellationToken,
}

impl RequestContext {
    /// A fresh context with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh context cancelled together with `token`.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cache: DashMap::new(),
            cancellation: token,
        }
    }

    /// The cached entity for `id`, if any.
    pub fn cached(&self, id: &str) -> Option<Arc<Entity>> {
        self.cache.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Store `entity` under its own id and return the cached instance.
    ///
    /// Entities without an id are returned as-is and not cached.
    pub fn remember(&self, entity: Entity) -> Arc<Entity> {
        let entity = Arc::new(entity);
        match entity_id(&entity) {
            Some(id) => self.remember_as(id.to_string(), entity),
            None => entity,
        }
    }

    /// Store `entity` under `id`, keeping an already cached instance.
    pub fn remember_as(&self, id: String, entity: Arc<Entity>) -> Arc<Entity> {
        Arc::clone(self.cache.entry(id).or_insert(entity).value())
    }

    /// Number of cached entities.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// The cancellation token of this request.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Abort every outstanding upstream call of this request.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Returns `true` once the request was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Run an upstream call, resolving to [`Error::Cancelled`] as soon as the
    /// request is cancelled. The call's future is dropped in that case, so
    /// nothing it would have cached is stored.
    pub async fn guard<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(Error::Cancelled),
            result = call => result,
        }
    }
}
