//! Obtaining the `@context` document at startup.
//!
//! There are four cases:
//!
//! - internal URL and broker URL both given: the content is downloaded from
//!   the internal URL, the broker URL is used as is
//! - only the internal URL: the content is downloaded and posted to the
//!   broker, which then serves it under its `/jsonldContexts` path
//! - only the broker URL: the URL is registered with the broker and the
//!   content is downloaded from the broker
//! - neither: no context is used

use std::future::Future;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::LdContext;
use crate::error::{Error, Result};

const CONTEXTS_PATH: &str = "/jsonldContexts";

/// Where the context comes from.
#[derive(Debug, Clone, Default)]
pub struct ContextSources {
    /// NGSI-LD API root of the broker (`.../ngsi-ld/v1`).
    pub ngsi_base_url: String,
    /// URL this service downloads the context from.
    pub internal_url: Option<String>,
    /// URL the broker resolves the context from.
    pub broker_url: Option<String>,
}

/// The outcome of [`retrieve_context`].
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub context: LdContext,
    /// URL to send in the `Link` header of broker queries.
    pub broker_url: Option<String>,
}

/// Retry policy with a linearly growing pause between attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub attempts: u32,
    pub step: Duration,
}

impl Backoff {
    pub const fn new(attempts: u32, step: Duration) -> Self {
        Self { attempts, step }
    }

    /// Run `operation` until it succeeds or the attempts are used up. The
    /// n-th retry waits `n * step`.
    pub async fn retry<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last = Error::Config(format!("{}: no attempts configured", what));
        for attempt in 0..self.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.step * attempt).await;
            }
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!(what, attempt, error = %e, "attempt failed");
                    last = e;
                }
            }
        }
        Err(last)
    }
}

const INTERNAL_DOWNLOAD: Backoff = Backoff::new(20, Duration::from_millis(100));
const BROKER_POST: Backoff = Backoff::new(3, Duration::from_millis(2_000));

/// Resolve the context and the URL the broker should see it under.
pub async fn retrieve_context(sources: &ContextSources, client: &Client) -> Result<RetrievedContext> {
    retrieve_with(sources, client, INTERNAL_DOWNLOAD, BROKER_POST).await
}

pub(crate) async fn retrieve_with(
    sources: &ContextSources,
    client: &Client,
    download: Backoff,
    post: Backoff,
) -> Result<RetrievedContext> {
    let base = sources.ngsi_base_url.trim_end_matches('/');
    let mut broker_url = sources.broker_url.clone();

    let content = if let Some(internal) = &sources.internal_url {
        Some(
            download
                .retry("download context", || fetch_context(client, internal, "application/json"))
                .await?,
        )
    } else if let Some(url) = &sources.broker_url {
        Some(get_or_create(client, base, url, post).await?)
    } else {
        None
    };

    let Some(content) = content else {
        info!("no @context configured");
        return Ok(RetrievedContext::default());
    };

    if broker_url.is_none() {
        let body = Value::Object(content.clone()).to_string();
        match post_context(client, base, body, post).await {
            Ok(url) => broker_url = Some(url),
            Err(e) => warn!(error = %e, "could not register @context with the broker"),
        }
    }

    let context = LdContext::from_json(&content);
    info!(terms = context.len(), broker_url = ?broker_url, "@context loaded");
    Ok(RetrievedContext {
        context,
        broker_url,
    })
}

async fn fetch_context(client: &Client, url: &str, accept: &str) -> Result<Map<String, Value>> {
    let response = client.get(url).header(ACCEPT, accept).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Upstream {
            status: status.as_u16(),
            message: format!("failed to retrieve context from {}", url),
        });
    }
    let document: Value = response.json().await?;
    match document.get("@context") {
        Some(Value::Object(context)) => Ok(context.clone()),
        _ => Err(Error::Serialization(format!(
            "document at {} has no @context object",
            url
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    url: String,
    id: String,
}

async fn find_registered(client: &Client, base: &str, url: &str) -> Result<Option<String>> {
    let response = client
        .get(format!("{}{}?details=true", base, CONTEXTS_PATH))
        .header(ACCEPT, "application/json")
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Upstream {
            status: status.as_u16(),
            message: "failed to list broker contexts".to_string(),
        });
    }
    let entries: Vec<ContextEntry> = response.json().await?;
    Ok(entries
        .into_iter()
        .find(|entry| entry.url == url)
        .map(|entry| format!("{}{}/{}", base, CONTEXTS_PATH, entry.id)))
}

/// Register `url` with the broker if needed and download the content from it.
async fn get_or_create(client: &Client, base: &str, url: &str, post: Backoff) -> Result<Map<String, Value>> {
    let mut location = find_registered(client, base, url).await?;
    if location.is_none() {
        // the broker may answer with a different internal id than the one it
        // lists afterwards, so look it up again
        let body = Value::Array(vec![Value::String(url.to_string())]).to_string();
        post_context(client, base, body, post).await?;
        location = find_registered(client, base, url).await?;
    }
    let Some(location) = location else {
        return Err(Error::Upstream {
            status: 404,
            message: format!("context for {} not created", url),
        });
    };
    fetch_context(client, &location, "application/ld+json").await
}

/// POST a context body; returns the broker URL serving it.
async fn post_context(client: &Client, base: &str, body: String, post: Backoff) -> Result<String> {
    let contexts_url = format!("{}{}", base, CONTEXTS_PATH);
    post.retry("post context", || {
        let request = client
            .post(&contexts_url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.clone());
        let contexts_url = contexts_url.clone();
        async move {
            let response = request.send().await?;
            let status = response.status();
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            match location {
                Some(location) if status.is_success() => {
                    parse_location(&contexts_url, &location)
                }
                _ => Err(Error::Upstream {
                    status: status.as_u16(),
                    message: format!("failed to POST context to {}", contexts_url),
                }),
            }
        }
    })
    .await
}

fn parse_location(contexts_url: &str, location: &str) -> Result<String> {
    let marker = format!("{}/", CONTEXTS_PATH);
    let index = location
        .rfind(&marker)
        .ok_or_else(|| Error::Serialization(format!("unexpected context location {}", location)))?;
    Ok(format!("{}/{}", contexts_url, &location[index + marker.len()..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_parse_location() {
        let url = parse_location(
            "http://broker/ngsi-ld/v1/jsonldContexts",
            "/ngsi-ld/v1/jsonldContexts/abc-123",
        )
        .unwrap();
        assert_eq!(url, "http://broker/ngsi-ld/v1/jsonldContexts/abc-123");
        assert!(parse_location("http://b/jsonldContexts", "/elsewhere/1").is_err());
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);
        let backoff = Backoff::new(5, Duration::from_millis(1));
        let value = backoff
            .retry("op", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::Transport("down".into()))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let backoff = Backoff::new(3, Duration::from_millis(1));
        let result: Result<()> = backoff
            .retry("op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Transport("down".into()))
            })
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_sources_means_empty_context() {
        let retrieved = retrieve_context(&ContextSources::default(), &Client::new())
            .await
            .unwrap();
        assert!(retrieved.context.is_empty());
        assert!(retrieved.broker_url.is_none());
    }
}
