//! JSON-LD `@context` handling.
//!
//! The broker addresses types by their expanded IRIs while queries use the
//! short terms declared in the context. [`LdContext`] maps between the two;
//! [`retrieve_context`] obtains the context document at startup.

mod retrieval;
mod terms;

pub use retrieval::{retrieve_context, Backoff, ContextSources, RetrievedContext};
pub use terms::LdContext;

/// `Link` header value pointing the broker at a context document.
pub fn link_header(context_url: &str) -> String {
    format!(
        "<{}>; rel=\"http://www.w3.org/ns/json-ld#context\"; type=\"application/ld+json\"",
        context_url
    )
}

/// The context URLs listed in a `Link` header.
pub fn parse_link_header(header: &str) -> Vec<String> {
    header
        .split(',')
        .map(|link| {
            let target = link.split(';').next().unwrap_or_default().trim();
            target
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        })
        .filter(|link| !link.is_empty())
        .collect()
}
