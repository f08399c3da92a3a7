//! Term expansion and compaction for a JSON-LD `@context` object.

use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Reserved keys never treated as terms.
const RESERVED: [&str; 4] = ["@id", "@type", "id", "type"];

/// A parsed `@context`: namespace prefixes plus term → IRI mappings.
///
/// The default value is the empty context, which maps every term to itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LdContext {
    raw: Map<String, Value>,
    namespaces: IndexMap<String, String>,
    terms: IndexMap<String, String>,
}

fn is_iri(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://") || lower.starts_with("file://")
}

impl LdContext {
    /// The identity context.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the content of an `@context` object.
    ///
    /// A string value that is an IRI ending in `/` or `#` declares a namespace
    /// prefix. Every other entry declares a term, either as a string or as an
    /// object with `@id` (or `id`); compact IRIs like `schema:name` are
    /// expanded through the declared prefixes.
    pub fn from_json(context: &Map<String, Value>) -> Self {
        let namespaces: IndexMap<String, String> = context
            .iter()
            .filter_map(|(key, value)| {
                let iri = value.as_str()?;
                (is_iri(iri) && (iri.ends_with('/') || iri.ends_with('#')))
                    .then(|| (key.clone(), iri.to_string()))
            })
            .collect();

        let mut terms = IndexMap::new();
        for (key, value) in context {
            if RESERVED.contains(&key.as_str()) || namespaces.contains_key(key) {
                continue;
            }
            let target = match value {
                Value::String(s) => Some(s.as_str()),
                Value::Object(o) => o
                    .get("@id")
                    .or_else(|| o.get("id"))
                    .and_then(Value::as_str),
                _ => None,
            };
            let Some(target) = target.filter(|t| !t.is_empty()) else {
                continue;
            };
            terms.insert(key.clone(), expand_compact(&namespaces, target));
        }

        Self {
            raw: context.clone(),
            namespaces,
            terms,
        }
    }

    /// Parse a whole JSON-LD document, reading its `@context` member.
    ///
    /// Anything that is not an object with an object-valued `@context` yields
    /// the empty context.
    pub fn from_document(document: &Value) -> Self {
        document
            .get("@context")
            .and_then(Value::as_object)
            .map(Self::from_json)
            .unwrap_or_default()
    }

    /// The IRI for a short term, or the term itself when unknown.
    pub fn expand<'a>(&'a self, short: &'a str) -> &'a str {
        self.terms.get(short).map_or(short, String::as_str)
    }

    /// The first term mapping to `expanded`, or `expanded` itself.
    pub fn shorten<'a>(&'a self, expanded: &'a str) -> &'a str {
        self.terms
            .iter()
            .find(|(_, iri)| iri.as_str() == expanded)
            .map_or(expanded, |(term, _)| term.as_str())
    }

    /// `true` when no term is declared.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Number of declared terms.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// The declared namespace prefixes.
    pub fn namespaces(&self) -> &IndexMap<String, String> {
        &self.namespaces
    }

    /// The context object as parsed.
    pub fn json(&self) -> &Map<String, Value> {
        &self.raw
    }
}

fn expand_compact(namespaces: &IndexMap<String, String>, value: &str) -> String {
    if is_iri(value) {
        return value.to_string();
    }
    match value.split_once(':') {
        Some((prefix, rest)) if !prefix.is_empty() => match namespaces.get(prefix) {
            Some(ns) => format!("{}{}", ns, rest),
            None => value.to_string(),
        },
        _ => value.to_string(),
    }
}
