//! Gateway configuration.
//!
//! Every option has a command-line flag and an environment variable, so the
//! service can be configured purely through its environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, ValueEnum};
use indexmap::IndexMap;
use tracing::warn;

use crate::ld_context::ContextSources;
use crate::resolution::broker::BrokerConfig;
use crate::schema::{RelationshipOptions, SchemaOptions, DEFAULT_FILTER_NESTING_LEVEL};

/// Context URL announced to the broker when no context is configured.
pub const DEFAULT_CONTEXT_URL_BROKER: &str = "http://context/ngsi-context.jsonld";

/// CORS origin value that allows any origin.
pub const CORS_ANY_ORIGIN: &str = "__ALL";

/// The upstream store entities are resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResolutionMethod {
    /// An NGSI-LD broker.
    #[value(alias = "fiware")]
    Broker,
    /// A tabular twin store.
    #[value(alias = "capri")]
    Twin,
}

/// NGSI-LD GraphQL gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "ngsild-graphql")]
#[command(version)]
#[command(about = "GraphQL API over an NGSI-LD broker, generated from JSON type definitions", long_about = None)]
pub struct GatewayConfig {
    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 4000)]
    pub port: u16,

    /// Broker root URL, without the `/ngsi-ld/v1` suffix
    #[arg(long, env = "NGSI_BASE_URL", default_value = "http://localhost:1026")]
    pub ngsi_base_url: String,

    /// Upstream store to resolve entities against
    #[arg(long, env = "RESOLUTION_METHOD", value_enum, ignore_case = true, default_value = "broker")]
    pub resolution_method: ResolutionMethod,

    /// Twin store API root
    #[arg(long, env = "CAPRI_TWIN_API_URL", default_value = "http://localhost:3002/api")]
    pub twin_api_url: String,

    /// Folder containing the JSON type definitions
    #[arg(long, env = "BASE_FOLDER", default_value = "../model")]
    pub base_folder: PathBuf,

    /// Definition file names to ignore
    #[arg(long, env = "FILTERED_FILE_NAMES", value_delimiter = ',', default_value = "sample")]
    pub filtered_file_names: Vec<String>,

    /// Folder names to ignore
    #[arg(long, env = "FILTERED_FOLDER_NAMES", value_delimiter = ',')]
    pub filtered_folder_names: Vec<String>,

    /// Request the simplified NGSI-LD representation
    #[arg(long, env = "SIMPLIFIED_REPRESENTATION", action = ArgAction::Set, value_parser = BoolishValueParser::new(), default_value = "false")]
    pub simplified_representation: bool,

    /// Maximum nesting depth of generated object filters
    #[arg(long, env = "FILTER_NESTING_LEVEL", default_value_t = DEFAULT_FILTER_NESTING_LEVEL)]
    pub filter_nesting_level: usize,

    /// Do not generate reverse relationship fields
    #[arg(long, env = "REVERSE_RELATIONSHIPS_DISABLED", action = ArgAction::Set, value_parser = BoolishValueParser::new(), default_value = "false")]
    pub reverse_relationships_disabled: bool,

    /// Reverse field names as `field=newName` pairs
    #[arg(long, env = "REVERSE_RELATIONSHIPS_MAP", value_delimiter = ',')]
    pub reverse_relationships_map: Vec<String>,

    /// Only reverse these fields
    #[arg(long, env = "ENABLED_REVERSE_RELATIONSHIPS", value_delimiter = ',')]
    pub enabled_reverse_relationships: Vec<String>,

    /// Never reverse these fields
    #[arg(long, env = "DISABLED_REVERSE_RELATIONSHIPS", value_delimiter = ',')]
    pub disabled_reverse_relationships: Vec<String>,

    /// Run without a JSON-LD context
    #[arg(long, env = "CONTEXT_DISABLED", action = ArgAction::Set, value_parser = BoolishValueParser::new(), default_value = "false")]
    pub context_disabled: bool,

    /// URL this service downloads the context from
    #[arg(long, env = "CONTEXT_URL")]
    pub context_url: Option<String>,

    /// URL the broker resolves the context from
    #[arg(long, env = "CONTEXT_URL_BROKER")]
    pub context_url_broker: Option<String>,

    /// Serve GraphiQL on `GET /graphql`
    #[arg(long, env = "SHOW_GRAPHIQL", action = ArgAction::Set, value_parser = BoolishValueParser::new(), default_value = "true")]
    pub show_graphiql: bool,

    /// Allowed CORS origin; `__ALL` allows any
    #[arg(long, env = "CORS_ORIGIN")]
    pub cors_origin: Option<String>,

    /// CORS preflight max age in seconds
    #[arg(long, env = "CORS_MAX_AGE", default_value_t = 86_400)]
    pub cors_max_age: u64,

    /// Timeout of upstream requests in milliseconds
    #[arg(long, env = "UPSTREAM_TIMEOUT_MS", default_value_t = 30_000)]
    pub upstream_timeout_ms: u64,
}

fn trim_slashes(url: &str) -> &str {
    url.trim_end_matches('/')
}

fn non_empty(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl GatewayConfig {
    /// The broker's NGSI-LD API root.
    pub fn ngsi_api_url(&self) -> String {
        format!("{}/ngsi-ld/v1", trim_slashes(&self.ngsi_base_url))
    }

    pub fn twin_api_url(&self) -> &str {
        trim_slashes(&self.twin_api_url)
    }

    /// Ignored definition file stems, `.json` suffixes removed.
    pub fn filtered_file_names(&self) -> Vec<String> {
        non_empty(&self.filtered_file_names)
            .into_iter()
            .map(|name| {
                if name.to_ascii_lowercase().ends_with(".json") {
                    name[..name.len() - 5].to_string()
                } else {
                    name
                }
            })
            .filter(|name| !name.is_empty())
            .collect()
    }

    pub fn filtered_folder_names(&self) -> Vec<String> {
        non_empty(&self.filtered_folder_names)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn relationship_options(&self) -> RelationshipOptions {
        let mut renamed = IndexMap::new();
        for pair in non_empty(&self.reverse_relationships_map) {
            match pair.split_once('=') {
                Some((field, name)) if !field.trim().is_empty() && !name.trim().is_empty() => {
                    renamed.insert(field.trim().to_string(), name.trim().to_string());
                }
                _ => warn!(entry = %pair, "ignoring malformed reverse relationship mapping"),
            }
        }
        RelationshipOptions {
            enabled: non_empty(&self.enabled_reverse_relationships),
            disabled: non_empty(&self.disabled_reverse_relationships),
            renamed,
        }
    }

    pub fn schema_options(&self) -> SchemaOptions {
        SchemaOptions {
            filter_nesting_level: self.filter_nesting_level,
            reverse_relationships: !self.reverse_relationships_disabled,
            relationships: self.relationship_options(),
        }
    }

    /// Where to take the JSON-LD context from. Without any configured URL
    /// the broker is pointed at [`DEFAULT_CONTEXT_URL_BROKER`].
    pub fn context_sources(&self) -> ContextSources {
        let mut sources = ContextSources {
            ngsi_base_url: self.ngsi_api_url(),
            ..Default::default()
        };
        if self.context_disabled {
            return sources;
        }
        sources.internal_url = self.context_url.clone().filter(|u| !u.is_empty());
        sources.broker_url = self.context_url_broker.clone().filter(|u| !u.is_empty());
        if sources.internal_url.is_none() && sources.broker_url.is_none() {
            sources.broker_url = Some(DEFAULT_CONTEXT_URL_BROKER.to_string());
        }
        sources
    }

    /// Broker client settings; `context_url` is what the broker sees in the
    /// `Link` header.
    pub fn broker_config(&self, context_url: Option<String>) -> BrokerConfig {
        BrokerConfig {
            base_url: self.ngsi_api_url(),
            simplified: self.simplified_representation,
            context_url,
            timeout: self.upstream_timeout(),
        }
    }
}
