#![doc = include_str!("../README.md")]
//! # NGSI-LD GraphQL gateway
//!
//! Generates a GraphQL query surface from JSON type definitions at startup
//! and resolves queries against an NGSI-LD broker or a tabular twin store.
//!
//! ## Features
//!
//! - **Generated schema**: one object type per definition, with singular and
//!   plural accessors
//! - **Relationships**: forward references are dereferenced, reverse fields
//!   list the entities pointing at an entity
//! - **Filters**: generated per type, nested through relationships up to a
//!   configurable depth
//! - **Pagination**: adaptive upstream batches so filtered queries still
//!   return full pages
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    NGSI-LD GraphQL gateway                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │  loader ──► schema::SchemaCompiler ──► dynamic Schema        │
//! │                 │         │                 │                │
//! │     RelationshipIndex  FilterFactory   field resolvers       │
//! │                                             │                │
//! │                        ┌────────────────────┴──────┐         │
//! │                        │  dyn Resolution           │         │
//! │                        │  + RequestContext cache   │         │
//! │                        └─────┬───────────────┬─────┘         │
//! │                     BrokerResolution   TwinResolution        │
//! │                          │                   │               │
//! │                     NGSI-LD broker      twin records-get     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ngsild_graphql::prelude::*;
//!
//! let broker = HttpBroker::new(BrokerConfig::default())?;
//! let resolution = Arc::new(BrokerResolution::new(
//!     Arc::new(broker),
//!     &hierarchy,
//!     LdContext::empty(),
//! ));
//! let compiled = SchemaCompiler::default().compile(&documents, &hierarchy, resolution)?;
//! GatewayServer::new(ServerConfig::default(), compiled.schema).run().await?;
//! ```
//!
//! ## Query Examples
//!
//! ```graphql
//! query {
//!   Rooms(limit: 5, filter: { name: { startsWith: "K" }, partOf: { exists: true } }) {
//!     id
//!     name
//!     partOf { id height }
//!   }
//! }
//! ```

pub mod conditions;
pub mod config;
pub mod entity;
pub mod error;
pub mod ld_context;
pub mod loader;
pub mod resolution;
pub mod schema;
pub mod server;

pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use schema::{CompiledSchema, SchemaCompiler, SchemaOptions};
pub use server::{GatewayServer, ServerConfig};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::conditions::FilterCondition;
    pub use crate::config::{GatewayConfig, ResolutionMethod};
    pub use crate::entity::Entity;
    pub use crate::error::{Error, Result};
    pub use crate::ld_context::LdContext;
    pub use crate::loader::{load_definitions, LoadedDefinitions, LoaderOptions};
    pub use crate::resolution::{
        BrokerConfig, BrokerResolution, FindOptions, HttpBroker, HttpTwin, RequestContext,
        Resolution, TwinResolution,
    };
    pub use crate::schema::{CompiledSchema, SchemaCompiler, SchemaOptions, TypeHierarchy};
    pub use crate::server::{GatewayServer, ServerConfig};
}
