//! The HTTP server exposing the compiled schema.

use std::net::SocketAddr;
use std::time::Duration;

use async_graphql::dynamic::Schema;
use async_graphql::http::GraphiQLSource;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{GatewayConfig, CORS_ANY_ORIGIN};
use crate::error::{Error, Result};
use crate::resolution::RequestContext;

/// Path of the GraphQL endpoint.
pub const GRAPHQL_PATH: &str = "/graphql";

/// Configuration for the [`GatewayServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The host address to bind the server to.
    pub host: String,
    /// The port to listen on.
    pub port: u16,
    /// If `true`, GraphiQL is served on `GET /graphql`.
    pub graphiql: bool,
    /// Allowed CORS origin. `None` disables CORS, `__ALL` allows any origin.
    pub cors_origin: Option<String>,
    pub cors_max_age: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4000,
            graphiql: true,
            cors_origin: None,
            cors_max_age: Duration::from_secs(86_400),
        }
    }
}

impl ServerConfig {
    pub fn from_gateway(config: &GatewayConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            graphiql: config.show_graphiql,
            cors_origin: config.cors_origin.clone().filter(|o| !o.is_empty()),
            cors_max_age: Duration::from_secs(config.cors_max_age),
        }
    }

    /// Sets the port for the server to listen on.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the host address for the server.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    fn cors_layer(&self) -> Option<CorsLayer> {
        let origin = self.cors_origin.as_deref()?;
        let allow_origin = if origin == CORS_ANY_ORIGIN {
            AllowOrigin::from(Any)
        } else {
            match HeaderValue::from_str(origin) {
                Ok(value) => AllowOrigin::exact(value),
                Err(e) => {
                    warn!(origin, error = %e, "invalid CORS origin, CORS disabled");
                    return None;
                }
            }
        };
        Some(
            CorsLayer::new()
                .allow_origin(allow_origin)
                .allow_methods(Any)
                .allow_headers(Any)
                .max_age(self.cors_max_age),
        )
    }
}

/// Shared state of the request handlers.
#[derive(Clone)]
pub struct AppState {
    pub schema: Schema,
}

/// The gateway HTTP server.
pub struct GatewayServer {
    config: ServerConfig,
    state: AppState,
}

impl GatewayServer {
    pub fn new(config: ServerConfig, schema: Schema) -> Self {
        Self {
            config,
            state: AppState { schema },
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Builds the `axum` router with its middleware.
    pub fn build_router(&self) -> Router {
        let graphql = if self.config.graphiql {
            get(graphiql).post(graphql_handler)
        } else {
            axum::routing::post(graphql_handler)
        };
        let app = Router::new()
            .route(GRAPHQL_PATH, graphql)
            .route("/health", get(health))
            .with_state(self.state.clone());

        let app = match self.config.cors_layer() {
            Some(cors) => app.layer(cors),
            None => app,
        };
        app.layer(TraceLayer::new_for_http())
    }

    fn address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))
    }

    /// Runs the server indefinitely.
    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Runs the server until `shutdown_signal` completes.
    pub async fn run_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = self.address()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown_signal).await
    }

    /// Serves on an already bound listener.
    pub async fn serve<F>(self, listener: TcpListener, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        let router = self.build_router();
        info!("Running a GraphQL API server at http://{}{}", addr, GRAPHQL_PATH);
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await?;
        info!("GraphQL API server stopped");
        Ok(())
    }
}

/// Executes one query with its own [`RequestContext`]. The context is
/// cancelled when the handler future is dropped.
async fn graphql_handler(State(state): State<AppState>, req: GraphQLRequest) -> GraphQLResponse {
    let token = CancellationToken::new();
    let _cancel_on_drop = token.clone().drop_guard();
    let request = req
        .into_inner()
        .data(RequestContext::with_cancellation(token));
    state.schema.execute(request).await.into()
}

async fn graphiql() -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint(GRAPHQL_PATH).finish())
}

async fn health() -> &'static str {
    "ok"
}
