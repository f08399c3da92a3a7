//! NGSI-LD GraphQL gateway
//!
//! Compiles the type definitions found in `BASE_FOLDER` into a GraphQL schema
//! and serves it on `/graphql`.

use std::sync::Arc;

use clap::Parser;
use ngsild_graphql::config::{GatewayConfig, ResolutionMethod};
use ngsild_graphql::ld_context::retrieve_context;
use ngsild_graphql::loader::{load_definitions, LoaderOptions};
use ngsild_graphql::resolution::{BrokerResolution, HttpBroker, HttpTwin, Resolution, TwinResolution};
use ngsild_graphql::schema::{SchemaCompiler, TypeHierarchy};
use ngsild_graphql::server::{GatewayServer, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ngsild_graphql=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::parse();

    let loaded = load_definitions(&LoaderOptions {
        base_folder: config.base_folder.clone(),
        filtered_file_names: config.filtered_file_names(),
        filtered_folder_names: config.filtered_folder_names(),
    })?;

    let resolution = resolution(&config, &loaded.hierarchy).await?;
    let backend = resolution.name();

    let compiled = SchemaCompiler::new(config.schema_options()).compile(
        &loaded.documents,
        &loaded.hierarchy,
        resolution,
    )?;
    tracing::info!("Base types: {}", compiled.base_types.join(", "));
    tracing::info!("Resolution: {}", backend);

    let server = GatewayServer::new(ServerConfig::from_gateway(&config), compiled.schema);

    // Set up graceful shutdown
    let shutdown_signal = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await
            }
        }
    };

    server.run_with_shutdown(shutdown_signal).await?;

    Ok(())
}

async fn resolution(
    config: &GatewayConfig,
    hierarchy: &TypeHierarchy,
) -> ngsild_graphql::Result<Arc<dyn Resolution>> {
    match config.resolution_method {
        ResolutionMethod::Broker => {
            let client = reqwest::Client::builder()
                .timeout(config.upstream_timeout())
                .build()?;
            let retrieved = retrieve_context(&config.context_sources(), &client).await?;
            let broker = HttpBroker::new(config.broker_config(retrieved.broker_url))?;
            Ok(Arc::new(BrokerResolution::new(
                Arc::new(broker),
                hierarchy,
                retrieved.context,
            )))
        }
        ResolutionMethod::Twin => {
            let twin = HttpTwin::new(config.twin_api_url(), config.upstream_timeout())?;
            Ok(Arc::new(TwinResolution::new(Arc::new(twin))))
        }
    }
}
