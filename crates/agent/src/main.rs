//! Cluster agent - Kubernetes topology synchronization
//!
//! Watches cluster resources and reports incremental topology snapshots
//! to the control plane.

use agent_lib::{
    build_collectors,
    health::{components, HealthRegistry},
    observability::{AgentMetrics, StructuredLogger},
    source::KubeChannel,
    sync::SyncClientBuilder,
    AgentMetadata, CollectorContext, SyncLoopBuilder,
};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cluster-agent");

    let config = config::AgentConfig::load()?;
    let kinds = config.resource_kinds();
    info!(node_name = %config.node_name, kinds = kinds.len(), "Agent configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::WATCH_SOURCE).await;
    health_registry.register(components::REPORTER).await;
    health_registry.register(components::SCHEDULER).await;

    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(AGENT_VERSION, &kinds);

    let shutdown = CancellationToken::new();

    let channel = KubeChannel::connect(shutdown.clone()).await;
    if !channel.is_enabled() {
        health_registry
            .set_unhealthy(components::WATCH_SOURCE, "No Kubernetes client")
            .await;
    }

    let metadata = AgentMetadata::new(config.cluster_id.clone(), config.cluster_name.clone());
    metadata
        .set_cluster_id_if_not_present(&channel.default_cluster_id())
        .await;
    info!(cluster_id = %metadata.cluster_id().await, "Cluster identity resolved");

    let mut client = SyncClientBuilder::new()
        .endpoint(config.api_endpoint.clone())
        .agent_id(config.agent_id.clone())
        .node_name(config.node_name.clone())
        .metadata(metadata.clone());
    if let Some(tls) = config.tls_paths() {
        client = client.tls(tls);
    }
    let client = client.build()?;
    info!(endpoint = %client.endpoint(), agent_id = %client.agent_id(), "Report client configured");
    let client = Arc::new(client);

    let ctx = CollectorContext {
        channel,
        reporter: client,
        metrics,
        metadata,
        namespaces: config.namespace_list(),
        agent_service_name: config.agent_service_name.clone(),
        virtual_node_selector: config.virtual_node_selector.clone(),
    };

    let sync_loop = SyncLoopBuilder::new()
        .collectors(build_collectors(&ctx, &kinds))
        .interval(config.report_interval())
        .health(health_registry.clone())
        .logger(logger.clone())
        .build()?;

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), sync_loop.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));
    let sync_handle = tokio::spawn(sync_loop.run(shutdown.clone()));

    health_registry.set_ready(true).await;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Err(e)) => warn!(error = %e, "API server stopped"),
                Err(e) => warn!(error = %e, "API server task failed"),
                Ok(Ok(())) => {}
            }
            logger.log_shutdown("API server stopped");
        }
    }

    shutdown.cancel();
    if let Err(e) = sync_handle.await {
        warn!(error = %e, "Sync loop task failed");
    }
    info!("Shutting down");

    Ok(())
}
