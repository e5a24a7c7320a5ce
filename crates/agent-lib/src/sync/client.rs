//! gRPC client for the topology sync service
//!
//! This module provides a client that:
//! - Delivers report batches over a shared channel
//! - Optionally authenticates with mTLS and picks up rotated certificates
//! - Tracks connection failures with exponential backoff

use super::reporter::{ReportBatch, ReportResponse, Reporter};
use crate::error::ReportError;
use crate::metadata::AgentMetadata;
use crate::proto::{ReportRequest, TopologySyncServiceClient};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};
use tracing::{debug, info, warn};

/// Certificate material for mTLS
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub ca_cert_path: PathBuf,
    pub client_cert_path: PathBuf,
    pub client_key_path: PathBuf,
}

/// Configuration for the gRPC client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Control plane endpoint (e.g., "http://topology-server:9090")
    pub endpoint: String,
    /// mTLS material; plaintext when unset
    pub tls: Option<TlsPaths>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://topology-server:9090".to_string(),
            tls: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
struct ConnectionState {
    connected: bool,
    last_error: Option<String>,
    reconnect_attempts: u32,
    current_backoff: Duration,
    /// No connection attempts before this instant
    retry_at: Option<Instant>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            connected: false,
            last_error: None,
            reconnect_attempts: 0,
            current_backoff: Duration::from_secs(1),
            retry_at: None,
        }
    }
}

struct TlsState {
    config: ClientTlsConfig,
    cert_modified_time: std::time::SystemTime,
}

/// Report transport to the topology sync service
pub struct SyncClient {
    config: ClientConfig,
    agent_id: String,
    node_name: String,
    metadata: AgentMetadata,
    channel: Arc<RwLock<Option<Channel>>>,
    connection_state: Arc<RwLock<ConnectionState>>,
    tls_state: Arc<RwLock<Option<TlsState>>>,
}

impl SyncClient {
    pub fn new(
        config: ClientConfig,
        agent_id: String,
        node_name: String,
        metadata: AgentMetadata,
    ) -> Self {
        let connection_state = ConnectionState {
            current_backoff: config.initial_backoff,
            ..Default::default()
        };
        Self {
            config,
            agent_id,
            node_name,
            metadata,
            channel: Arc::new(RwLock::new(None)),
            connection_state: Arc::new(RwLock::new(connection_state)),
            tls_state: Arc::new(RwLock::new(None)),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn load_tls_config(&self, paths: &TlsPaths) -> Result<ClientTlsConfig> {
        let ca_cert = tokio::fs::read(&paths.ca_cert_path)
            .await
            .with_context(|| format!("Failed to read CA certificate from {:?}", paths.ca_cert_path))?;
        let client_cert = tokio::fs::read(&paths.client_cert_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to read client certificate from {:?}",
                    paths.client_cert_path
                )
            })?;
        let client_key = tokio::fs::read(&paths.client_key_path)
            .await
            .with_context(|| format!("Failed to read client key from {:?}", paths.client_key_path))?;

        Ok(ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(ca_cert))
            .identity(Identity::from_pem(client_cert, client_key))
            .domain_name(self.extract_domain()?))
    }

    fn extract_domain(&self) -> Result<String> {
        let url = url::Url::parse(&self.config.endpoint)
            .with_context(|| format!("Invalid endpoint URL: {}", self.config.endpoint))?;
        url.host_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("No host in endpoint URL"))
    }

    /// Reload certificates when the client certificate changed on disk
    async fn refresh_tls_if_needed(&self, paths: &TlsPaths) -> Result<()> {
        let modified = tokio::fs::metadata(&paths.client_cert_path)
            .await?
            .modified()?;

        let rotated = match self.tls_state.read().await.as_ref() {
            Some(state) => modified > state.cert_modified_time,
            None => true,
        };
        if !rotated {
            return Ok(());
        }

        info!("Certificate rotation detected, refreshing TLS configuration");
        let config = self.load_tls_config(paths).await?;
        *self.tls_state.write().await = Some(TlsState {
            config,
            cert_modified_time: modified,
        });
        // Reconnect with the new certificates
        *self.channel.write().await = None;
        Ok(())
    }

    async fn create_channel(&self) -> Result<Channel> {
        let mut endpoint = Channel::from_shared(self.config.endpoint.clone())?;

        if self.config.tls.is_some() {
            let tls_config = self
                .tls_state
                .read()
                .await
                .as_ref()
                .map(|s| s.config.clone())
                .ok_or_else(|| anyhow::anyhow!("TLS configuration not loaded"))?;
            endpoint = endpoint.tls_config(tls_config)?;
        }

        let channel = endpoint
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .http2_keep_alive_interval(self.config.keepalive_interval)
            .keep_alive_timeout(self.config.keepalive_timeout)
            .keep_alive_while_idle(true)
            .connect()
            .await
            .with_context(|| format!("Failed to connect to {}", self.config.endpoint))?;

        Ok(channel)
    }

    async fn get_channel(&self) -> Result<Channel> {
        if let Some(paths) = &self.config.tls {
            self.refresh_tls_if_needed(paths).await?;
        }

        if let Some(channel) = self.channel.read().await.as_ref() {
            return Ok(channel.clone());
        }

        let new_channel = self.create_channel().await?;
        *self.channel.write().await = Some(new_channel.clone());

        let mut state = self.connection_state.write().await;
        state.connected = true;
        state.reconnect_attempts = 0;
        state.current_backoff = self.config.initial_backoff;
        state.last_error = None;
        state.retry_at = None;

        info!(endpoint = %self.config.endpoint, "Connected to topology sync service");
        Ok(new_channel)
    }

    async fn handle_connection_failure(&self, error: &str) {
        let mut state = self.connection_state.write().await;
        state.connected = false;
        state.last_error = Some(error.to_string());
        state.reconnect_attempts += 1;
        state.retry_at = Some(Instant::now() + state.current_backoff);
        state.current_backoff = std::cmp::min(state.current_backoff * 2, self.config.max_backoff);

        *self.channel.write().await = None;

        warn!(
            error = %error,
            attempts = state.reconnect_attempts,
            next_backoff_secs = state.current_backoff.as_secs(),
            "Connection to topology sync service failed"
        );
    }

    /// Time left before the next connection attempt is allowed
    async fn backoff_remaining(&self) -> Option<Duration> {
        let retry_at = self.connection_state.read().await.retry_at?;
        let remaining = retry_at.saturating_duration_since(Instant::now());
        (!remaining.is_zero()).then_some(remaining)
    }

    async fn build_request(&self, batch: ReportBatch) -> ReportRequest {
        ReportRequest {
            agent_id: self.agent_id.clone(),
            node_name: self.node_name.clone(),
            cluster_id: self.metadata.cluster_id().await,
            handler: batch.kind.handler().to_string(),
            resource: batch.kind.resource_name().to_string(),
            payload: batch.payload,
            exists: batch.exists,
            size: u32::try_from(batch.size).unwrap_or(u32::MAX),
            timestamp: Some(prost_types::Timestamp {
                seconds: chrono::Utc::now().timestamp(),
                nanos: 0,
            }),
        }
    }
}

/// Decode the JSON acknowledgement carried in a response
fn decode_response(
    batch_kind: crate::models::ResourceKind,
    response: crate::proto::ReportResponse,
) -> Result<ReportResponse, ReportError> {
    let result = if response.result.trim().is_empty() {
        None
    } else {
        Some(
            serde_json::from_str(&response.result).map_err(|e| ReportError::MalformedAck {
                kind: batch_kind,
                reason: e.to_string(),
            })?,
        )
    };
    Ok(ReportResponse {
        success: response.success,
        code: response.code,
        error: response.error,
        result,
    })
}

#[async_trait]
impl Reporter for SyncClient {
    async fn report(&self, batch: ReportBatch) -> Result<ReportResponse, ReportError> {
        if self.channel.read().await.is_none() {
            if let Some(wait) = self.backoff_remaining().await {
                return Err(ReportError::Transport(format!(
                    "control plane unreachable, retrying in {}ms",
                    wait.as_millis()
                )));
            }
        }

        let channel = match self.get_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                self.handle_connection_failure(&e.to_string()).await;
                return Err(ReportError::Transport(e.to_string()));
            }
        };

        let kind = batch.kind;
        let request = self.build_request(batch).await;
        let mut client = TopologySyncServiceClient::new(channel);

        match client.report(tonic::Request::new(request)).await {
            Ok(response) => {
                debug!(kind = %kind, "Report delivered");
                decode_response(kind, response.into_inner())
            }
            Err(status) => {
                self.handle_connection_failure(&status.to_string()).await;
                Err(status.into())
            }
        }
    }
}

/// Builder for SyncClient configuration
pub struct SyncClientBuilder {
    config: ClientConfig,
    agent_id: Option<String>,
    node_name: Option<String>,
    metadata: AgentMetadata,
}

impl SyncClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            agent_id: None,
            node_name: None,
            metadata: AgentMetadata::default(),
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    pub fn tls(mut self, paths: TlsPaths) -> Self {
        self.config.tls = Some(paths);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.config.initial_backoff = backoff;
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.config.max_backoff = backoff;
        self
    }

    pub fn agent_id(mut self, id: impl Into<String>) -> Self {
        self.agent_id = Some(id.into());
        self
    }

    pub fn node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = Some(name.into());
        self
    }

    pub fn metadata(mut self, metadata: AgentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn build(self) -> Result<SyncClient> {
        let agent_id = self
            .agent_id
            .ok_or_else(|| anyhow::anyhow!("agent_id is required"))?;
        let node_name = self
            .node_name
            .ok_or_else(|| anyhow::anyhow!("node_name is required"))?;

        Ok(SyncClient::new(self.config, agent_id, node_name, self.metadata))
    }
}

impl Default for SyncClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
