use crate::{
    alloy_client::AlloyConnector,
    client::ChainClient,
    config::{EndpointRegistry, RpcConfig},
    error::{ChainError, Result},
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::{sync::OnceCell, time::timeout};
use tracing::{error, info, instrument, warn};

/// Turns an endpoint URL into a client. Connecting must not touch the network;
/// liveness is decided by the factory's health check.
#[async_trait]
pub trait EndpointConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn ChainClient>>;
}

pub struct ClientFactory {
    registry: EndpointRegistry,
    connector: Arc<dyn EndpointConnector>,
    health_check_timeout: Duration,
}

impl ClientFactory {
    pub fn new(
        registry: EndpointRegistry,
        connector: Arc<dyn EndpointConnector>,
        health_check_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            connector,
            health_check_timeout,
        }
    }

    pub fn alloy(registry: EndpointRegistry, config: &RpcConfig) -> Self {
        Self::new(
            registry,
            Arc::new(AlloyConnector::new(config.request_timeout())),
            config.health_check_timeout(),
        )
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Returns a client for the first candidate endpoint that answers
    /// `eth_chainId` in time (and with `chain_id`, when one is given).
    #[instrument(skip(self))]
    pub async fn create_robust_client(
        &self,
        chain_id: Option<u64>,
    ) -> Result<Arc<dyn ChainClient>> {
        let candidates = self.registry.candidates(chain_id)?;
        let mut attempts = Vec::with_capacity(candidates.len());

        for url in candidates {
            match self.check_endpoint(url, chain_id).await {
                Ok((client, reported)) => {
                    info!(url, chain_id = reported, "Connected to rpc endpoint");
                    return Ok(client);
                }
                Err(e) => {
                    warn!(url, error = %e, "Rpc endpoint failed health check");
                    attempts.push((url.clone(), e.to_string()));
                }
            }
        }

        error!(attempted = attempts.len(), "No rpc endpoint is reachable");
        Err(ChainError::AllEndpointsFailed { attempts })
    }

    async fn check_endpoint(
        &self,
        url: &str,
        expected: Option<u64>,
    ) -> Result<(Arc<dyn ChainClient>, u64)> {
        let client = self.connector.connect(url).await?;
        let reported = timeout(self.health_check_timeout, client.chain_id())
            .await
            .map_err(|_| ChainError::Timeout(self.health_check_timeout))??;

        if let Some(expected) = expected {
            if reported != expected {
                return Err(ChainError::Transport(format!(
                    "endpoint serves chain {reported}, expected {expected}"
                )));
            }
        }
        Ok((client, reported))
    }
}

/// One lazily checked client shared by everything built on top of it.
/// Concurrent first callers wait on the same check; a failed check is not
/// remembered, so the next call starts over.
pub struct SharedChainClient {
    factory: ClientFactory,
    chain_id: Option<u64>,
    client: OnceCell<Arc<dyn ChainClient>>,
}

impl SharedChainClient {
    pub fn new(factory: ClientFactory, chain_id: Option<u64>) -> Self {
        Self {
            factory,
            chain_id,
            client: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<Arc<dyn ChainClient>> {
        self.client
            .get_or_try_init(|| self.factory.create_robust_client(self.chain_id))
            .await
            .cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.client.initialized()
    }
}
