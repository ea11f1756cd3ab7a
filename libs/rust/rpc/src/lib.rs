pub mod alloy_client;
pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod multicall;
pub mod pagination;
pub mod pool;
pub mod rate_limiter;
pub mod retry;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use alloy_client::{AlloyChainClient, AlloyConnector};
pub use client::{
    BlockInfo, CallOutcome, ChainClient, ContractCall, EventFilter, LogEntry, TransactionInfo,
};
pub use config::{EndpointRegistry, PriorityWorkers, RpcConfig};
pub use error::{ChainError, ConfigError, Result};
pub use factory::{ClientFactory, EndpointConnector, SharedChainClient};
pub use multicall::{MULTICALL3_ADDRESS, MulticallBatcher};
pub use pagination::{
    BatchLoaded, LoadOutcome, LoadPhase, PaginationController, PaginationState, RangeSource,
};
pub use pool::{
    PendingResponse, PoolStatus, Priority, ProgressState, ProgressSubscription, WorkerPool,
};
pub use rate_limiter::RateLimiter;
pub use retry::RetryExecutor;
pub use watcher::{WatchHandle, watch_contract_event, watch_contract_event_from};

use std::sync::Arc;

/// Everything a feature needs to issue scheduled reads against one chain.
#[derive(Clone)]
pub struct RpcStack {
    pub client: Arc<dyn ChainClient>,
    pub pool: Arc<WorkerPool>,
    pub retry: Arc<RetryExecutor>,
    pub batcher: MulticallBatcher,
}

impl RpcStack {
    pub fn new(client: Arc<dyn ChainClient>, config: &RpcConfig) -> Result<Self> {
        let pool = Arc::new(WorkerPool::new(config)?);
        let limiter = Arc::new(RateLimiter::from_config(config));
        let retry = Arc::new(RetryExecutor::from_config(config, limiter));
        let batcher = MulticallBatcher::new(client.clone(), pool.clone(), retry.clone());
        Ok(Self {
            client,
            pool,
            retry,
            batcher,
        })
    }
}
