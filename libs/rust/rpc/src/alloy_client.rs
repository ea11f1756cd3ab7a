use crate::{
    client::{
        BlockInfo, CallOutcome, ChainClient, ContractCall, EventFilter, LogEntry, TransactionInfo,
    },
    error::{ChainError, Result},
    factory::EndpointConnector,
    multicall::{MULTICALL3_ADDRESS, decode_aggregate3, encode_aggregate3},
};
use alloy::{
    consensus::Transaction as ConsensusTransaction,
    eips::BlockNumberOrTag,
    network::{TransactionBuilder, TransactionResponse},
    primitives::{B256, Bytes},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{Filter, TransactionRequest},
    transports::http::reqwest::Url,
};
use async_trait::async_trait;
use std::{fmt::Display, future::IntoFuture, sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{instrument, trace};

/// [`ChainClient`] over an alloy HTTP provider. Every request carries the
/// configured per-call timeout.
#[derive(Clone)]
pub struct AlloyChainClient {
    url: String,
    provider: DynProvider,
    request_timeout: Duration,
}

impl AlloyChainClient {
    pub fn connect(url: &str, request_timeout: Duration) -> Result<Self> {
        let parsed: Url = url
            .parse()
            .map_err(|e| ChainError::Transport(format!("invalid rpc url {url}: {e}")))?;
        let provider = ProviderBuilder::new().connect_http(parsed).erased();
        Ok(Self {
            url: url.to_string(),
            provider,
            request_timeout,
        })
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    async fn timed<T, E, F>(&self, request: F) -> Result<T>
    where
        F: IntoFuture<Output = std::result::Result<T, E>>,
        E: Display,
    {
        match timeout(self.request_timeout, request).await {
            Ok(result) => result.map_err(ChainError::from_transport),
            Err(_) => Err(ChainError::Timeout(self.request_timeout)),
        }
    }

    async fn eth_call(&self, to: alloy::primitives::Address, input: Bytes) -> Result<Bytes> {
        let request = TransactionRequest::default().with_to(to).with_input(input);
        self.timed(self.provider.call(request)).await
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn chain_id(&self) -> Result<u64> {
        self.timed(self.provider.get_chain_id()).await
    }

    async fn block_number(&self) -> Result<u64> {
        self.timed(self.provider.get_block_number()).await
    }

    #[instrument(skip(self, call), fields(function = call.function, address = %call.address))]
    async fn read_contract(&self, call: &ContractCall) -> Result<Bytes> {
        self.eth_call(call.address, call.calldata.clone()).await
    }

    #[instrument(skip(self, calls), fields(calls = calls.len()))]
    async fn multicall(
        &self,
        calls: &[ContractCall],
        allow_failure: bool,
    ) -> Result<Vec<CallOutcome>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let output = self
            .eth_call(MULTICALL3_ADDRESS, encode_aggregate3(calls, allow_failure))
            .await?;
        trace!(bytes = output.len(), "aggregate3 returned");
        decode_aggregate3(calls, &output)
    }

    async fn get_block(&self, number: u64) -> Result<BlockInfo> {
        let block = self
            .timed(self.provider.get_block_by_number(BlockNumberOrTag::Number(number)))
            .await?
            .ok_or_else(|| ChainError::NotFound(format!("block {number}")))?;
        Ok(BlockInfo {
            number: block.header.number,
            hash: block.header.hash,
            timestamp: block.header.timestamp,
        })
    }

    async fn get_transaction(&self, hash: B256) -> Result<TransactionInfo> {
        let transaction = self
            .timed(self.provider.get_transaction_by_hash(hash))
            .await?
            .ok_or_else(|| ChainError::NotFound(format!("transaction {hash}")))?;
        Ok(TransactionInfo {
            hash: TransactionResponse::tx_hash(&transaction),
            to: ConsensusTransaction::to(&transaction),
            input: ConsensusTransaction::input(&transaction).clone(),
            block_number: transaction.block_number,
        })
    }

    #[instrument(skip(self, filter), fields(address = %filter.address))]
    async fn get_logs(
        &self,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>> {
        let mut query = Filter::new()
            .address(filter.address)
            .from_block(from_block)
            .to_block(to_block);
        if !filter.event_signatures.is_empty() {
            query = query.event_signature(filter.event_signatures.clone());
        }

        let logs = self.timed(self.provider.get_logs(&query)).await?;
        Ok(logs
            .into_iter()
            .map(|log| LogEntry {
                address: log.address(),
                topics: log.topics().to_vec(),
                data: log.inner.data.data.clone(),
                block_number: log.block_number,
                transaction_hash: log.transaction_hash,
            })
            .collect())
    }
}

/// Connects endpoints with [`AlloyChainClient`].
#[derive(Debug, Clone)]
pub struct AlloyConnector {
    request_timeout: Duration,
}

impl AlloyConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl EndpointConnector for AlloyConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn ChainClient>> {
        let client = AlloyChainClient::connect(url, self.request_timeout)?;
        Ok(Arc::new(client))
    }
}
