use crate::{
    client::{
        BlockInfo, CallOutcome, ChainClient, ContractCall, EventFilter, LogEntry, TransactionInfo,
    },
    error::{ChainError, Result},
};
use alloy::primitives::{B256, Bytes};
use async_trait::async_trait;
use std::{
    sync::{
        Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

/// In-memory node: answers the chain id check, serves canned logs and counts reads.
pub(crate) struct StubClient {
    pub endpoint: String,
    pub chain_id: Result<u64>,
    pub chain_id_delay: Option<Duration>,
    pub head: AtomicU64,
    pub logs: Mutex<Vec<LogEntry>>,
    pub reads: AtomicUsize,
    pub log_queries: Mutex<Vec<(u64, u64)>>,
}

impl StubClient {
    pub fn healthy(endpoint: &str, chain_id: u64) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            chain_id: Ok(chain_id),
            chain_id_delay: None,
            head: AtomicU64::new(0),
            logs: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            log_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(endpoint: &str, error: ChainError) -> Self {
        Self {
            chain_id: Err(error),
            ..Self::healthy(endpoint, 0)
        }
    }

    pub fn hanging(endpoint: &str, delay: Duration) -> Self {
        Self {
            chain_id_delay: Some(delay),
            ..Self::healthy(endpoint, 1)
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for StubClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn chain_id(&self) -> Result<u64> {
        if let Some(delay) = self.chain_id_delay {
            tokio::time::sleep(delay).await;
        }
        self.chain_id.clone()
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn read_contract(&self, _call: &ContractCall) -> Result<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::new())
    }

    async fn multicall(
        &self,
        calls: &[ContractCall],
        _allow_failure: bool,
    ) -> Result<Vec<CallOutcome>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(calls.iter().map(|_| CallOutcome::Success(Bytes::new())).collect())
    }

    async fn get_block(&self, number: u64) -> Result<BlockInfo> {
        Ok(BlockInfo {
            number,
            hash: B256::ZERO,
            timestamp: number * 12,
        })
    }

    async fn get_transaction(&self, hash: B256) -> Result<TransactionInfo> {
        Err(ChainError::NotFound(format!("transaction {hash}")))
    }

    async fn get_logs(
        &self,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>> {
        self.log_queries.lock().unwrap().push((from_block, to_block));
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                log.block_number
                    .is_some_and(|block| block >= from_block && block <= to_block)
                    && log.address == filter.address
            })
            .cloned()
            .collect())
    }
}
