use crate::error::{ChainError, Result};
use alloy::{
    primitives::{Address, B256, Bytes},
    sol_types::SolCall,
};
use async_trait::async_trait;
use std::fmt;

/// One immutable contract read: target, encoded calldata and the function
/// signature it was built from (kept for logs and error messages).
#[derive(Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub address: Address,
    pub calldata: Bytes,
    pub function: &'static str,
}

impl ContractCall {
    pub fn new<C: SolCall>(address: Address, call: &C) -> Self {
        Self {
            address,
            calldata: call.abi_encode().into(),
            function: C::SIGNATURE,
        }
    }

    pub fn decode<C: SolCall>(&self, output: &[u8]) -> Result<C::Return> {
        C::abi_decode_returns(output).map_err(|e| ChainError::decode(self.function, e))
    }
}

impl fmt::Debug for ContractCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractCall")
            .field("address", &self.address)
            .field("function", &self.function)
            .field("calldata_len", &self.calldata.len())
            .finish()
    }
}

/// Outcome of one call inside an aggregated batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success(Bytes),
    Failure(String),
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    pub fn decode<C: SolCall>(&self) -> Result<C::Return> {
        match self {
            CallOutcome::Success(data) => {
                C::abi_decode_returns(data).map_err(|e| ChainError::decode(C::SIGNATURE, e))
            }
            CallOutcome::Failure(reason) => Err(ChainError::Reverted(reason.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub hash: B256,
    pub to: Option<Address>,
    pub input: Bytes,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
}

/// Which logs to collect: one contract, optionally narrowed to event signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub address: Address,
    pub event_signatures: Vec<B256>,
}

impl EventFilter {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            event_signatures: Vec::new(),
        }
    }

    pub fn event(mut self, signature: B256) -> Self {
        self.event_signatures.push(signature);
        self
    }

    pub fn matches(&self, log: &LogEntry) -> bool {
        log.address == self.address
            && (self.event_signatures.is_empty()
                || log
                    .topics
                    .first()
                    .is_some_and(|topic| self.event_signatures.contains(topic)))
    }
}

/// Capability surface of a chain node; the scheduler depends on nothing else.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn chain_id(&self) -> Result<u64>;

    async fn block_number(&self) -> Result<u64>;

    async fn read_contract(&self, call: &ContractCall) -> Result<Bytes>;

    async fn multicall(&self, calls: &[ContractCall], allow_failure: bool)
    -> Result<Vec<CallOutcome>>;

    async fn get_block(&self, number: u64) -> Result<BlockInfo>;

    async fn get_transaction(&self, hash: B256) -> Result<TransactionInfo>;

    async fn get_logs(&self, filter: &EventFilter, from_block: u64, to_block: u64)
    -> Result<Vec<LogEntry>>;
}
