use crate::{
    client::{CallOutcome, ChainClient, ContractCall},
    error::{ChainError, Result},
    pool::{Priority, WorkerPool},
    retry::RetryExecutor,
};
use alloy::{
    primitives::{Address, Bytes, address},
    sol,
    sol_types::{SolCall, decode_revert_reason},
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub const MULTICALL3_ADDRESS: Address = address!("0xcA11bde05977b3631167028862bE2a173976CA11");

sol! {
    struct Call3 {
        address target;
        bool allowFailure;
        bytes callData;
    }

    struct Call3Result {
        bool success;
        bytes returnData;
    }

    function aggregate3(Call3[] calldata calls)
        external
        payable
        returns (Call3Result[] memory returnData);
}

pub(crate) fn encode_aggregate3(calls: &[ContractCall], allow_failure: bool) -> Bytes {
    let calls = calls
        .iter()
        .map(|call| Call3 {
            target: call.address,
            allowFailure: allow_failure,
            callData: call.calldata.clone(),
        })
        .collect();
    aggregate3Call { calls }.abi_encode().into()
}

pub(crate) fn decode_aggregate3(calls: &[ContractCall], output: &[u8]) -> Result<Vec<CallOutcome>> {
    let results = aggregate3Call::abi_decode_returns(output)
        .map_err(|e| ChainError::decode("aggregate3", e))?;

    if results.len() != calls.len() {
        return Err(ChainError::decode(
            "aggregate3",
            format!("expected {} results, got {}", calls.len(), results.len()),
        ));
    }

    Ok(results
        .into_iter()
        .zip(calls)
        .map(|(result, call)| {
            if result.success {
                CallOutcome::Success(result.returnData)
            } else {
                let reason = decode_revert_reason(&result.returnData)
                    .unwrap_or_else(|| format!("{} reverted", call.function));
                CallOutcome::Failure(reason)
            }
        })
        .collect())
}

/// Sends a list of independent reads as one queued aggregate3 call.
#[derive(Clone)]
pub struct MulticallBatcher {
    client: Arc<dyn ChainClient>,
    pool: Arc<WorkerPool>,
    retry: Arc<RetryExecutor>,
}

impl MulticallBatcher {
    pub fn new(
        client: Arc<dyn ChainClient>,
        pool: Arc<WorkerPool>,
        retry: Arc<RetryExecutor>,
    ) -> Self {
        Self { client, pool, retry }
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// With `allow_failure` a reverting call is reported in place and its
    /// siblings still return; without it one revert fails the whole batch.
    #[instrument(skip(self, calls), fields(calls = calls.len(), endpoint = self.client.endpoint()))]
    pub async fn execute_batch(
        &self,
        calls: Vec<ContractCall>,
        allow_failure: bool,
        label: &str,
        priority: Priority,
    ) -> Result<Vec<CallOutcome>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let client = self.client.clone();
        let retry = self.retry.clone();
        let owned_label = label.to_string();
        let outcomes = self
            .pool
            .submit(label, priority, move || async move {
                retry
                    .call_with_retry(&owned_label, || client.multicall(&calls, allow_failure))
                    .await
            })
            .await?;

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        if failed > 0 {
            warn!(label, failed, total = outcomes.len(), "Batch returned failed calls");
        } else {
            debug!(label, total = outcomes.len(), "Batch succeeded");
        }
        Ok(outcomes)
    }

    /// Single read queued and retried like a batch, decoded into `C`'s return type.
    pub async fn read<C>(
        &self,
        address: Address,
        call: C,
        label: &str,
        priority: Priority,
    ) -> Result<C::Return>
    where
        C: SolCall + Send + 'static,
        C::Return: Send + 'static,
    {
        let call = ContractCall::new(address, &call);
        let client = self.client.clone();
        let retry = self.retry.clone();
        let owned_label = label.to_string();
        self.pool
            .submit(label, priority, move || async move {
                let output = retry
                    .call_with_retry(&owned_label, || client.read_contract(&call))
                    .await?;
                call.decode::<C>(&output)
            })
            .await
    }
}
