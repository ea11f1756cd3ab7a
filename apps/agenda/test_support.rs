use crate::contracts::{
    DAOAgendaManager::{agendasCall, agendasReturn, numAgendasCall},
    DAOCommittee::{maxMemberCall, membersCall},
};
use alloy::{
    primitives::{Address, B256, Bytes, U256, address},
    sol_types::SolCall,
};
use async_trait::async_trait;
use dao_rpc::{
    BlockInfo, CallOutcome, ChainClient, ChainError, ContractCall, EventFilter, LogEntry, Result,
    TransactionInfo,
};
use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

/// Agenda manager and committee answered from memory by calldata selector.
pub(crate) struct FakeChain {
    pub count: AtomicU64,
    pub yes_votes: Mutex<HashMap<u64, u64>>,
    pub seats: Mutex<Vec<Address>>,
}

impl FakeChain {
    pub const AGENDA_MANAGER: Address = address!("0x00000000000000000000000000000000000000a1");
    pub const COMMITTEE: Address = address!("0x00000000000000000000000000000000000000c1");

    pub fn new(count: u64) -> Self {
        Self {
            count: AtomicU64::new(count),
            yes_votes: Mutex::new(HashMap::new()),
            seats: Mutex::new(Vec::new()),
        }
    }

    fn agenda(&self, id: u64) -> agendasReturn {
        let yes = self.yes_votes.lock().unwrap().get(&id).copied().unwrap_or(0);
        agendasReturn {
            createdTimestamp: U256::from(1_000 + id),
            noticeEndTimestamp: U256::from(2_000 + id),
            votingPeriodInSeconds: U256::from(600),
            votingStartedTimestamp: U256::ZERO,
            votingEndTimestamp: U256::ZERO,
            executableLimitTimestamp: U256::ZERO,
            executedTimestamp: U256::ZERO,
            countingYes: U256::from(yes),
            countingNo: U256::ZERO,
            countingAbstain: U256::ZERO,
            status: 1,
            result: 0,
            executed: false,
        }
    }

    fn answer(&self, call: &ContractCall) -> std::result::Result<Vec<u8>, String> {
        let selector = call.calldata.get(..4).unwrap_or_default();
        if selector == numAgendasCall::SELECTOR {
            Ok(numAgendasCall::abi_encode_returns(&U256::from(self.count.load(Ordering::SeqCst))))
        } else if selector == agendasCall::SELECTOR {
            let id: u64 = agendasCall::abi_decode(&call.calldata)
                .map_err(|e| e.to_string())?
                .id
                .saturating_to();
            if id >= self.count.load(Ordering::SeqCst) {
                return Err(format!("agenda {id} does not exist"));
            }
            Ok(agendasCall::abi_encode_returns(&self.agenda(id)))
        } else if selector == maxMemberCall::SELECTOR {
            let seats = self.seats.lock().unwrap().len();
            Ok(maxMemberCall::abi_encode_returns(&U256::from(seats)))
        } else if selector == membersCall::SELECTOR {
            let slot: usize = membersCall::abi_decode(&call.calldata)
                .map_err(|e| e.to_string())?
                .slot
                .saturating_to();
            let member = self.seats.lock().unwrap().get(slot).copied().unwrap_or(Address::ZERO);
            Ok(membersCall::abi_encode_returns(&member))
        } else {
            Err("unknown selector".to_string())
        }
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn endpoint(&self) -> &str {
        "memory://agenda"
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(1)
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(100)
    }

    async fn read_contract(&self, call: &ContractCall) -> Result<Bytes> {
        self.answer(call).map(Bytes::from).map_err(ChainError::Reverted)
    }

    async fn multicall(
        &self,
        calls: &[ContractCall],
        _allow_failure: bool,
    ) -> Result<Vec<CallOutcome>> {
        Ok(calls
            .iter()
            .map(|call| match self.answer(call) {
                Ok(data) => CallOutcome::Success(data.into()),
                Err(reason) => CallOutcome::Failure(reason),
            })
            .collect())
    }

    async fn get_block(&self, number: u64) -> Result<BlockInfo> {
        Ok(BlockInfo {
            number,
            hash: B256::with_last_byte(number as u8),
            timestamp: number * 12,
        })
    }

    async fn get_transaction(&self, hash: B256) -> Result<TransactionInfo> {
        Ok(TransactionInfo {
            hash,
            to: Some(Self::COMMITTEE),
            input: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef, 0x00]),
            block_number: Some(50),
        })
    }

    async fn get_logs(
        &self,
        _filter: &EventFilter,
        _from_block: u64,
        _to_block: u64,
    ) -> Result<Vec<LogEntry>> {
        Ok(Vec::new())
    }
}
