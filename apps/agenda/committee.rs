use crate::contracts::DAOCommittee::{maxMemberCall, membersCall};
use alloy::primitives::{Address, U256};
use dao_rpc::{CallOutcome, ContractCall, MulticallBatcher, Priority, Result};
use serde::Serialize;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitteeSeat {
    pub slot: u64,
    /// `None` for a vacant seat.
    pub member: Option<Address>,
}

/// Reads every committee seat in one HIGH priority batch.
#[instrument(skip(batcher))]
pub async fn load_committee(
    batcher: &MulticallBatcher,
    committee: Address,
) -> Result<Vec<CommitteeSeat>> {
    let max_member: u64 = batcher
        .read(committee, maxMemberCall {}, "maxMember", Priority::High)
        .await?
        .saturating_to();

    let calls = (0..max_member)
        .map(|slot| ContractCall::new(committee, &membersCall { slot: U256::from(slot) }))
        .collect();
    let outcomes = batcher
        .execute_batch(calls, true, "committee members", Priority::High)
        .await?;

    let seats: Vec<CommitteeSeat> = outcomes
        .into_iter()
        .enumerate()
        .map(|(slot, outcome)| {
            let member = match &outcome {
                CallOutcome::Success(_) => outcome
                    .decode::<membersCall>()
                    .inspect_err(|e| warn!(slot, error = %e, "Undecodable committee seat"))
                    .ok()
                    .filter(|member| !member.is_zero()),
                CallOutcome::Failure(reason) => {
                    warn!(slot, reason, "Failed to read committee seat");
                    None
                }
            };
            CommitteeSeat {
                slot: slot as u64,
                member,
            }
        })
        .collect();

    info!(
        seats = seats.len(),
        filled = seats.iter().filter(|seat| seat.member.is_some()).count(),
        "Committee loaded"
    );
    Ok(seats)
}
