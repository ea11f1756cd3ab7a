use crate::contracts::DAOCommittee::{
    AgendaCreated, AgendaExecuted, AgendaVoteCasted, ChangedMember,
};
use alloy::{
    primitives::{Address, B256},
    sol_types::SolEvent,
};
use dao_rpc::{EventFilter, LogEntry};
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernanceEvent {
    AgendaCreated {
        id: u64,
        from: Address,
        transaction_hash: Option<B256>,
        block_number: Option<u64>,
    },
    AgendaVoteUpdated {
        id: u64,
        voter: Address,
        vote: u64,
    },
    AgendaExecuted {
        id: u64,
    },
    CommitteeChanged {
        slot: u64,
        previous: Address,
        member: Address,
    },
}

impl GovernanceEvent {
    pub fn agenda_id(&self) -> Option<u64> {
        match self {
            GovernanceEvent::AgendaCreated { id, .. }
            | GovernanceEvent::AgendaVoteUpdated { id, .. }
            | GovernanceEvent::AgendaExecuted { id } => Some(*id),
            GovernanceEvent::CommitteeChanged { .. } => None,
        }
    }

    /// Decodes a committee log; unknown or malformed logs yield `None`.
    pub fn from_log(log: &LogEntry) -> Option<Self> {
        let topic0 = *log.topics.first()?;
        let topics = log.topics.iter().copied();
        let data = &log.data[..];

        let decoded = if topic0 == AgendaCreated::SIGNATURE_HASH {
            AgendaCreated::decode_raw_log(topics, data).map(|event| GovernanceEvent::AgendaCreated {
                id: event.id.saturating_to(),
                from: event.from,
                transaction_hash: log.transaction_hash,
                block_number: log.block_number,
            })
        } else if topic0 == AgendaVoteCasted::SIGNATURE_HASH {
            AgendaVoteCasted::decode_raw_log(topics, data).map(|event| {
                GovernanceEvent::AgendaVoteUpdated {
                    id: event.id.saturating_to(),
                    voter: event.from,
                    vote: event.voting.saturating_to(),
                }
            })
        } else if topic0 == AgendaExecuted::SIGNATURE_HASH {
            AgendaExecuted::decode_raw_log(topics, data).map(|event| {
                GovernanceEvent::AgendaExecuted {
                    id: event.id.saturating_to(),
                }
            })
        } else if topic0 == ChangedMember::SIGNATURE_HASH {
            ChangedMember::decode_raw_log(topics, data).map(|event| {
                GovernanceEvent::CommitteeChanged {
                    slot: event.slotIndex.saturating_to(),
                    previous: event.prevMember,
                    member: event.newMember,
                }
            })
        } else {
            return None;
        };

        decoded
            .inspect_err(|e| warn!(topic = %topic0, error = %e, "Undecodable governance log"))
            .ok()
    }
}

/// Logs the committee contract emits that the agenda layer reacts to.
pub fn committee_filter(committee: Address) -> EventFilter {
    EventFilter::new(committee)
        .event(AgendaCreated::SIGNATURE_HASH)
        .event(AgendaVoteCasted::SIGNATURE_HASH)
        .event(AgendaExecuted::SIGNATURE_HASH)
        .event(ChangedMember::SIGNATURE_HASH)
}

/// Typed publish/subscribe channel for governance changes.
#[derive(Debug, Clone)]
pub struct GovernanceEvents {
    sender: broadcast::Sender<GovernanceEvent>,
}

impl GovernanceEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.sender.subscribe()
    }

    /// Returns how many subscribers saw the event.
    pub fn publish(&self, event: GovernanceEvent) -> usize {
        debug!(?event, "Publishing governance event");
        self.sender.send(event).unwrap_or(0)
    }

    /// Publishes every recognised log; returns how many were recognised.
    pub fn publish_logs(&self, logs: &[LogEntry]) -> usize {
        logs.iter()
            .filter_map(GovernanceEvent::from_log)
            .map(|event| self.publish(event))
            .count()
    }
}
