use crate::{contracts::DAOAgendaManager::agendasReturn, metadata::AgendaMetadata};
use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// On-chain `AgendaStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AgendaStatus {
    None,
    Notice,
    Voting,
    WaitingExec,
    Executed,
    Ended,
    Unknown(u8),
}

impl From<u8> for AgendaStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => AgendaStatus::None,
            1 => AgendaStatus::Notice,
            2 => AgendaStatus::Voting,
            3 => AgendaStatus::WaitingExec,
            4 => AgendaStatus::Executed,
            5 => AgendaStatus::Ended,
            other => AgendaStatus::Unknown(other),
        }
    }
}

/// On-chain `AgendaResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AgendaResult {
    Pending,
    Accept,
    Reject,
    Dismiss,
    Unknown(u8),
}

impl From<u8> for AgendaResult {
    fn from(value: u8) -> Self {
        match value {
            0 => AgendaResult::Pending,
            1 => AgendaResult::Accept,
            2 => AgendaResult::Reject,
            3 => AgendaResult::Dismiss,
            other => AgendaResult::Unknown(other),
        }
    }
}

/// Where an agenda is in its lifecycle at a given moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AgendaPhase {
    Notice,
    Voting,
    WaitingExecution,
    Executed,
    Ended,
}

impl fmt::Display for AgendaPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgendaPhase::Notice => "notice",
            AgendaPhase::Voting => "voting",
            AgendaPhase::WaitingExecution => "waiting execution",
            AgendaPhase::Executed => "executed",
            AgendaPhase::Ended => "ended",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Tally {
    pub yes: U256,
    pub no: U256,
    pub abstain: U256,
}

impl Tally {
    pub fn total(&self) -> U256 {
        self.yes + self.no + self.abstain
    }
}

/// The one agenda view model every presentation renders. Timestamps are
/// unix seconds; zero means "not happened yet".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgendaView {
    pub id: u64,
    pub created_at: u64,
    pub notice_end: u64,
    pub voting_period: u64,
    pub voting_started: u64,
    pub voting_end: u64,
    pub executable_limit: u64,
    pub executed_at: u64,
    pub tally: Tally,
    pub status: AgendaStatus,
    pub result: AgendaResult,
    pub executed: bool,
    pub metadata: Option<AgendaMetadata>,
}

impl AgendaView {
    pub fn from_chain(id: u64, raw: agendasReturn) -> Self {
        Self {
            id,
            created_at: raw.createdTimestamp.saturating_to(),
            notice_end: raw.noticeEndTimestamp.saturating_to(),
            voting_period: raw.votingPeriodInSeconds.saturating_to(),
            voting_started: raw.votingStartedTimestamp.saturating_to(),
            voting_end: raw.votingEndTimestamp.saturating_to(),
            executable_limit: raw.executableLimitTimestamp.saturating_to(),
            executed_at: raw.executedTimestamp.saturating_to(),
            tally: Tally {
                yes: raw.countingYes,
                no: raw.countingNo,
                abstain: raw.countingAbstain,
            },
            status: raw.status.into(),
            result: raw.result.into(),
            executed: raw.executed,
            metadata: None,
        }
    }

    pub fn title(&self) -> String {
        self.metadata
            .as_ref()
            .map(|m| m.title.clone())
            .unwrap_or_else(|| format!("Agenda #{}", self.id))
    }

    pub fn phase(&self, now: u64) -> AgendaPhase {
        if self.executed || self.status == AgendaStatus::Executed {
            return AgendaPhase::Executed;
        }
        if self.status == AgendaStatus::Ended {
            return AgendaPhase::Ended;
        }
        if now < self.notice_end {
            return AgendaPhase::Notice;
        }
        if self.voting_end == 0 || now < self.voting_end {
            return AgendaPhase::Voting;
        }
        match self.result {
            AgendaResult::Accept if self.executable_limit == 0 || now < self.executable_limit => {
                AgendaPhase::WaitingExecution
            }
            AgendaResult::Pending if self.status == AgendaStatus::WaitingExec => {
                AgendaPhase::WaitingExecution
            }
            _ => AgendaPhase::Ended,
        }
    }

    /// Seconds until the current phase ends, when that is known.
    pub fn time_remaining(&self, now: u64) -> Option<u64> {
        let deadline = match self.phase(now) {
            AgendaPhase::Notice => self.notice_end,
            AgendaPhase::Voting if self.voting_end != 0 => self.voting_end,
            AgendaPhase::WaitingExecution if self.executable_limit != 0 => self.executable_limit,
            _ => return None,
        };
        Some(deadline.saturating_sub(now))
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.created_at as i64, 0)
    }
}
