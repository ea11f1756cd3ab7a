use crate::{
    agenda::AgendaView,
    committee::{CommitteeSeat, load_committee},
    events::GovernanceEvent,
    source::AgendaSource,
};
use alloy::primitives::{Address, B256};
use anyhow::{Context, Result};
use dao_rpc::{ChainClient, LoadOutcome, MulticallBatcher, PaginationController};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Block and calldata of the transaction that created an agenda.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgendaCreation {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub timestamp: u64,
    pub selector: Option<[u8; 4]>,
    pub calldata_len: usize,
}

/// Keeps the agenda list and the committee in step with on-chain events.
pub struct AgendaService {
    controller: Arc<PaginationController<AgendaSource>>,
    client: Arc<dyn ChainClient>,
    batcher: MulticallBatcher,
    committee: Address,
    seats: Mutex<Vec<CommitteeSeat>>,
}

impl AgendaService {
    pub fn new(
        controller: Arc<PaginationController<AgendaSource>>,
        batcher: MulticallBatcher,
        committee: Address,
    ) -> Self {
        Self {
            controller,
            client: batcher.client().clone(),
            batcher,
            committee,
            seats: Mutex::new(Vec::new()),
        }
    }

    pub fn controller(&self) -> &Arc<PaginationController<AgendaSource>> {
        &self.controller
    }

    pub fn agendas(&self) -> Vec<AgendaView> {
        self.controller.items()
    }

    pub fn committee(&self) -> Vec<CommitteeSeat> {
        self.seats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Reads the agenda count, the first `pages` pages and the committee.
    #[instrument(skip(self))]
    pub async fn start(&self, pages: usize) -> Result<()> {
        let total = self
            .controller
            .initialize()
            .await
            .context("Failed to read the agenda count")?;
        info!(total, "Agenda manager reachable");

        match self
            .controller
            .load_to_page(pages)
            .await
            .context("Failed to load the first agenda pages")?
        {
            LoadOutcome::Completed { pages, new_items } => {
                info!(?pages, new_items, "Initial agendas loaded")
            }
            LoadOutcome::Cancelled => warn!("Initial agenda load was superseded"),
        }

        self.refresh_committee().await?;
        Ok(())
    }

    pub async fn refresh_committee(&self) -> Result<Vec<CommitteeSeat>> {
        let seats = load_committee(&self.batcher, self.committee)
            .await
            .context("Failed to load the committee")?;
        *self
            .seats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = seats.clone();
        Ok(seats)
    }

    pub async fn creation_details(
        &self,
        transaction_hash: B256,
        block_number: u64,
    ) -> Result<AgendaCreation> {
        let transaction = self
            .client
            .get_transaction(transaction_hash)
            .await
            .context("Failed to read the agenda creation transaction")?;
        let block = self
            .client
            .get_block(transaction.block_number.unwrap_or(block_number))
            .await
            .context("Failed to read the agenda creation block")?;

        Ok(AgendaCreation {
            transaction_hash,
            block_number: block.number,
            timestamp: block.timestamp,
            selector: transaction.input.get(..4).and_then(|s| s.try_into().ok()),
            calldata_len: transaction.input.len(),
        })
    }

    #[instrument(skip(self))]
    pub async fn handle(&self, event: &GovernanceEvent) -> Result<()> {
        match event {
            GovernanceEvent::AgendaCreated {
                id,
                transaction_hash,
                block_number,
                ..
            } => {
                self.controller.initialize().await?;
                self.controller.refresh_item(*id).await?;
                if let (Some(hash), Some(block)) = (transaction_hash, block_number) {
                    match self.creation_details(*hash, *block).await {
                        Ok(creation) => info!(id, timestamp = creation.timestamp, "Agenda created"),
                        Err(e) => warn!(id, error = ?e, "Could not describe agenda creation"),
                    }
                }
            }
            GovernanceEvent::AgendaVoteUpdated { id, .. }
            | GovernanceEvent::AgendaExecuted { id } => {
                if self.controller.refresh_item(*id).await?.is_none() {
                    warn!(id, "Updated agenda could not be re-read");
                }
            }
            GovernanceEvent::CommitteeChanged { slot, .. } => {
                info!(slot, "Committee seat changed");
                self.refresh_committee().await?;
            }
        }
        Ok(())
    }

    /// Drops what is held and reloads enough pages to cover every agenda held
    /// before.
    pub async fn resync(&self) -> Result<()> {
        let pages = {
            let state = self.controller.state();
            state.items.len().div_ceil(state.page_size).max(1)
        };
        self.controller.reset();
        self.controller.initialize().await?;
        self.controller.load_to_page(pages).await?;
        self.refresh_committee().await?;
        Ok(())
    }

    /// Applies bus events until `cancel` fires or the bus closes.
    pub async fn run(
        self: Arc<Self>,
        mut events: Receiver<GovernanceEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = events.recv() => received,
            };
            match received {
                Ok(event) => {
                    if let Err(e) = self.handle(&event).await {
                        warn!(?event, error = ?e, "Failed to apply governance event");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed governance events, resyncing");
                    if let Err(e) = self.resync().await {
                        warn!(error = ?e, "Resync failed");
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("Agenda service stopped");
    }
}
