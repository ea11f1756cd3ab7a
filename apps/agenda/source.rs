use crate::{
    agenda::AgendaView,
    contracts::DAOAgendaManager::{agendasCall, numAgendasCall},
    metadata::MetadataClient,
};
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use dao_rpc::{CallOutcome, ContractCall, MulticallBatcher, Priority, RangeSource, Result};
use tracing::{debug, warn};

/// Agendas of one agenda manager, read through the shared scheduler.
pub struct AgendaSource {
    batcher: MulticallBatcher,
    agenda_manager: Address,
    metadata: Option<MetadataClient>,
}

impl AgendaSource {
    pub fn new(
        batcher: MulticallBatcher,
        agenda_manager: Address,
        metadata: Option<MetadataClient>,
    ) -> Self {
        Self {
            batcher,
            agenda_manager,
            metadata,
        }
    }

    pub fn agenda_manager(&self) -> Address {
        self.agenda_manager
    }
}

#[async_trait]
impl RangeSource for AgendaSource {
    type Item = AgendaView;

    async fn total_count(&self) -> Result<u64> {
        let count = self
            .batcher
            .read(self.agenda_manager, numAgendasCall {}, "numAgendas", Priority::High)
            .await?;
        Ok(count.saturating_to())
    }

    async fn load_batch(&self, ids: &[u64]) -> Result<Vec<AgendaView>> {
        let calls = ids
            .iter()
            .map(|&id| ContractCall::new(self.agenda_manager, &agendasCall { id: U256::from(id) }))
            .collect();
        let label = match (ids.first(), ids.last()) {
            (Some(first), Some(last)) => format!("agendas {first}..{last}"),
            _ => "agendas".to_string(),
        };

        let outcomes = self
            .batcher
            .execute_batch(calls, true, &label, Priority::Medium)
            .await?;

        Ok(ids
            .iter()
            .zip(outcomes)
            .filter_map(|(&id, outcome)| match outcome {
                CallOutcome::Success(_) => match outcome.decode::<agendasCall>() {
                    Ok(raw) => Some(AgendaView::from_chain(id, raw)),
                    Err(e) => {
                        warn!(id, error = %e, "Skipping undecodable agenda");
                        None
                    }
                },
                CallOutcome::Failure(reason) => {
                    warn!(id, reason, "Skipping agenda that failed to load");
                    None
                }
            })
            .collect())
    }

    async fn enrich(&self, mut agenda: AgendaView) -> AgendaView {
        let Some(metadata) = &self.metadata else {
            return agenda;
        };
        match metadata.fetch(agenda.id).await {
            Ok(found) => {
                if found.is_none() {
                    debug!(id = agenda.id, "Agenda has no metadata");
                }
                agenda.metadata = found;
            }
            Err(e) => warn!(id = agenda.id, error = %e, "Metadata fetch failed"),
        }
        agenda
    }

    fn item_id(agenda: &AgendaView) -> u64 {
        agenda.id
    }
}
