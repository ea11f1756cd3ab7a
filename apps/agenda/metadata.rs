use dao_rpc::{ChainError, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_METADATA_BASE_URL: &str =
    "https://raw.githubusercontent.com/tokamak-network/dao-agenda-metadata-repository/main/data/agendas";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Off-chain description of an agenda.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaMetadata {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub creator: Option<AgendaCreator>,
    #[serde(default)]
    pub actions: Vec<AgendaAction>,
    #[serde(default)]
    pub snapshot_url: Option<String>,
    #[serde(default)]
    pub discourse_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaCreator {
    pub address: String,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaAction {
    pub title: String,
    pub contract_address: String,
    pub method: String,
    #[serde(default)]
    pub calldata: Option<String>,
}

/// Fetches `{base}/{network}/agenda-{id}.json`. A missing file is not an
/// error: plenty of agendas never get metadata.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    client: Client,
    base_url: String,
    network: String,
}

impl MetadataClient {
    pub fn new(base_url: &str, network: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("dao-agenda/0.1 reqwest/0.12")
            .build()
            .map_err(|e| ChainError::Metadata(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            network: network.into(),
        })
    }

    pub fn url_for(&self, id: u64) -> String {
        format!("{}/{}/agenda-{id}.json", self.base_url, self.network)
    }

    /// Checks existence with a HEAD request; only a confirmed file is downloaded.
    #[instrument(skip(self))]
    pub async fn fetch(&self, id: u64) -> Result<Option<AgendaMetadata>> {
        let url = self.url_for(id);

        let head = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| ChainError::Metadata(format!("HEAD {url}: {e}")))?;
        match head.status() {
            StatusCode::NOT_FOUND => {
                debug!(id, "No metadata published");
                return Ok(None);
            }
            status if !status.is_success() => {
                return Err(ChainError::Metadata(format!("HEAD {url} returned {status}")));
            }
            _ => {}
        }

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChainError::Metadata(format!("GET {url}: {e}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| ChainError::Metadata(format!("GET {url}: {e}")))?;

        let metadata = response
            .json::<AgendaMetadata>()
            .await
            .map_err(|e| ChainError::Metadata(format!("invalid metadata at {url}: {e}")))?;
        Ok(Some(metadata))
    }
}
