use crate::metadata::DEFAULT_METADATA_BASE_URL;
use alloy::primitives::Address;
use anyhow::{Context, Result, bail};
use dao_rpc::config::{MAINNET_CHAIN_ID, SEPOLIA_CHAIN_ID};
use std::{collections::HashMap, time::Duration};

// Tokamak DAO deployments on mainnet.
const MAINNET_AGENDA_MANAGER: &str = "0xcD4421d082752f363E1687544a09d5112cD4f484";
const MAINNET_COMMITTEE: &str = "0xDD9f0cCc044B0781289Ee318e5971b0139602C26";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 12;

/// Deployment the service follows, read from `AGENDA_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct AgendaSettings {
    pub network: String,
    pub chain_id: u64,
    pub agenda_manager: Address,
    pub committee: Address,
    pub metadata_base_url: String,
    pub metadata_enabled: bool,
    pub poll_interval: Duration,
    pub initial_pages: usize,
}

impl AgendaSettings {
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| key.starts_with("AGENDA_"))
            .collect();
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let network = vars
            .get("AGENDA_NETWORK")
            .map(|n| n.trim().to_lowercase())
            .unwrap_or_else(|| "mainnet".to_string());
        let chain_id = match network.as_str() {
            "mainnet" => MAINNET_CHAIN_ID,
            "sepolia" => SEPOLIA_CHAIN_ID,
            other => bail!("unsupported AGENDA_NETWORK {other}, expected mainnet or sepolia"),
        };

        let agenda_manager = address_var(
            vars,
            "AGENDA_MANAGER_ADDRESS",
            &network,
            MAINNET_AGENDA_MANAGER,
        )?;
        let committee = address_var(vars, "AGENDA_COMMITTEE_ADDRESS", &network, MAINNET_COMMITTEE)?;

        let poll_interval_secs = match vars.get("AGENDA_POLL_INTERVAL_SECS") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("AGENDA_POLL_INTERVAL_SECS is not a number: {raw}"))?,
            None => DEFAULT_POLL_INTERVAL_SECS,
        };
        let initial_pages = match vars.get("AGENDA_INITIAL_PAGES") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("AGENDA_INITIAL_PAGES is not a number: {raw}"))?,
            None => 1,
        };

        Ok(Self {
            network,
            chain_id,
            agenda_manager,
            committee,
            metadata_base_url: vars
                .get("AGENDA_METADATA_URL")
                .cloned()
                .unwrap_or_else(|| DEFAULT_METADATA_BASE_URL.to_string()),
            metadata_enabled: vars
                .get("AGENDA_METADATA_ENABLED")
                .is_none_or(|raw| raw.trim() != "false"),
            poll_interval: Duration::from_secs(poll_interval_secs),
            initial_pages,
        })
    }
}

fn address_var(
    vars: &HashMap<String, String>,
    key: &str,
    network: &str,
    mainnet_default: &str,
) -> Result<Address> {
    let raw = match (vars.get(key), network) {
        (Some(raw), _) => raw.trim(),
        (None, "mainnet") => mainnet_default,
        (None, _) => bail!("{key} must be set for {network}"),
    };
    raw.parse()
        .with_context(|| format!("{key} is not an address: {raw}"))
}
