use crate::{error::ConfigError, pool::Priority};
use serde::Deserialize;
use std::{collections::HashMap, str::FromStr, time::Duration};
use tracing::debug;

pub const MAINNET_CHAIN_ID: u64 = 1;
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

const DEFAULT_WORKER_COUNT: usize = 5;

/// Tuning knobs for the scheduler, rate limiter, retry policy and range loader.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub worker_count: usize,
    pub worker_request_interval_ms: u64,
    pub priority_workers: PriorityWorkers,
    pub max_calls_per_second: usize,
    pub min_call_interval_ms: u64,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub progress_update_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub health_check_timeout_ms: u64,
    pub page_size: usize,
}

/// Static assignment of worker slots to priority classes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PriorityWorkers {
    pub high: Vec<usize>,
    pub medium: Vec<usize>,
    pub low: Vec<usize>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            worker_request_interval_ms: 200,
            priority_workers: PriorityWorkers::for_worker_count(DEFAULT_WORKER_COUNT),
            max_calls_per_second: 10,
            min_call_interval_ms: 100,
            batch_size: 10,
            batch_delay_ms: 500,
            max_retries: 3,
            retry_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            progress_update_interval_ms: 1_000,
            request_timeout_ms: 10_000,
            health_check_timeout_ms: 5_000,
            page_size: 10,
        }
    }
}

impl Default for PriorityWorkers {
    fn default() -> Self {
        Self::for_worker_count(DEFAULT_WORKER_COUNT)
    }
}

impl PriorityWorkers {
    /// Splits `count` workers roughly 2:1:2 between HIGH, MEDIUM and LOW.
    /// Pools too small for disjoint classes share slots.
    pub fn for_worker_count(count: usize) -> Self {
        match count {
            0 | 1 => Self {
                high: vec![0],
                medium: vec![0],
                low: vec![0],
            },
            2 => Self {
                high: vec![0],
                medium: vec![1],
                low: vec![1],
            },
            n => {
                let high = (n * 2 / 5).max(1);
                Self {
                    high: (0..high).collect(),
                    medium: vec![high],
                    low: (high + 1..n).collect(),
                }
            }
        }
    }

    pub fn workers_for(&self, priority: Priority) -> &[usize] {
        match priority {
            Priority::High => &self.high,
            Priority::Medium => &self.medium,
            Priority::Low => &self.low,
        }
    }

    fn validate(&self, worker_count: usize) -> Result<(), ConfigError> {
        for priority in [Priority::High, Priority::Medium, Priority::Low] {
            let class = priority.as_str();
            let workers = self.workers_for(priority);
            if workers.is_empty() {
                return Err(ConfigError::EmptyPartition { class });
            }
            if let Some(&index) = workers.iter().find(|&&index| index >= worker_count) {
                return Err(ConfigError::WorkerOutOfRange {
                    class,
                    index,
                    worker_count,
                });
            }
        }
        Ok(())
    }
}

impl RpcConfig {
    /// Defaults overlaid with `RPC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| key.starts_with("RPC_"))
            .collect();
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        overlay(vars, "RPC_WORKER_COUNT", &mut config.worker_count)?;
        overlay(
            vars,
            "RPC_WORKER_REQUEST_INTERVAL_MS",
            &mut config.worker_request_interval_ms,
        )?;
        overlay(vars, "RPC_MAX_CALLS_PER_SECOND", &mut config.max_calls_per_second)?;
        overlay(vars, "RPC_MIN_CALL_INTERVAL_MS", &mut config.min_call_interval_ms)?;
        overlay(vars, "RPC_BATCH_SIZE", &mut config.batch_size)?;
        overlay(vars, "RPC_BATCH_DELAY_MS", &mut config.batch_delay_ms)?;
        overlay(vars, "RPC_MAX_RETRIES", &mut config.max_retries)?;
        overlay(vars, "RPC_RETRY_DELAY_MS", &mut config.retry_delay_ms)?;
        overlay(vars, "RPC_BACKOFF_MULTIPLIER", &mut config.backoff_multiplier)?;
        overlay(
            vars,
            "RPC_PROGRESS_UPDATE_INTERVAL_MS",
            &mut config.progress_update_interval_ms,
        )?;
        overlay(vars, "RPC_REQUEST_TIMEOUT_MS", &mut config.request_timeout_ms)?;
        overlay(vars, "RPC_HEALTH_CHECK_TIMEOUT_MS", &mut config.health_check_timeout_ms)?;
        overlay(vars, "RPC_PAGE_SIZE", &mut config.page_size)?;

        config.priority_workers = PriorityWorkers::for_worker_count(config.worker_count);
        overlay_list(vars, "RPC_HIGH_WORKERS", &mut config.priority_workers.high)?;
        overlay_list(vars, "RPC_MEDIUM_WORKERS", &mut config.priority_workers.medium)?;
        overlay_list(vars, "RPC_LOW_WORKERS", &mut config.priority_workers.low)?;

        config.validate()?;
        debug!(?config, "Loaded rpc configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Zero("worker_count"));
        }
        if self.max_calls_per_second == 0 {
            return Err(ConfigError::Zero("max_calls_per_second"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Zero("batch_size"));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Zero("max_retries"));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Zero("page_size"));
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "backoff_multiplier".into(),
                value: self.backoff_multiplier.to_string(),
            });
        }
        self.priority_workers.validate(self.worker_count)
    }

    pub fn worker_request_interval(&self) -> Duration {
        Duration::from_millis(self.worker_request_interval_ms)
    }

    pub fn min_call_interval(&self) -> Duration {
        Duration::from_millis(self.min_call_interval_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn progress_update_interval(&self) -> Duration {
        Duration::from_millis(self.progress_update_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }
}

fn overlay<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = vars.get(key) {
        *target = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

fn overlay_list(
    vars: &HashMap<String, String>,
    key: &str,
    target: &mut Vec<usize>,
) -> Result<(), ConfigError> {
    if let Some(raw) = vars.get(key) {
        *target = raw
            .split(',')
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw.clone(),
                })
            })
            .collect::<Result<_, _>>()?;
    }
    Ok(())
}

/// Candidate rpc endpoints per chain, tried in order.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    endpoints: HashMap<u64, Vec<String>>,
    default_chain_id: u64,
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            MAINNET_CHAIN_ID,
            vec![
                "https://eth.llamarpc.com".to_string(),
                "https://ethereum-rpc.publicnode.com".to_string(),
                "https://rpc.ankr.com/eth".to_string(),
                "https://cloudflare-eth.com".to_string(),
            ],
        );
        endpoints.insert(
            SEPOLIA_CHAIN_ID,
            vec![
                "https://ethereum-sepolia-rpc.publicnode.com".to_string(),
                "https://rpc.sepolia.org".to_string(),
                "https://rpc.ankr.com/eth_sepolia".to_string(),
            ],
        );
        Self {
            endpoints,
            default_chain_id: MAINNET_CHAIN_ID,
        }
    }
}

impl EndpointRegistry {
    pub fn new(default_chain_id: u64) -> Self {
        Self {
            default_chain_id,
            ..Self::default()
        }
    }

    /// Registers `urls` ahead of any built-in endpoints for `chain_id`.
    pub fn with_endpoints(mut self, chain_id: u64, urls: Vec<String>) -> Self {
        let existing = self.endpoints.remove(&chain_id).unwrap_or_default();
        let mut merged = urls;
        for url in existing {
            if !merged.contains(&url) {
                merged.push(url);
            }
        }
        self.endpoints.insert(chain_id, merged);
        self
    }

    /// Reads a comma separated `RPC_URLS` list for the default chain.
    pub fn from_env(default_chain_id: u64) -> Self {
        let registry = Self::new(default_chain_id);
        match std::env::var("RPC_URLS") {
            Ok(raw) => {
                let urls = raw
                    .split(',')
                    .map(|url| url.trim().to_string())
                    .filter(|url| !url.is_empty())
                    .collect();
                registry.with_endpoints(default_chain_id, urls)
            }
            Err(_) => registry,
        }
    }

    pub fn default_chain_id(&self) -> u64 {
        self.default_chain_id
    }

    pub fn candidates(&self, chain_id: Option<u64>) -> Result<&[String], ConfigError> {
        let chain_id = chain_id.unwrap_or(self.default_chain_id);
        match self.endpoints.get(&chain_id) {
            Some(urls) if !urls.is_empty() => Ok(urls),
            _ => Err(ConfigError::NoEndpoints(chain_id)),
        }
    }
}
