use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = ChainError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error("failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("all {} rpc endpoints failed: {}", .attempts.len(), format_attempts(.attempts))]
    AllEndpointsFailed { attempts: Vec<(String, String)> },

    #[error("{label} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        label: String,
        attempts: usize,
        #[source]
        source: Box<ChainError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("worker pool is shut down")]
    PoolClosed,

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{class} priority has no workers assigned")]
    EmptyPartition { class: &'static str },

    #[error("{class} priority references worker {index} but the pool has {worker_count} workers")]
    WorkerOutOfRange {
        class: &'static str,
        index: usize,
        worker_count: usize,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("no rpc endpoints configured for chain {0}")]
    NoEndpoints(u64),
}

const RATE_LIMIT_MARKERS: [&str; 3] = ["rate limit", "429", "too many requests"];
const REVERT_MARKERS: [&str; 2] = ["execution reverted", "revert"];

impl ChainError {
    /// Maps a provider error message onto the taxonomy above.
    pub fn from_transport(message: impl ToString) -> Self {
        let message = message.to_string();
        if is_rate_limit_message(&message) {
            ChainError::RateLimited(message)
        } else if REVERT_MARKERS
            .iter()
            .any(|marker| message.to_lowercase().contains(marker))
        {
            ChainError::Reverted(message)
        } else {
            ChainError::Transport(message)
        }
    }

    pub fn decode(what: impl Into<String>, reason: impl ToString) -> Self {
        ChainError::Decode {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        match self {
            ChainError::RateLimited(_) => true,
            ChainError::Transport(message) => is_rate_limit_message(message),
            _ => false,
        }
    }

    /// Whether a retry could plausibly change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChainError::Transport(_) | ChainError::Timeout(_) | ChainError::RateLimited(_)
        )
    }
}

fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn format_attempts(attempts: &[(String, String)]) -> String {
    attempts
        .iter()
        .map(|(url, reason)| format!("{url} ({reason})"))
        .collect::<Vec<_>>()
        .join(", ")
}
