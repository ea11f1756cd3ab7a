use crate::config::RpcConfig;
use std::{collections::VecDeque, time::Duration};
use tokio::{
    sync::Mutex,
    time::{Instant, sleep},
};
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(1);

/// Sliding one-second window limiter with a minimum spacing between calls.
///
/// Waiters are serialized on the window lock, so the window never records more
/// than `max_calls_per_second` calls no matter how many tasks wait at once.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls_per_second: usize,
    min_call_interval: Duration,
    state: Mutex<WindowState>,
}

#[derive(Debug, Default)]
struct WindowState {
    call_timestamps: VecDeque<Instant>,
    last_call: Option<Instant>,
}

impl WindowState {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.call_timestamps.front() {
            if now.saturating_duration_since(oldest) >= WINDOW {
                self.call_timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

impl RateLimiter {
    pub fn new(max_calls_per_second: usize, min_call_interval: Duration) -> Self {
        Self {
            max_calls_per_second: max_calls_per_second.max(1),
            min_call_interval,
            state: Mutex::new(WindowState::default()),
        }
    }

    pub fn from_config(config: &RpcConfig) -> Self {
        Self::new(config.max_calls_per_second, config.min_call_interval())
    }

    pub async fn wait_for_rate_limit(&self) {
        let mut state = self.state.lock().await;

        loop {
            let now = Instant::now();
            state.prune(now);
            if state.call_timestamps.len() < self.max_calls_per_second {
                break;
            }
            let Some(&oldest) = state.call_timestamps.front() else {
                break;
            };
            let wait = (oldest + WINDOW).saturating_duration_since(now);
            debug!(
                wait_ms = wait.as_millis() as u64,
                calls_in_window = state.call_timestamps.len(),
                "Rate limit window full, waiting"
            );
            sleep(wait).await;
        }

        if let Some(last_call) = state.last_call {
            let since_last = Instant::now().saturating_duration_since(last_call);
            if since_last < self.min_call_interval {
                sleep(self.min_call_interval - since_last).await;
            }
        }

        let now = Instant::now();
        state.prune(now);
        state.call_timestamps.push_back(now);
        state.last_call = Some(now);
    }

    pub async fn calls_in_window(&self) -> usize {
        let mut state = self.state.lock().await;
        state.prune(Instant::now());
        state.call_timestamps.len()
    }
}
