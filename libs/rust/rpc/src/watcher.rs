use crate::{
    client::{ChainClient, EventFilter, LogEntry},
    error::ChainError,
};
use std::{sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Stops the watcher when unsubscribed or dropped.
#[derive(Debug)]
pub struct WatchHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn unsubscribe(self) {}

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Polls `get_logs` for `filter`, starting after the head block seen on the
/// first poll. A failed poll is reported to `on_error` and the same block
/// range is retried on the next tick.
pub fn watch_contract_event<L, E>(
    client: Arc<dyn ChainClient>,
    filter: EventFilter,
    poll_interval: Duration,
    on_logs: L,
    on_error: E,
) -> WatchHandle
where
    L: FnMut(Vec<LogEntry>) + Send + 'static,
    E: FnMut(ChainError) + Send + 'static,
{
    watch_contract_event_from(client, filter, None, poll_interval, on_logs, on_error)
}

/// Like [`watch_contract_event`], but delivers logs from `from_block` on
/// when it is set, so events emitted before the first poll are not missed.
pub fn watch_contract_event_from<L, E>(
    client: Arc<dyn ChainClient>,
    filter: EventFilter,
    from_block: Option<u64>,
    poll_interval: Duration,
    mut on_logs: L,
    mut on_error: E,
) -> WatchHandle
where
    L: FnMut(Vec<LogEntry>) + Send + 'static,
    E: FnMut(ChainError) + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        let mut ticker = interval(poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next_block = from_block;
        info!(
            address = %filter.address,
            endpoint = client.endpoint(),
            from_block = ?from_block,
            "Watching contract events"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let head = tokio::select! {
                _ = token.cancelled() => break,
                head = client.block_number() => head,
            };
            let head = match head {
                Ok(head) => head,
                Err(e) => {
                    warn!(error = %e, "Failed to read head block");
                    on_error(e);
                    continue;
                }
            };

            let from = match next_block {
                Some(from) => from,
                None => {
                    next_block = Some(head + 1);
                    continue;
                }
            };
            if from > head {
                continue;
            }

            let logs = tokio::select! {
                _ = token.cancelled() => break,
                logs = client.get_logs(&filter, from, head) => logs,
            };
            match logs {
                Ok(logs) => {
                    let logs: Vec<LogEntry> = logs
                        .into_iter()
                        .filter(|log| filter.matches(log))
                        .collect();
                    debug!(from, to = head, count = logs.len(), "Polled contract events");
                    if !logs.is_empty() {
                        on_logs(logs);
                    }
                    next_block = Some(head + 1);
                }
                Err(e) => {
                    warn!(from, to = head, error = %e, "Failed to poll contract events");
                    on_error(e);
                }
            }
        }

        debug!(address = %filter.address, "Stopped watching contract events");
    });

    WatchHandle { cancel, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubClient;
    use alloy::primitives::{Address, B256, Bytes};
    use std::sync::atomic::Ordering;
    use tokio::{sync::mpsc, time::sleep};

    fn log_at(address: Address, topic: B256, block: u64) -> LogEntry {
        LogEntry {
            address,
            topics: vec![topic],
            data: Bytes::new(),
            block_number: Some(block),
            transaction_hash: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_only_new_matching_logs() {
        let address = Address::repeat_byte(0x0a);
        let wanted = B256::repeat_byte(0x01);
        let client = Arc::new(StubClient::healthy("stub", 1));
        client.head.store(10, Ordering::SeqCst);
        client.logs.lock().unwrap().extend([
            log_at(address, wanted, 9),
            log_at(address, wanted, 11),
            log_at(address, B256::repeat_byte(0x02), 12),
            log_at(address, wanted, 12),
        ]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = watch_contract_event(
            client.clone(),
            EventFilter::new(address).event(wanted),
            Duration::from_secs(1),
            move |logs| {
                let _ = tx.send(logs);
            },
            |_| {},
        );

        sleep(Duration::from_millis(1_500)).await;
        client.head.store(12, Ordering::SeqCst);

        let delivered = rx.recv().await.unwrap();
        let blocks: Vec<_> = delivered.iter().map(|log| log.block_number).collect();
        assert_eq!(blocks, vec![Some(11), Some(12)]);
        assert_eq!(client.log_queries.lock().unwrap()[0], (11, 12));
        assert!(handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_polling() {
        let client = Arc::new(StubClient::healthy("stub", 1));
        let handle = watch_contract_event(
            client.clone(),
            EventFilter::new(Address::ZERO),
            Duration::from_secs(1),
            |_| {},
            |_| {},
        );

        sleep(Duration::from_millis(2_500)).await;
        client.head.store(5, Ordering::SeqCst);
        sleep(Duration::from_secs(1)).await;
        let queries = client.log_queries.lock().unwrap().len();
        assert_eq!(queries, 1);

        drop(handle);
        client.head.store(9, Ordering::SeqCst);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(client.log_queries.lock().unwrap().len(), queries);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_start_block_replays_earlier_logs() {
        let address = Address::repeat_byte(0x0b);
        let topic = B256::repeat_byte(0x03);
        let client = Arc::new(StubClient::healthy("stub", 1));
        client.head.store(10, Ordering::SeqCst);
        client.logs.lock().unwrap().extend([
            log_at(address, topic, 8),
            log_at(address, topic, 9),
            log_at(address, topic, 10),
        ]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = watch_contract_event_from(
            client.clone(),
            EventFilter::new(address).event(topic),
            Some(9),
            Duration::from_secs(1),
            move |logs| {
                let _ = tx.send(logs);
            },
            |_| {},
        );

        let delivered = rx.recv().await.unwrap();
        let blocks: Vec<_> = delivered.iter().map(|log| log.block_number).collect();
        assert_eq!(blocks, vec![Some(9), Some(10)]);
        assert_eq!(client.log_queries.lock().unwrap()[0], (9, 10));
    }
}
