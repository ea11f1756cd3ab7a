use crate::{
    config::RpcConfig,
    error::{ChainError, Result},
};
use async_trait::async_trait;
use std::{
    collections::BTreeSet,
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// A monotonic id space (`0..total_count`) whose items are read in chunks.
#[async_trait]
pub trait RangeSource: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;

    async fn total_count(&self) -> Result<u64>;

    /// Reads one chunk. Ids whose individual read failed are left out of the
    /// result rather than failing the chunk.
    async fn load_batch(&self, ids: &[u64]) -> Result<Vec<Self::Item>>;

    /// Best-effort enrichment (off-chain metadata). Must not fail the item.
    async fn enrich(&self, item: Self::Item) -> Self::Item {
        item
    }

    fn item_id(item: &Self::Item) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    Initializing,
    Loading { page: usize },
    Error,
}

#[derive(Debug, Clone)]
pub struct PaginationState<T> {
    pub phase: LoadPhase,
    pub current_page: usize,
    pub page_size: usize,
    pub total_count: Option<u64>,
    pub loaded_pages: BTreeSet<usize>,
    /// Descending by id.
    pub items: Vec<T>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub status: Option<String>,
}

impl<T> PaginationState<T> {
    fn new(page_size: usize) -> Self {
        Self {
            phase: LoadPhase::Idle,
            current_page: 0,
            page_size,
            total_count: None,
            loaded_pages: BTreeSet::new(),
            items: Vec::new(),
            is_loading: false,
            error: None,
            status: None,
        }
    }

    pub fn page_count(&self) -> usize {
        match self.total_count {
            Some(total) => (total as usize).div_ceil(self.page_size),
            None => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Completed { pages: Vec<usize>, new_items: usize },
    Cancelled,
}

/// Delivered after every merged chunk so callers can render incrementally.
#[derive(Debug, Clone)]
pub struct BatchLoaded<T> {
    pub target_page: usize,
    pub page: usize,
    pub items: Vec<T>,
    pub total_loaded: usize,
}

type BatchCallback<T> = Arc<dyn Fn(&BatchLoaded<T>) + Send + Sync>;

struct ActiveLoad {
    generation: u64,
    token: CancellationToken,
}

/// Walks a [`RangeSource`] most-recent-first, one page at a time.
///
/// At most one `load_to_page` runs per controller: starting a new one cancels
/// the previous load and waits for it to observe the cancellation.
pub struct PaginationController<S: RangeSource> {
    source: Arc<S>,
    batch_size: usize,
    batch_delay: Duration,
    state: Mutex<PaginationState<S::Item>>,
    active: Mutex<Option<ActiveLoad>>,
    generation: AtomicU64,
    load_lock: tokio::sync::Mutex<()>,
    on_batch_loaded: Option<BatchCallback<S::Item>>,
}

impl<S: RangeSource> fmt::Debug for PaginationController<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("PaginationController")
            .field("phase", &state.phase)
            .field("current_page", &state.current_page)
            .field("total_count", &state.total_count)
            .field("items", &state.items.len())
            .finish()
    }
}

impl<S: RangeSource> PaginationController<S> {
    pub fn new(source: Arc<S>, page_size: usize, batch_size: usize, batch_delay: Duration) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
            batch_delay,
            state: Mutex::new(PaginationState::new(page_size.max(1))),
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
            load_lock: tokio::sync::Mutex::new(()),
            on_batch_loaded: None,
        }
    }

    pub fn from_config(source: Arc<S>, config: &RpcConfig) -> Self {
        Self::new(source, config.page_size, config.batch_size, config.batch_delay())
    }

    pub fn on_batch_loaded(
        mut self,
        callback: impl Fn(&BatchLoaded<S::Item>) + Send + Sync + 'static,
    ) -> Self {
        self.on_batch_loaded = Some(Arc::new(callback));
        self
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PaginationState<S::Item>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> PaginationState<S::Item> {
        self.lock_state().clone()
    }

    pub fn items(&self) -> Vec<S::Item> {
        self.lock_state().items.clone()
    }

    pub fn has_more(&self) -> bool {
        let state = self.lock_state();
        state.current_page < state.page_count()
    }

    /// Reads the total count. When it changed, page bookkeeping restarts;
    /// items already held are kept and skipped by later loads, and the
    /// current page is kept within the new page count.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<u64> {
        {
            let mut state = self.lock_state();
            if !state.is_loading {
                state.phase = LoadPhase::Initializing;
            }
            state.error = None;
        }

        match self.source.total_count().await {
            Ok(total) => {
                let mut state = self.lock_state();
                if state.total_count != Some(total) {
                    state.loaded_pages.clear();
                }
                state.total_count = Some(total);
                state.current_page = state.current_page.min(state.page_count());
                if state.phase == LoadPhase::Initializing {
                    state.phase = LoadPhase::Idle;
                }
                info!(total, "Range initialized");
                Ok(total)
            }
            Err(e) => {
                let mut state = self.lock_state();
                state.phase = LoadPhase::Error;
                state.error = Some(e.to_string());
                state.status = Some("Failed to load the item count".to_string());
                warn!(error = %e, "Failed to read range size");
                Err(e)
            }
        }
    }

    /// Cancels the in-flight load, if any.
    pub fn cancel(&self) {
        if let Some(active) = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
        {
            active.token.cancel();
        }
    }

    /// Cancels any load and forgets everything loaded so far.
    pub fn reset(&self) {
        self.cancel();
        let mut state = self.lock_state();
        let page_size = state.page_size;
        *state = PaginationState::new(page_size);
    }

    fn supersede(&self) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        let previous = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(ActiveLoad {
                generation,
                token: token.clone(),
            });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        (generation, token)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|active| active.generation == generation)
    }

    fn finish_cancelled(&self, generation: u64) -> LoadOutcome {
        if self.is_current(generation) {
            let mut state = self.lock_state();
            state.phase = LoadPhase::Idle;
            state.is_loading = false;
            state.status = None;
        }
        debug!(generation, "Load cancelled");
        LoadOutcome::Cancelled
    }

    fn fail(&self, page: usize, error: ChainError) -> ChainError {
        let mut state = self.lock_state();
        state.phase = LoadPhase::Error;
        state.is_loading = false;
        state.error = Some(error.to_string());
        state.status = Some(format!("Failed to load page {page}"));
        warn!(page, error = %error, kept = state.items.len(), "Page load failed");
        error
    }

    /// Ids of `page` (1-based), newest first, minus the ones already held.
    fn pending_ids(&self, total: u64, page: usize) -> Vec<u64> {
        let state = self.lock_state();
        let start = ((page - 1) * state.page_size) as u64;
        let end = (page * state.page_size) as u64;
        (start..end.min(total))
            .map(|offset| total - 1 - offset)
            .filter(|id| !state.items.iter().any(|item| S::item_id(item) == *id))
            .collect()
    }

    fn merge(&self, loaded: Vec<S::Item>) -> usize {
        let mut state = self.lock_state();
        for item in loaded {
            let id = S::item_id(&item);
            match state.items.iter().position(|held| S::item_id(held) == id) {
                Some(position) => state.items[position] = item,
                None => state.items.push(item),
            }
        }
        state.items.sort_by_key(|item| std::cmp::Reverse(S::item_id(item)));
        state.items.len()
    }

    /// Loads every page up to `target_page` that is not loaded yet.
    #[instrument(skip(self))]
    pub async fn load_to_page(&self, target_page: usize) -> Result<LoadOutcome> {
        let (generation, token) = self.supersede();
        let _running = self.load_lock.lock().await;
        if token.is_cancelled() {
            return Ok(self.finish_cancelled(generation));
        }

        let known_total = {
            let mut state = self.lock_state();
            state.error = None;
            state.total_count
        };
        let total = match known_total {
            Some(total) => total,
            None => self.initialize().await?,
        };

        let pages: Vec<usize> = {
            let state = self.lock_state();
            let last = target_page.min(state.page_count());
            (1..=last)
                .filter(|page| !state.loaded_pages.contains(page))
                .collect()
        };

        let mut new_items = 0;
        for &page in &pages {
            {
                let mut state = self.lock_state();
                state.phase = LoadPhase::Loading { page };
                state.is_loading = true;
                state.error = None;
                state.status = Some(format!("Loading page {page}"));
            }

            let ids = self.pending_ids(total, page);
            for (index, chunk) in ids.chunks(self.batch_size).enumerate() {
                if index > 0 && !self.batch_delay.is_zero() {
                    tokio::select! {
                        _ = token.cancelled() => return Ok(self.finish_cancelled(generation)),
                        _ = sleep(self.batch_delay) => {}
                    }
                }
                if token.is_cancelled() {
                    return Ok(self.finish_cancelled(generation));
                }

                let loaded = match self.source.load_batch(chunk).await {
                    Ok(loaded) => loaded,
                    Err(e) if token.is_cancelled() => {
                        debug!(page, error = %e, "Chunk failed after cancellation");
                        return Ok(self.finish_cancelled(generation));
                    }
                    Err(e) => return Err(self.fail(page, e)),
                };
                if loaded.len() < chunk.len() {
                    debug!(
                        page,
                        requested = chunk.len(),
                        loaded = loaded.len(),
                        "Some items were skipped"
                    );
                }

                let mut enriched = Vec::with_capacity(loaded.len());
                for item in loaded {
                    if token.is_cancelled() {
                        return Ok(self.finish_cancelled(generation));
                    }
                    enriched.push(self.source.enrich(item).await);
                }
                if token.is_cancelled() {
                    return Ok(self.finish_cancelled(generation));
                }

                new_items += enriched.len();
                let total_loaded = self.merge(enriched.clone());
                if let Some(callback) = &self.on_batch_loaded {
                    callback(&BatchLoaded {
                        target_page,
                        page,
                        items: enriched,
                        total_loaded,
                    });
                }
            }

            let mut state = self.lock_state();
            state.loaded_pages.insert(page);
            state.current_page = state.current_page.max(page);
            debug!(page, items = state.items.len(), "Page loaded");
        }

        let mut state = self.lock_state();
        state.current_page = state.current_page.max(target_page.min(state.page_count()));
        state.phase = LoadPhase::Idle;
        state.is_loading = false;
        state.status = None;
        Ok(LoadOutcome::Completed { pages, new_items })
    }

    /// Re-reads one item, e.g. after a vote or execution changed it on chain.
    /// Returns `None` when the source no longer yields the id.
    #[instrument(skip(self))]
    pub async fn refresh_item(&self, id: u64) -> Result<Option<S::Item>> {
        let item = match self.source.load_batch(&[id]).await?.into_iter().next() {
            Some(item) => self.source.enrich(item).await,
            None => return Ok(None),
        };
        self.merge(vec![item.clone()]);
        Ok(Some(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::{Notify, mpsc};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Numbered {
        id: u64,
        label: String,
    }

    struct NumberSource {
        total: AtomicU64,
        failing_ids: Vec<u64>,
        broken_ids: Vec<u64>,
        batches: StdMutex<Vec<Vec<u64>>>,
        enriched: AtomicU64,
        /// When set, every batch waits for a permit and then fails.
        gate: Option<Arc<Notify>>,
    }

    impl NumberSource {
        fn new(total: u64) -> Self {
            Self {
                total: AtomicU64::new(total),
                failing_ids: Vec::new(),
                broken_ids: Vec::new(),
                batches: StdMutex::new(Vec::new()),
                enriched: AtomicU64::new(0),
                gate: None,
            }
        }

        fn reads(&self) -> usize {
            self.batches.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RangeSource for NumberSource {
        type Item = Numbered;

        async fn total_count(&self) -> Result<u64> {
            Ok(self.total.load(Ordering::SeqCst))
        }

        async fn load_batch(&self, ids: &[u64]) -> Result<Vec<Numbered>> {
            self.batches.lock().unwrap().push(ids.to_vec());
            if let Some(gate) = &self.gate {
                gate.notified().await;
                return Err(ChainError::Transport("reset".into()));
            }
            if ids.iter().any(|id| self.broken_ids.contains(id)) {
                return Err(ChainError::RetryExhausted {
                    label: "batch".into(),
                    attempts: 3,
                    source: Box::new(ChainError::Transport("reset".into())),
                });
            }
            Ok(ids
                .iter()
                .filter(|id| !self.failing_ids.contains(id))
                .map(|&id| Numbered {
                    id,
                    label: format!("item {id}"),
                })
                .collect())
        }

        async fn enrich(&self, mut item: Numbered) -> Numbered {
            self.enriched.fetch_add(1, Ordering::SeqCst);
            item.label.push_str(" (enriched)");
            item
        }

        fn item_id(item: &Numbered) -> u64 {
            item.id
        }
    }

    fn ids(controller: &PaginationController<NumberSource>) -> Vec<u64> {
        controller.items().iter().map(|item| item.id).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn loads_pages_newest_first_in_chunks() {
        let source = Arc::new(NumberSource::new(23));
        let controller =
            PaginationController::new(source.clone(), 10, 4, Duration::from_millis(500));

        assert_eq!(controller.initialize().await.unwrap(), 23);
        assert!(controller.has_more());

        let outcome = controller.load_to_page(1).await.unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Completed {
                pages: vec![1],
                new_items: 10
            }
        );
        assert_eq!(ids(&controller), (13..23).rev().collect::<Vec<_>>());
        assert_eq!(
            *source.batches.lock().unwrap(),
            vec![vec![22, 21, 20, 19], vec![18, 17, 16, 15], vec![14, 13]]
        );
        assert!(controller.items()[0].label.ends_with("(enriched)"));

        controller.load_to_page(3).await.unwrap();
        assert_eq!(ids(&controller), (0..23).rev().collect::<Vec<_>>());
        assert!(!controller.has_more());

        let state = controller.state();
        assert_eq!(state.current_page, 3);
        assert_eq!(state.loaded_pages.into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(state.phase, LoadPhase::Idle);
        assert!(!state.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn reloading_loaded_pages_reads_nothing() {
        let source = Arc::new(NumberSource::new(40));
        let controller =
            PaginationController::new(source.clone(), 10, 5, Duration::from_millis(100));

        controller.load_to_page(2).await.unwrap();
        let reads = source.reads();
        let items = controller.items();

        let outcome = controller.load_to_page(2).await.unwrap();
        assert_eq!(
            outcome,
            LoadOutcome::Completed {
                pages: vec![],
                new_items: 0
            }
        );
        assert_eq!(source.reads(), reads);
        assert_eq!(controller.items(), items);
    }

    #[tokio::test(start_paused = true)]
    async fn superseding_load_stops_the_previous_one() {
        let source = Arc::new(NumberSource::new(100));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller = Arc::new(
            PaginationController::new(source.clone(), 10, 2, Duration::from_millis(500))
                .on_batch_loaded(move |batch| {
                    let _ = tx.send(batch.target_page);
                }),
        );
        controller.initialize().await.unwrap();

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.load_to_page(3).await })
        };
        assert_eq!(rx.recv().await, Some(3));

        let second = controller.load_to_page(5).await.unwrap();
        assert_eq!(first.await.unwrap().unwrap(), LoadOutcome::Cancelled);
        assert!(matches!(second, LoadOutcome::Completed { .. }));

        let mut targets = Vec::new();
        while let Ok(target) = rx.try_recv() {
            targets.push(target);
        }
        // the rest of page 1 was loaded by the second call
        assert_eq!(targets.len(), 4 + 5 * 4);
        assert!(targets.iter().all(|&target| target == 5));
        assert_eq!(ids(&controller), (50..100).rev().collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_loads_keep_merged_items() {
        let source = Arc::new(NumberSource::new(30));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller = PaginationController::new(source.clone(), 10, 3, Duration::from_secs(1))
            .on_batch_loaded(move |batch| {
                let _ = tx.send(batch.items.len());
            });
        let controller = Arc::new(controller);

        let load = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.load_to_page(3).await })
        };
        assert_eq!(rx.recv().await, Some(3));
        controller.cancel();

        assert_eq!(load.await.unwrap().unwrap(), LoadOutcome::Cancelled);
        assert_eq!(ids(&controller), vec![29, 28, 27]);
        let state = controller.state();
        assert!(state.loaded_pages.is_empty());
        assert_eq!(state.phase, LoadPhase::Idle);
        assert_eq!(source.reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_chunks_surface_an_error_without_rollback() {
        let mut source = NumberSource::new(20);
        source.broken_ids = vec![15];
        let source = Arc::new(source);
        let controller = PaginationController::new(source, 10, 3, Duration::ZERO);

        let result = controller.load_to_page(1).await;
        assert!(matches!(result, Err(ChainError::RetryExhausted { .. })));

        let state = controller.state();
        assert_eq!(state.phase, LoadPhase::Error);
        assert!(state.error.is_some());
        assert_eq!(state.status.as_deref(), Some("Failed to load page 1"));
        assert!(state.loaded_pages.is_empty());
        assert_eq!(ids(&controller), vec![19, 18, 17]);

        // a later load with nothing left to read clears the stale error
        controller.load_to_page(0).await.unwrap();
        let state = controller.state();
        assert_eq!(state.error, None);
        assert_eq!(state.status, None);
        assert_eq!(state.phase, LoadPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn chunk_failing_after_cancel_is_reported_as_cancelled() {
        let gate = Arc::new(Notify::new());
        let mut source = NumberSource::new(10);
        source.gate = Some(gate.clone());
        let source = Arc::new(source);
        let controller =
            Arc::new(PaginationController::new(source.clone(), 10, 10, Duration::ZERO));

        let load = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.load_to_page(1).await })
        };
        while source.reads() == 0 {
            tokio::task::yield_now().await;
        }
        controller.cancel();
        gate.notify_one();

        assert_eq!(load.await.unwrap().unwrap(), LoadOutcome::Cancelled);
        let state = controller.state();
        assert_eq!(state.phase, LoadPhase::Idle);
        assert_eq!(state.error, None);
        assert_eq!(state.status, None);
        assert!(!state.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn growing_total_keeps_the_reached_page() {
        let source = Arc::new(NumberSource::new(25));
        let controller = PaginationController::new(source.clone(), 10, 10, Duration::ZERO);
        controller.load_to_page(3).await.unwrap();
        assert!(!controller.has_more());

        source.total.store(26, Ordering::SeqCst);
        controller.initialize().await.unwrap();
        let state = controller.state();
        assert_eq!(state.current_page, 3);
        assert!(state.loaded_pages.is_empty());
        assert!(!controller.has_more());

        let reads_before = source.reads();
        controller.load_to_page(3).await.unwrap();
        assert_eq!(source.reads(), reads_before + 1);
        assert_eq!(source.batches.lock().unwrap()[reads_before], vec![25]);
        assert_eq!(controller.items().len(), 26);

        source.total.store(5, Ordering::SeqCst);
        controller.initialize().await.unwrap();
        assert_eq!(controller.state().current_page, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_items_do_not_fail_the_page() {
        let mut source = NumberSource::new(6);
        source.failing_ids = vec![4];
        let controller = PaginationController::new(Arc::new(source), 10, 10, Duration::ZERO);

        controller.load_to_page(1).await.unwrap();
        assert_eq!(ids(&controller), vec![5, 3, 2, 1, 0]);
        assert!(controller.state().loaded_pages.contains(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn new_items_are_picked_up_after_reinitializing() {
        let source = Arc::new(NumberSource::new(5));
        let controller = PaginationController::new(source.clone(), 10, 10, Duration::ZERO);
        controller.load_to_page(1).await.unwrap();

        source.total.store(7, Ordering::SeqCst);
        controller.initialize().await.unwrap();
        let reads_before = source.reads();
        controller.load_to_page(1).await.unwrap();

        assert_eq!(source.batches.lock().unwrap()[reads_before], vec![6, 5]);
        assert_eq!(ids(&controller), vec![6, 5, 4, 3, 2, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_replaces_a_held_item() {
        let source = Arc::new(NumberSource::new(3));
        let controller = PaginationController::new(source.clone(), 10, 10, Duration::ZERO);
        controller.load_to_page(1).await.unwrap();
        let enriched = source.enriched.load(Ordering::SeqCst);

        let refreshed = controller.refresh_item(1).await.unwrap().unwrap();
        assert_eq!(refreshed.id, 1);
        assert_eq!(controller.items().len(), 3);
        assert_eq!(source.enriched.load(Ordering::SeqCst), enriched + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_forgets_everything() {
        let source = Arc::new(NumberSource::new(3));
        let controller = PaginationController::new(source, 2, 10, Duration::ZERO);
        controller.load_to_page(1).await.unwrap();
        assert!(controller.has_more());

        controller.reset();
        let state = controller.state();
        assert!(state.items.is_empty());
        assert_eq!(state.total_count, None);
        assert_eq!(state.page_size, 2);
        assert!(!controller.has_more());
    }
}
