//! Infinite scroll: turns "sentinel visible" signals into page fetches.
//!
//! The controller is the only writer of its [`PaginationStore`]. Fetches run
//! as spawned tasks (with retry and backoff) and report back through a
//! completion channel; [`InfiniteScrollController::pump`] applies them on the
//! owner's task. Completions for a superseded context are rejected by the
//! store and dropped.

use crate::feed::{FeedEvent, FeedSnapshot};
use crate::fetcher::{FetchError, PageFetcher};
use crate::net::{fetch_page_with_retry, RetryPolicy};
use crate::observer::{EventHub, Subscription};
use crate::query_key::build_key;
use crate::store::{CommitOutcome, FetchTicket, PaginationStore, StoreError};
use crate::types::{FilterContext, Identified, Page};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Result of one fetch task, waiting to be applied by the owner
#[derive(Debug)]
pub struct Completion<T> {
    pub ticket: FetchTicket,
    pub result: Result<Page<T>, FetchError>,
}

/// What applying a completion did to the store
#[derive(Clone, Debug, PartialEq)]
pub enum Applied {
    Committed(CommitOutcome),
    /// Context changed since the fetch began; result dropped
    Stale,
    Failed(FetchError),
}

pub struct InfiniteScrollController<T: Send + 'static> {
    store: PaginationStore<T>,
    fetcher: Arc<dyn PageFetcher<T>>,
    policy: RetryPolicy,
    page_size: NonZeroUsize,
    completions_tx: UnboundedSender<Completion<T>>,
    completions_rx: UnboundedReceiver<Completion<T>>,
    outstanding: usize,
    events: EventHub<FeedEvent>,
    sentinel_visible: bool,
    last_error: Option<FetchError>,
}

impl<T: Send + 'static> InfiniteScrollController<T> {
    pub fn new(
        context: FilterContext,
        fetcher: Arc<dyn PageFetcher<T>>,
        page_size: NonZeroUsize,
        policy: RetryPolicy,
    ) -> Self {
        let (completions_tx, completions_rx) = unbounded_channel();
        Self {
            store: PaginationStore::new(context),
            fetcher,
            policy,
            page_size,
            completions_tx,
            completions_rx,
            outstanding: 0,
            events: EventHub::new(),
            sentinel_visible: false,
            last_error: None,
        }
    }

    pub fn subscribe(&self) -> Subscription<FeedEvent> {
        self.events.subscribe()
    }

    pub fn context(&self) -> &FilterContext {
        self.store.context()
    }

    pub fn store(&self) -> &PaginationStore<T> {
        &self.store
    }

    pub fn page_size(&self) -> NonZeroUsize {
        self.page_size
    }

    /// Start over under `context`; fetches still running for the old one
    /// will be rejected when they complete.
    pub fn reset(&mut self, context: FilterContext) {
        self.store.reset(context.clone());
        self.last_error = None;
        self.events.emit(FeedEvent::Reset { context });
    }

    /// Re-run the current context from page 0
    pub fn refresh(&mut self) -> Option<usize> {
        let context = self.store.context().clone();
        self.reset(context);
        self.load_more()
    }

    /// Viewport observer hook. Returns the page index a fetch was started for.
    pub fn on_visibility(&mut self, visible: bool) -> Option<usize> {
        self.sentinel_visible = visible;
        if !visible {
            return None;
        }
        self.load_more()
    }

    pub fn sentinel_visible(&self) -> bool {
        self.sentinel_visible
    }

    /// Start fetching the next page unless exhausted, blocked, or already loading
    pub fn load_more(&mut self) -> Option<usize> {
        if !self.store.has_more() || self.store.in_flight_count() > 0 {
            return None;
        }
        let page_index = self.store.next_page_index();
        match self.store.begin_fetch(page_index) {
            Ok(ticket) => {
                self.spawn_fetch(ticket);
                Some(page_index)
            }
            Err(e) => {
                log::error!("[scroll] refusing to start page {page_index}: {e}");
                None
            }
        }
    }

    fn spawn_fetch(&mut self, ticket: FetchTicket) {
        let key = build_key(&ticket.context, ticket.page_index, self.page_size);
        let fetcher = Arc::clone(&self.fetcher);
        let policy = self.policy.clone();
        let tx = self.completions_tx.clone();
        self.outstanding += 1;
        log::debug!(
            "[scroll] fetching {} page {} (offset {})",
            key.context,
            key.page_index,
            key.offset()
        );
        let page_index = key.page_index;
        let fetch =
            tokio::spawn(async move { fetch_page_with_retry(fetcher.as_ref(), &key, &policy).await });
        // a panicking fetcher still reports, so the page is released
        tokio::spawn(async move {
            let result = fetch.await.unwrap_or_else(|e| {
                log::error!("[scroll] fetch task for page {page_index} failed: {e}");
                Err(FetchError::Network(format!("fetch task failed: {e}")))
            });
            // receiver only goes away with the controller
            let _ = tx.send(Completion { ticket, result });
        });
    }

    pub fn is_loading(&self) -> bool {
        self.store.in_flight_count() > 0
    }

    /// Nothing rendered yet and the first page is loading
    pub fn is_initial_loading(&self) -> bool {
        self.store.page_count() == 0 && self.store.is_in_flight(0)
    }

    pub fn has_more(&self) -> bool {
        self.store.has_more()
    }

    /// Error behind the retry affordance, cleared by the next successful page
    pub fn last_error(&self) -> Option<&FetchError> {
        self.last_error.as_ref()
    }
}

impl<T: Identified + Clone + Send + 'static> InfiniteScrollController<T> {
    /// Apply one completion to the store
    pub fn apply(&mut self, completion: Completion<T>) -> Applied {
        let Completion { ticket, result } = completion;
        let page_index = ticket.page_index;

        let result = match result {
            Err(FetchError::NotFound(reason)) => {
                log::info!("[scroll] page {page_index} not found ({reason}); ending feed");
                Ok(Page::empty_terminal())
            }
            other => other,
        };

        match result {
            Ok(page) => match self.store.commit_page(&ticket, page) {
                Ok(outcome) => {
                    self.last_error = None;
                    // parked pages are not visible until the gap before them fills
                    if outcome == CommitOutcome::Applied {
                        self.events.emit(FeedEvent::Changed {
                            item_count: self.store.flatten().len(),
                            has_more: self.store.has_more(),
                        });
                    }
                    Applied::Committed(outcome)
                }
                Err(e) => self.dropped(e),
            },
            Err(error) => match self.store.abandon_fetch(&ticket, &error) {
                Ok(()) => {
                    if error.is_transient() {
                        log::warn!(
                            "[scroll] page {page_index} failed after {} attempts: {error}",
                            self.policy.max_attempts
                        );
                        self.last_error = Some(error.clone());
                        self.events.emit(FeedEvent::LoadMoreFailed {
                            page_index,
                            attempts: self.policy.max_attempts,
                            error: error.clone(),
                        });
                    } else {
                        log::error!("[scroll] page {page_index} blocked: {error}");
                        self.events.emit(FeedEvent::PageBlocked {
                            page_index,
                            error: error.clone(),
                        });
                    }
                    Applied::Failed(error)
                }
                Err(e) => self.dropped(e),
            },
        }
    }

    fn dropped(&self, error: StoreError) -> Applied {
        match error {
            StoreError::StaleCommit { page_index } => {
                log::debug!("[scroll] dropping stale result for page {page_index}");
            }
            other => log::error!("[scroll] unexpected store error: {other}"),
        }
        Applied::Stale
    }

    /// Wait for the next fetch task to finish and apply it.
    /// Returns `None` when no fetch is outstanding.
    pub async fn pump(&mut self) -> Option<Applied> {
        let completion = match self.completions_rx.try_recv() {
            Ok(c) => c,
            Err(_) if self.outstanding == 0 => return None,
            Err(_) => self.completions_rx.recv().await?,
        };
        self.outstanding = self.outstanding.saturating_sub(1);
        Some(self.apply(completion))
    }

    /// Pump until nothing is outstanding
    pub async fn settle(&mut self) -> Vec<Applied> {
        let mut applied = Vec::new();
        while let Some(a) = self.pump().await {
            applied.push(a);
        }
        applied
    }

    pub fn items(&self) -> Vec<T> {
        self.store.flatten()
    }

    pub fn snapshot(&self) -> FeedSnapshot<T> {
        FeedSnapshot {
            context: self.store.context().clone(),
            items: self.items(),
            is_loading: self.is_loading(),
            has_more: self.has_more(),
            retry_available: self.last_error.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::mock::ScriptedFetcher;
    use crate::types::{ActivityFilter, FilterType};

    #[derive(Clone, Debug, PartialEq)]
    struct Row(u32);

    impl Identified for Row {
        type Id = u32;
        fn id(&self) -> u32 {
            self.0
        }
    }

    fn rows(range: std::ops::Range<u32>) -> Vec<Row> {
        range.map(Row).collect()
    }

    fn ctx(filter: ActivityFilter) -> FilterContext {
        FilterContext::new("wallet", FilterType::ProfileActivity(filter))
    }

    fn controller(fetcher: Arc<ScriptedFetcher<Row>>) -> InfiniteScrollController<Row> {
        InfiniteScrollController::new(
            ctx(ActivityFilter::Listings),
            fetcher,
            NonZeroUsize::new(24).unwrap(),
            RetryPolicy::immediate(3),
        )
    }

    #[tokio::test]
    async fn test_two_pages_of_thirty_items() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.push(0, Ok(Page::new(rows(0..24), true)));
        fetcher.push(1, Ok(Page::new(rows(24..30), false)));
        let mut ctl = controller(fetcher.clone());

        assert_eq!(ctl.on_visibility(true), Some(0));
        assert!(ctl.is_initial_loading());
        assert_eq!(ctl.pump().await, Some(Applied::Committed(CommitOutcome::Applied)));
        assert!(!ctl.store().is_exhausted());

        assert_eq!(ctl.on_visibility(true), Some(1));
        ctl.settle().await;
        assert!(ctl.store().is_exhausted());
        assert_eq!(ctl.items(), rows(0..30));

        assert_eq!(ctl.on_visibility(true), None);
        let offsets: Vec<usize> = fetcher.calls().iter().map(|k| k.offset()).collect();
        assert_eq!(offsets, vec![0, 24]);
    }

    #[tokio::test]
    async fn test_signal_while_in_flight_is_noop() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.push(0, Ok(Page::new(rows(0..24), true)));
        let mut ctl = controller(fetcher.clone());

        assert_eq!(ctl.on_visibility(true), Some(0));
        assert_eq!(ctl.on_visibility(true), None);
        assert_eq!(ctl.on_visibility(false), None);
        ctl.settle().await;
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_surface_load_more_failed() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.push(0, Ok(Page::new(rows(0..24), true)));
        for _ in 0..3 {
            fetcher.push(1, Err(FetchError::Network("503".into())));
        }
        fetcher.push(1, Ok(Page::new(rows(24..30), false)));
        let mut ctl = controller(fetcher.clone());
        let mut events = ctl.subscribe();

        ctl.load_more();
        ctl.settle().await;
        ctl.load_more();
        let applied = ctl.settle().await;

        assert!(matches!(applied.as_slice(), [Applied::Failed(FetchError::Network(_))]));
        assert_eq!(ctl.items(), rows(0..24));
        assert!(ctl.has_more());
        assert!(ctl.snapshot().retry_available);
        assert!(events.drain().iter().any(|e| matches!(
            e,
            FeedEvent::LoadMoreFailed { page_index: 1, attempts: 3, .. }
        )));

        // the sentinel stays usable
        assert_eq!(ctl.on_visibility(true), Some(1));
        ctl.settle().await;
        assert_eq!(ctl.items(), rows(0..30));
        assert!(ctl.last_error().is_none());
        assert_eq!(fetcher.calls().len(), 5);
    }

    #[tokio::test]
    async fn test_reset_while_in_flight_drops_completion() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.push_for(&ctx(ActivityFilter::Listings), 0, Ok(Page::new(rows(0..24), true)));
        fetcher.push_for(&ctx(ActivityFilter::Sales), 0, Ok(Page::new(rows(100..103), false)));
        let mut ctl = controller(fetcher.clone());

        ctl.load_more();
        ctl.reset(ctx(ActivityFilter::Sales));
        ctl.load_more();

        let applied = ctl.settle().await;
        assert_eq!(applied.len(), 2);
        assert!(applied.contains(&Applied::Stale));
        assert_eq!(ctl.items(), rows(100..103));
        assert_eq!(ctl.context(), &ctx(ActivityFilter::Sales));
    }

    #[tokio::test]
    async fn test_not_found_ends_feed_without_error() {
        let fetcher = Arc::new(ScriptedFetcher::<Row>::new());
        let mut ctl = controller(fetcher);
        ctl.load_more();
        assert_eq!(ctl.pump().await, Some(Applied::Committed(CommitOutcome::Applied)));
        assert!(ctl.items().is_empty());
        assert!(!ctl.has_more());
        assert!(ctl.last_error().is_none());
    }

    #[tokio::test]
    async fn test_malformed_page_blocks_feed_once() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.push(0, Err(FetchError::Malformed("missing items".into())));
        let mut ctl = controller(fetcher.clone());
        let mut events = ctl.subscribe();

        ctl.load_more();
        ctl.settle().await;
        assert!(!ctl.has_more());
        assert_eq!(ctl.load_more(), None);
        assert_eq!(fetcher.calls().len(), 1);
        assert!(events
            .drain()
            .iter()
            .any(|e| matches!(e, FeedEvent::PageBlocked { page_index: 0, .. })));
    }

    #[tokio::test]
    async fn test_refresh_restarts_from_first_page() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.push(0, Ok(Page::new(rows(0..3), false)));
        fetcher.push(0, Ok(Page::new(rows(0..4), false)));
        let mut ctl = controller(fetcher);

        ctl.load_more();
        ctl.settle().await;
        assert_eq!(ctl.items().len(), 3);

        assert_eq!(ctl.refresh(), Some(0));
        ctl.settle().await;
        assert_eq!(ctl.items().len(), 4);
    }

    #[tokio::test]
    async fn test_changed_counts_deduplicated_items() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.push(0, Ok(Page::new(rows(0..24), true)));
        // upstream shifted between requests
        fetcher.push(1, Ok(Page::new(rows(20..30), false)));
        let mut ctl = controller(fetcher);
        let mut events = ctl.subscribe();

        ctl.load_more();
        ctl.settle().await;
        ctl.load_more();
        ctl.settle().await;

        assert_eq!(ctl.items().len(), 30);
        assert_eq!(
            events.drain().last(),
            Some(&FeedEvent::Changed {
                item_count: 30,
                has_more: false
            })
        );
    }

    #[tokio::test]
    async fn test_parked_page_emits_no_change() {
        let fetcher = Arc::new(ScriptedFetcher::<Row>::new());
        let mut ctl = controller(fetcher);
        let mut events = ctl.subscribe();
        let early = ctl.store.begin_fetch(0).unwrap();
        let late = ctl.store.begin_fetch(1).unwrap();

        let parked = ctl.apply(Completion {
            ticket: late,
            result: Ok(Page::new(rows(24..30), false)),
        });
        assert_eq!(parked, Applied::Committed(CommitOutcome::Parked));
        assert!(events.drain().is_empty());

        let applied = ctl.apply(Completion {
            ticket: early,
            result: Ok(Page::new(rows(0..24), true)),
        });
        assert_eq!(applied, Applied::Committed(CommitOutcome::Applied));
        assert_eq!(
            events.drain(),
            vec![FeedEvent::Changed {
                item_count: 30,
                has_more: false
            }]
        );
    }

    struct PanickingFetcher;

    #[async_trait::async_trait]
    impl PageFetcher<Row> for PanickingFetcher {
        async fn fetch(&self, _key: &crate::query_key::PageKey) -> Result<Page<Row>, FetchError> {
            panic!("decoder bug");
        }
    }

    #[tokio::test]
    async fn test_panicking_fetch_releases_page() {
        let mut ctl: InfiniteScrollController<Row> = InfiniteScrollController::new(
            ctx(ActivityFilter::Listings),
            Arc::new(PanickingFetcher),
            NonZeroUsize::new(24).unwrap(),
            RetryPolicy::immediate(1),
        );
        let mut events = ctl.subscribe();

        assert_eq!(ctl.load_more(), Some(0));
        let applied = ctl.settle().await;

        assert!(matches!(applied.as_slice(), [Applied::Failed(FetchError::Network(_))]));
        assert!(!ctl.is_loading());
        assert!(matches!(ctl.last_error(), Some(FetchError::Network(_))));
        assert!(events
            .drain()
            .iter()
            .any(|e| matches!(e, FeedEvent::LoadMoreFailed { page_index: 0, .. })));
        assert_eq!(ctl.load_more(), Some(0));
    }

    #[tokio::test]
    async fn test_pump_without_work_returns_none() {
        let mut ctl = controller(Arc::new(ScriptedFetcher::new()));
        assert_eq!(ctl.pump().await, None);
    }
}
