//! Consumer-facing contract of a paginated feed.
//!
//! Rendering code binds to [`Feed`] and listens for [`FeedEvent`]s; it never
//! sees stores, tickets or fetchers.

use crate::fetcher::FetchError;
use crate::types::FilterContext;
use serde::Serialize;

pub trait Feed {
    type Item;
    type Filter;

    /// Flattened, de-duplicated items in page order
    fn items(&self) -> Vec<Self::Item>;
    fn is_loading(&self) -> bool;
    fn has_more(&self) -> bool;
    fn load_more(&mut self);
    fn on_filter_change(&mut self, filter: Self::Filter);
}

#[derive(Clone, Debug, PartialEq)]
pub enum FeedEvent {
    /// Pages were dropped and the feed restarted under `context`
    Reset { context: FilterContext },
    /// A page was committed
    Changed { item_count: usize, has_more: bool },
    /// Retries exhausted; already rendered items stay, loading may be retried
    LoadMoreFailed {
        page_index: usize,
        attempts: u32,
        error: FetchError,
    },
    /// The service returned something unusable; loading stops until reset
    PageBlocked { page_index: usize, error: FetchError },
}

/// Point-in-time view of a feed for renderers that poll instead of subscribing
#[derive(Clone, Debug, Serialize)]
pub struct FeedSnapshot<T> {
    pub context: FilterContext,
    pub items: Vec<T>,
    pub is_loading: bool,
    pub has_more: bool,
    pub retry_available: bool,
}
