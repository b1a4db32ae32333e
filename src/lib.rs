//! marketfeed - filter-driven paginated data sync for a marketplace front-end
//!
//! This library keeps the activity feeds, the offers feed and the global search
//! box of a marketplace UI consistent while filters change under them.
//!
//! ## Architecture
//!
//! - **query_key / fetcher / net**: page keys, upstream fetchers, retry with backoff
//! - **store**: append-only page store guarded by context and epoch
//! - **scroll / filter**: controllers that own a store and apply fetch completions
//! - **search**: debounced global search
//! - **viewer / currency**: collaborators used when presenting rows
//!
//! Renderers bind to [`feed::Feed`] and the event hubs; they never touch a store.

// Core data model and request keys
pub mod query_key;
pub mod types;

// Upstream access
pub mod fetcher;
pub mod net;

// Pagination state and its controllers
pub mod feed;
pub mod filter;
pub mod observer;
pub mod scroll;
pub mod store;

pub mod search;

// Presentation collaborators
pub mod currency;
pub mod viewer;

pub mod config;

pub use feed::{Feed, FeedEvent, FeedSnapshot};
pub use fetcher::{FetchError, PageFetcher};
pub use filter::FilterController;
pub use query_key::{build_key, PageKey};
pub use scroll::InfiniteScrollController;
pub use search::{SearchDebouncer, SearchSession};
pub use store::{PaginationStore, StoreError};
pub use types::{FilterContext, FilterType, Page};
