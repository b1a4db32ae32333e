//! Ordered page storage for a single active [`FilterContext`].
//!
//! Pages are kept contiguous from index 0. A page that completes before one of
//! its predecessors is parked and becomes visible once the gap closes, so
//! `flatten()` never shows holes. Every started fetch gets a [`FetchTicket`]
//! carrying the context and reset epoch it was started under; a commit whose
//! ticket no longer matches is rejected with [`StoreError::StaleCommit`].

use crate::fetcher::FetchError;
use crate::types::{FilterContext, Identified, Page};
use std::collections::{BTreeMap, BTreeSet, HashSet};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("page {0} is already in flight")]
    AlreadyInFlight(usize),
    #[error("page {0} is already committed")]
    AlreadyCommitted(usize),
    #[error("stale commit for page {page_index}: context changed since the fetch began")]
    StaleCommit { page_index: usize },
}

/// Issued by [`PaginationStore::begin_fetch`]; required to commit or abandon the fetch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchTicket {
    pub context: FilterContext,
    pub epoch: u64,
    pub page_index: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Page is now part of the contiguous prefix
    Applied,
    /// Stored, waiting for an earlier page
    Parked,
    /// Key was already satisfied; nothing changed
    Ignored,
}

#[derive(Debug)]
pub struct PaginationStore<T> {
    context: FilterContext,
    epoch: u64,
    pages: Vec<Page<T>>,
    parked: BTreeMap<usize, Page<T>>,
    in_flight: BTreeSet<usize>,
    exhausted: bool,
    blocked: Option<FetchError>,
}

impl<T> PaginationStore<T> {
    pub fn new(context: FilterContext) -> Self {
        Self {
            context,
            epoch: 0,
            pages: Vec::new(),
            parked: BTreeMap::new(),
            in_flight: BTreeSet::new(),
            exhausted: false,
            blocked: None,
        }
    }

    /// Drop all pages and in-flight markers and start over under `context`.
    /// Tickets issued before the reset become stale even if `context` is unchanged.
    pub fn reset(&mut self, context: FilterContext) {
        log::debug!(
            "[store] reset epoch={} -> {} context={}",
            self.epoch,
            self.epoch + 1,
            context
        );
        self.context = context;
        self.epoch += 1;
        self.pages.clear();
        self.parked.clear();
        self.in_flight.clear();
        self.exhausted = false;
        self.blocked = None;
    }

    pub fn context(&self) -> &FilterContext {
        &self.context
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn begin_fetch(&mut self, page_index: usize) -> Result<FetchTicket, StoreError> {
        if self.in_flight.contains(&page_index) {
            return Err(StoreError::AlreadyInFlight(page_index));
        }
        if self.is_committed(page_index) {
            return Err(StoreError::AlreadyCommitted(page_index));
        }
        self.in_flight.insert(page_index);
        Ok(self.ticket(page_index))
    }

    pub fn commit_page(&mut self, ticket: &FetchTicket, page: Page<T>) -> Result<CommitOutcome, StoreError> {
        self.check_current(ticket)?;
        let index = ticket.page_index;

        if !self.in_flight.remove(&index) {
            log::debug!("[store] ignoring completion for already satisfied page {index}");
            return Ok(CommitOutcome::Ignored);
        }

        if index > self.pages.len() {
            self.parked.insert(index, page);
            return Ok(CommitOutcome::Parked);
        }

        if index == self.pages.len() {
            self.pages.push(page);
        } else {
            self.pages[index] = page;
        }
        while let Some(next) = self.parked.remove(&self.pages.len()) {
            self.pages.push(next);
        }
        self.exhausted = self.pages.last().is_some_and(|p| !p.has_next_page);
        Ok(CommitOutcome::Applied)
    }

    /// Release the in-flight marker of a failed fetch. A `Malformed` failure
    /// blocks further loading until the next reset.
    pub fn abandon_fetch(&mut self, ticket: &FetchTicket, error: &FetchError) -> Result<(), StoreError> {
        self.check_current(ticket)?;
        self.in_flight.remove(&ticket.page_index);
        if matches!(error, FetchError::Malformed(_)) {
            self.blocked = Some(error.clone());
        }
        Ok(())
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn blocked(&self) -> Option<&FetchError> {
        self.blocked.as_ref()
    }

    /// More pages may exist and nothing prevents loading them
    pub fn has_more(&self) -> bool {
        !self.exhausted && self.blocked.is_none()
    }

    pub fn is_in_flight(&self, page_index: usize) -> bool {
        self.in_flight.contains(&page_index)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of pages in the contiguous prefix
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[Page<T>] {
        &self.pages
    }

    /// Lowest index not yet committed, parked, or in flight
    pub fn next_page_index(&self) -> usize {
        let mut index = self.pages.len();
        while self.parked.contains_key(&index) || self.in_flight.contains(&index) {
            index += 1;
        }
        index
    }

    fn is_committed(&self, page_index: usize) -> bool {
        page_index < self.pages.len() || self.parked.contains_key(&page_index)
    }

    fn ticket(&self, page_index: usize) -> FetchTicket {
        FetchTicket {
            context: self.context.clone(),
            epoch: self.epoch,
            page_index,
        }
    }

    fn check_current(&self, ticket: &FetchTicket) -> Result<(), StoreError> {
        if ticket.epoch != self.epoch || ticket.context != self.context {
            return Err(StoreError::StaleCommit {
                page_index: ticket.page_index,
            });
        }
        Ok(())
    }
}

impl<T: Identified + Clone> PaginationStore<T> {
    /// Items of the contiguous prefix in page order. An item whose identity
    /// already appeared on an earlier page is skipped.
    pub fn flatten(&self) -> Vec<T> {
        let mut seen = HashSet::new();
        self.pages
            .iter()
            .flat_map(|p| p.items.iter())
            .filter(|item| seen.insert(item.id()))
            .cloned()
            .collect()
    }
}
