//! In-memory upstream used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use marketfeed::fetcher::{FetchError, PageFetcher};
use marketfeed::query_key::PageKey;
use marketfeed::types::{FilterContext, Identified, Page};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Row {
    pub id: String,
}

impl Row {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Identified for Row {
    type Id = String;
    fn id(&self) -> String {
        self.id.clone()
    }
}

pub fn rows(prefix: &str, n: usize) -> Vec<Row> {
    (0..n).map(|i| Row::new(format!("{prefix}{i}"))).collect()
}

pub fn ids(items: &[Row]) -> Vec<String> {
    items.iter().map(|r| r.id.clone()).collect()
}

pub fn shared(catalog: &Arc<Catalog>) -> Arc<dyn PageFetcher<Row>> {
    catalog.clone()
}

/// Serves offset/limit slices of a fixed catalog per context
#[derive(Default)]
pub struct Catalog {
    items: Mutex<HashMap<FilterContext, Vec<Row>>>,
    latency: Mutex<HashMap<FilterContext, Duration>>,
    failures: Mutex<HashMap<usize, VecDeque<FetchError>>>,
    calls: Mutex<Vec<PageKey>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, context: &FilterContext, items: Vec<Row>) {
        self.items.lock().unwrap().insert(context.clone(), items);
    }

    pub fn delay(&self, context: &FilterContext, latency: Duration) {
        self.latency.lock().unwrap().insert(context.clone(), latency);
    }

    /// The next fetch of `page_index` fails with `error` (queued per call)
    pub fn fail(&self, page_index: usize, error: FetchError) {
        self.failures
            .lock()
            .unwrap()
            .entry(page_index)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<PageKey> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher<Row> for Catalog {
    async fn fetch(&self, key: &PageKey) -> Result<Page<Row>, FetchError> {
        self.calls.lock().unwrap().push(key.clone());
        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&key.page_index)
            .and_then(|q| q.pop_front());
        let latency = self.latency.lock().unwrap().get(&key.context).copied();

        match latency {
            Some(d) => tokio::time::sleep(d).await,
            None => tokio::task::yield_now().await,
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let all = self
            .items
            .lock()
            .unwrap()
            .get(&key.context)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(key.context.to_string()))?;
        let start = key.offset().min(all.len());
        let end = (start + key.limit()).min(all.len());
        Ok(Page::new(all[start..end].to_vec(), end < all.len()))
    }
}
