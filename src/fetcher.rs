//! Page fetching from the upstream marketplace API.
//!
//! A [`PageFetcher`] performs exactly one request per call and never touches a
//! store; the scroll controller applies results. [`DedupFetcher`] shares a
//! single in-flight request between concurrent callers asking for the same key.

use crate::query_key::PageKey;
use crate::types::Page;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Transient; callers may retry
    #[error("network error: {0}")]
    Network(String),
    /// Terminal for the requested key
    #[error("not found: {0}")]
    NotFound(String),
    /// Terminal; the response did not match the expected schema
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Network(_))
    }
}

#[async_trait]
pub trait PageFetcher<T: Send + 'static>: Send + Sync {
    async fn fetch(&self, key: &PageKey) -> Result<Page<T>, FetchError>;
}

/// Map a non-success HTTP status onto the fetch error taxonomy
pub fn classify_status(status: u16, body: &str) -> Option<FetchError> {
    match status {
        200..=299 => None,
        404 | 410 => Some(FetchError::NotFound(format!("http {status}"))),
        408 | 429 | 500..=599 => Some(FetchError::Network(format!("http {status}"))),
        _ => Some(FetchError::Malformed(format!("http {status}: {body}"))),
    }
}

#[derive(Deserialize)]
struct RawPage<T> {
    #[serde(alias = "activities", alias = "offers")]
    items: Vec<T>,
    #[serde(default, rename = "hasNextPage", alias = "has_next_page")]
    has_next_page: Option<bool>,
}

/// Decode one page body. When the service omits `hasNextPage` a full page
/// is taken to mean more may follow.
pub fn parse_page<T: DeserializeOwned>(body: &str, page_size: usize) -> Result<Page<T>, FetchError> {
    let raw: RawPage<T> =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;
    let has_next_page = raw
        .has_next_page
        .unwrap_or(raw.items.len() >= page_size);
    Ok(Page::new(raw.items, has_next_page))
}

/// REST fetcher: `GET {base_url}{path}?...&limit=..&offset=..`
#[derive(Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpPageFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            auth_token: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl<T> PageFetcher<T> for HttpPageFetcher
where
    T: DeserializeOwned + Send + 'static,
{
    async fn fetch(&self, key: &PageKey) -> Result<Page<T>, FetchError> {
        let url = key.request().to_url(&self.base_url);
        log::debug!("[fetch] GET {url}");

        let mut request = self.client.get(&url).timeout(self.timeout);
        if let Some(token) = &self.auth_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if let Some(err) = classify_status(status, &body) {
            log::debug!("[fetch] {} page {} failed: {err}", key.context, key.page_index);
            return Err(err);
        }

        parse_page(&body, key.limit())
    }
}

type SharedFetch<T> = Shared<BoxFuture<'static, Result<Page<T>, FetchError>>>;
type InFlight<T> = Mutex<HashMap<PageKey, Entry<T>>>;

struct Entry<T> {
    id: u64,
    waiters: usize,
    fut: SharedFetch<T>,
}

/// Collapses concurrent fetches of the same [`PageKey`] into one upstream call.
///
/// A shared request lives only while someone awaits it. When every waiter has
/// gone (completed, or dropped by a timeout) the entry is removed and the next
/// call starts a fresh request.
pub struct DedupFetcher<T: Clone + Send + Sync + 'static> {
    inner: Arc<dyn PageFetcher<T>>,
    in_flight: InFlight<T>,
    next_id: AtomicU64,
}

/// Releases one waiter's claim on an entry, on completion or on drop
struct Waiter<'a, T> {
    in_flight: &'a InFlight<T>,
    key: &'a PageKey,
    id: u64,
    finished: bool,
}

impl<T> Drop for Waiter<'_, T> {
    fn drop(&mut self) {
        let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = map.get_mut(self.key) else {
            return;
        };
        if entry.id != self.id {
            return;
        }
        entry.waiters = entry.waiters.saturating_sub(1);
        if self.finished || entry.waiters == 0 {
            if !self.finished {
                log::debug!(
                    "[fetch] abandoning in-flight request for page {}",
                    self.key.page_index
                );
            }
            map.remove(self.key);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> DedupFetcher<T> {
    pub fn new(inner: Arc<dyn PageFetcher<T>>) -> Self {
        Self {
            inner,
            in_flight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> PageFetcher<T> for DedupFetcher<T> {
    async fn fetch(&self, key: &PageKey) -> Result<Page<T>, FetchError> {
        let (id, fut) = {
            let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = map.get_mut(key) {
                log::debug!("[fetch] joining in-flight request for page {}", key.page_index);
                entry.waiters += 1;
                (entry.id, entry.fut.clone())
            } else {
                let inner = Arc::clone(&self.inner);
                let owned_key = key.clone();
                let fut = async move { inner.fetch(&owned_key).await }
                    .boxed()
                    .shared();
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                map.insert(
                    key.clone(),
                    Entry {
                        id,
                        waiters: 1,
                        fut: fut.clone(),
                    },
                );
                (id, fut)
            }
        };

        let mut waiter = Waiter {
            in_flight: &self.in_flight,
            key,
            id,
            finished: false,
        };
        let result = fut.await;
        waiter.finished = true;
        result
    }
}
