//! Global search box.
//!
//! [`SearchDebouncer`] is the pure state machine: it decides when a term is
//! worth dispatching and which completions still matter. [`SearchSession`]
//! drives it with a debounce timer and spawned fetch tasks, the same way the
//! scroll controller drives its store.

use crate::fetcher::FetchError;
use crate::net::{with_retry, RetryPolicy};
use crate::observer::{EventHub, Subscription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

pub const DEFAULT_MIN_TERM_LEN: usize = 3;

const SEARCH_QUERY: &str = r#"query search($term: String!, $walletAddress: PublicKey!, $nftMintAddress: String!) {
  profiles: searchProfiles(term: $term) { address handle profileImageUrl }
  wallet(address: $walletAddress) { address handle profileImageUrl }
  nfts: searchNfts(term: $term) { address name image mintAddress }
  collections: searchCollections(term: $term) { address name image mintAddress }
}"#;

/// The same literal is sent as free text, wallet address and mint address
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub term: String,
    pub wallet_address: String,
    #[serde(rename = "nftMintAddress")]
    pub mint_address: String,
}

impl SearchRequest {
    pub fn for_term(term: &str) -> Self {
        Self {
            term: term.to_string(),
            wallet_address: term.to_string(),
            mint_address: term.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletHit {
    pub address: String,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftHit {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub mint_address: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub profiles: Vec<WalletHit>,
    #[serde(default)]
    pub wallet: Option<WalletHit>,
    #[serde(default)]
    pub nfts: Vec<NftHit>,
    #[serde(default)]
    pub collections: Vec<NftHit>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty() && self.nfts.is_empty() && self.collections.is_empty()
    }
}

/// Solana public key shape: 32-44 base58 characters
pub fn is_public_key(s: &str) -> bool {
    const BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
    (32..=44).contains(&s.len()) && s.chars().all(|c| BASE58.contains(c))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchState {
    pub term: String,
    pub last_dispatched_term: Option<String>,
    pub results: Option<SearchResults>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchAction {
    /// Term too short; results dropped, nothing to fetch
    Cleared,
    /// Term already dispatched
    Unchanged,
    /// Fire after the debounce delay unless superseded
    Schedule { generation: u64 },
}

#[derive(Clone, Debug, PartialEq)]
pub enum SearchCompletion {
    Applied,
    /// The term is no longer the last dispatched one
    Stale,
    Failed(FetchError),
}

#[derive(Debug)]
pub struct SearchDebouncer {
    state: SearchState,
    min_len: usize,
    generation: u64,
    searching: bool,
    last_error: Option<FetchError>,
    // terms with a request outstanding, including superseded ones
    in_flight: HashSet<String>,
}

impl Default for SearchDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_TERM_LEN)
    }
}

impl SearchDebouncer {
    pub fn new(min_len: usize) -> Self {
        Self {
            state: SearchState::default(),
            min_len,
            generation: 0,
            searching: false,
            last_error: None,
            in_flight: HashSet::new(),
        }
    }

    fn long_enough(&self, term: &str) -> bool {
        term.trim().chars().count() >= self.min_len
    }

    pub fn input(&mut self, term: &str) -> SearchAction {
        if !self.long_enough(term) {
            self.generation += 1;
            self.searching = false;
            self.last_error = None;
            self.state = SearchState {
                term: term.to_string(),
                last_dispatched_term: None,
                results: None,
            };
            return SearchAction::Cleared;
        }

        self.state.term = term.to_string();
        if self.state.last_dispatched_term.as_deref() == Some(term) {
            // supersede any timer scheduled for an intermediate term
            self.generation += 1;
            return SearchAction::Unchanged;
        }
        self.generation += 1;
        SearchAction::Schedule {
            generation: self.generation,
        }
    }

    /// Debounce timer elapsed for `generation`
    pub fn fire(&mut self, generation: u64) -> Option<SearchRequest> {
        if generation != self.generation || !self.long_enough(&self.state.term) {
            return None;
        }
        if self.state.last_dispatched_term.as_deref() == Some(self.state.term.as_str()) {
            return None;
        }
        let term = self.state.term.clone();
        self.dispatch(term)
    }

    /// Re-dispatch the last dispatched term. No-op while its request is still out.
    pub fn refresh(&mut self) -> Option<SearchRequest> {
        let term = self.state.last_dispatched_term.clone()?;
        if self.in_flight.contains(&term) {
            log::debug!("[search] '{term}' already in flight; refresh skipped");
            return None;
        }
        self.dispatch(term)
    }

    /// Returns `None` when a request for `term` is already outstanding; its
    /// completion is adopted instead of sending a second one.
    fn dispatch(&mut self, term: String) -> Option<SearchRequest> {
        self.state.last_dispatched_term = Some(term.clone());
        self.searching = true;
        if !self.in_flight.insert(term.clone()) {
            log::debug!("[search] awaiting outstanding request for '{term}'");
            return None;
        }
        log::debug!("[search] dispatching '{term}'");
        Some(SearchRequest::for_term(&term))
    }

    pub fn is_in_flight(&self, term: &str) -> bool {
        self.in_flight.contains(term)
    }

    pub fn complete(&mut self, term: &str, result: Result<SearchResults, FetchError>) -> SearchCompletion {
        self.in_flight.remove(term);
        if self.state.last_dispatched_term.as_deref() != Some(term) {
            log::debug!("[search] discarding stale results for '{term}'");
            return SearchCompletion::Stale;
        }
        self.searching = false;
        match result {
            Ok(results) => {
                self.state.results = Some(results);
                self.last_error = None;
                SearchCompletion::Applied
            }
            Err(e) => {
                log::warn!("[search] '{term}' failed: {e}");
                self.last_error = Some(e.clone());
                SearchCompletion::Failed(e)
            }
        }
    }

    pub fn state(&self) -> &SearchState {
        &self.state
    }

    pub fn searching(&self) -> bool {
        self.searching
    }

    pub fn last_error(&self) -> Option<&FetchError> {
        self.last_error.as_ref()
    }

    /// Any result collection is non-empty, or the term itself is an address
    pub fn has_results(&self) -> bool {
        let any = self.state.results.as_ref().is_some_and(|r| !r.is_empty());
        any || (self.long_enough(&self.state.term) && is_public_key(self.state.term.trim()))
    }
}

#[async_trait]
pub trait SearchFetcher: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResults, FetchError>;
}

/// Decode a GraphQL envelope carrying [`SearchResults`] under `data`
pub fn parse_search_response(body: &str) -> Result<SearchResults, FetchError> {
    let v: Value = serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;
    if let Some(errors) = v.get("errors").and_then(|e| e.as_array()) {
        if !errors.is_empty() {
            let msg = errors[0]
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("graphql error");
            return Err(FetchError::Malformed(msg.to_string()));
        }
    }
    let data = v
        .get("data")
        .cloned()
        .ok_or_else(|| FetchError::Malformed("missing data".into()))?;
    serde_json::from_value(data).map_err(|e| FetchError::Malformed(e.to_string()))
}

pub struct HttpSearchFetcher {
    client: reqwest::Client,
    graphql_url: String,
    timeout: Duration,
}

impl HttpSearchFetcher {
    pub fn new(graphql_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            graphql_url: graphql_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SearchFetcher for HttpSearchFetcher {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResults, FetchError> {
        let body = json!({ "query": SEARCH_QUERY, "variables": request });
        let response = self
            .client
            .post(&self.graphql_url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        if let Some(err) = crate::fetcher::classify_status(status, &text) {
            return Err(err);
        }
        parse_search_response(&text)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SearchEvent {
    Cleared,
    Updated { term: String, has_results: bool },
    Failed { term: String, error: FetchError },
}

enum SearchMsg {
    Fire(u64),
    Done {
        term: String,
        result: Result<SearchResults, FetchError>,
    },
}

/// Async driver around [`SearchDebouncer`]
pub struct SearchSession {
    debouncer: SearchDebouncer,
    fetcher: Arc<dyn SearchFetcher>,
    debounce: Duration,
    policy: RetryPolicy,
    tx: UnboundedSender<SearchMsg>,
    rx: UnboundedReceiver<SearchMsg>,
    outstanding: usize,
    events: EventHub<SearchEvent>,
}

impl SearchSession {
    pub fn new(
        fetcher: Arc<dyn SearchFetcher>,
        min_len: usize,
        debounce: Duration,
        policy: RetryPolicy,
    ) -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            debouncer: SearchDebouncer::new(min_len),
            fetcher,
            debounce,
            policy,
            tx,
            rx,
            outstanding: 0,
            events: EventHub::new(),
        }
    }

    pub fn subscribe(&self) -> Subscription<SearchEvent> {
        self.events.subscribe()
    }

    pub fn debouncer(&self) -> &SearchDebouncer {
        &self.debouncer
    }

    /// Text box changed
    pub fn on_input(&mut self, term: &str) {
        match self.debouncer.input(term) {
            SearchAction::Cleared => self.events.emit(SearchEvent::Cleared),
            SearchAction::Unchanged => {}
            SearchAction::Schedule { generation } if self.debounce.is_zero() => {
                self.fire(generation);
            }
            SearchAction::Schedule { generation } => {
                let tx = self.tx.clone();
                let delay = self.debounce;
                self.outstanding += 1;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(SearchMsg::Fire(generation));
                });
            }
        }
    }

    pub fn refresh_search(&mut self) -> bool {
        match self.debouncer.refresh() {
            Some(request) => {
                self.spawn_search(request);
                true
            }
            None => false,
        }
    }

    fn fire(&mut self, generation: u64) {
        if let Some(request) = self.debouncer.fire(generation) {
            self.spawn_search(request);
        }
    }

    fn spawn_search(&mut self, request: SearchRequest) {
        let fetcher = Arc::clone(&self.fetcher);
        let policy = self.policy.clone();
        let tx = self.tx.clone();
        self.outstanding += 1;
        let term = request.term.clone();
        let search = tokio::spawn(async move {
            let label = format!("search '{}'", request.term);
            with_retry(&label, &policy, || fetcher.search(&request)).await
        });
        // a panicking fetcher still reports, so the term is released
        tokio::spawn(async move {
            let result = search.await.unwrap_or_else(|e| {
                log::error!("[search] task for '{term}' failed: {e}");
                Err(FetchError::Network(format!("search task failed: {e}")))
            });
            let _ = tx.send(SearchMsg::Done { term, result });
        });
    }

    /// Handle the next timer or fetch completion; `None` when nothing is outstanding
    pub async fn pump(&mut self) -> Option<()> {
        let msg = match self.rx.try_recv() {
            Ok(m) => m,
            Err(_) if self.outstanding == 0 => return None,
            Err(_) => self.rx.recv().await?,
        };
        self.outstanding = self.outstanding.saturating_sub(1);
        match msg {
            SearchMsg::Fire(generation) => self.fire(generation),
            SearchMsg::Done { term, result } => match self.debouncer.complete(&term, result) {
                SearchCompletion::Applied => self.events.emit(SearchEvent::Updated {
                    term,
                    has_results: self.debouncer.has_results(),
                }),
                SearchCompletion::Failed(error) => {
                    self.events.emit(SearchEvent::Failed { term, error })
                }
                SearchCompletion::Stale => {}
            },
        }
        Some(())
    }

    pub async fn settle(&mut self) {
        while self.pump().await.is_some() {}
    }

    pub fn results(&self) -> Option<&SearchResults> {
        self.debouncer.state().results.as_ref()
    }

    pub fn has_results(&self) -> bool {
        self.debouncer.has_results()
    }

    pub fn searching(&self) -> bool {
        self.debouncer.searching()
    }
}
