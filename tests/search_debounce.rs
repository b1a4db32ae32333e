//! Global search typed through the public session API

use async_trait::async_trait;
use marketfeed::fetcher::FetchError;
use marketfeed::net::RetryPolicy;
use marketfeed::search::{
    NftHit, SearchEvent, SearchFetcher, SearchRequest, SearchResults, SearchSession,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records requests and answers after an optional per-term delay
#[derive(Default)]
struct Upstream {
    requests: Mutex<Vec<SearchRequest>>,
    slow: Mutex<Vec<(String, Duration)>>,
    failures: Mutex<VecDeque<FetchError>>,
}

impl Upstream {
    fn terms(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.term.clone())
            .collect()
    }
}

#[async_trait]
impl SearchFetcher for Upstream {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResults, FetchError> {
        self.requests.lock().unwrap().push(request.clone());
        let failure = self.failures.lock().unwrap().pop_front();
        let delay = self
            .slow
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _)| *t == request.term)
            .map(|(_, d)| *d);
        tokio::time::sleep(delay.unwrap_or(Duration::from_millis(5))).await;
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(SearchResults {
            collections: vec![NftHit {
                address: format!("col-{}", request.term),
                ..NftHit::default()
            }],
            ..SearchResults::default()
        })
    }
}

fn session(upstream: &Arc<Upstream>, debounce_ms: u64) -> SearchSession {
    SearchSession::new(
        upstream.clone(),
        3,
        Duration::from_millis(debounce_ms),
        RetryPolicy::immediate(1),
    )
}

#[tokio::test(start_paused = true)]
async fn typing_sol_char_by_char_fetches_once() {
    let upstream = Arc::new(Upstream::default());
    let mut s = session(&upstream, 0);

    s.on_input("S");
    s.on_input("So");
    assert!(upstream.terms().is_empty());
    assert!(!s.searching());

    s.on_input("Sol");
    assert!(s.searching());
    s.settle().await;

    assert_eq!(upstream.terms(), vec!["Sol"]);
    let req = upstream.requests.lock().unwrap()[0].clone();
    assert_eq!(req.wallet_address, "Sol");
    assert_eq!(req.mint_address, "Sol");
    assert!(s.has_results());
}

#[tokio::test(start_paused = true)]
async fn retyping_same_term_does_not_refetch() {
    let upstream = Arc::new(Upstream::default());
    let mut s = session(&upstream, 250);

    s.on_input("Sol");
    s.settle().await;
    s.on_input("Sola");
    s.on_input("Sol");
    s.settle().await;

    assert_eq!(upstream.terms(), vec!["Sol"]);
}

#[tokio::test(start_paused = true)]
async fn slow_earlier_term_does_not_overwrite_newer_results() {
    let upstream = Arc::new(Upstream::default());
    upstream
        .slow
        .lock()
        .unwrap()
        .push(("Sol".into(), Duration::from_secs(2)));
    let mut s = session(&upstream, 0);
    let mut events = s.subscribe();

    s.on_input("Sol");
    s.on_input("Solana");
    s.settle().await;

    assert_eq!(upstream.terms(), vec!["Sol", "Solana"]);
    assert_eq!(s.results().unwrap().collections[0].address, "col-Solana");
    assert_eq!(
        events.drain(),
        vec![SearchEvent::Updated {
            term: "Solana".into(),
            has_results: true
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn clearing_the_box_drops_results() {
    let upstream = Arc::new(Upstream::default());
    let mut s = session(&upstream, 0);
    let mut events = s.subscribe();

    s.on_input("Sol");
    s.settle().await;
    assert!(s.results().is_some());

    s.on_input("");
    assert!(s.results().is_none());
    assert!(!s.has_results());
    assert_eq!(events.drain().last(), Some(&SearchEvent::Cleared));
}

#[tokio::test(start_paused = true)]
async fn failed_search_is_reported_and_refreshable() {
    let upstream = Arc::new(Upstream::default());
    upstream
        .failures
        .lock()
        .unwrap()
        .push_back(FetchError::Network("503".into()));
    let mut s = session(&upstream, 0);
    let mut events = s.subscribe();

    s.on_input("degods");
    s.settle().await;
    assert!(matches!(
        events.drain().as_slice(),
        [SearchEvent::Failed { term, .. }] if term == "degods"
    ));
    assert!(!s.searching());

    assert!(s.refresh_search());
    s.settle().await;
    assert_eq!(upstream.terms(), vec!["degods", "degods"]);
    assert!(s.has_results());
}
