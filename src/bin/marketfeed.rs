// Native binary for marketfeed - page through a feed or run a search, printing JSON lines

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use marketfeed::{
    config::{load, Config, FeedKind, Mode},
    feed::FeedEvent,
    fetcher::{DedupFetcher, HttpPageFetcher, PageFetcher},
    filter::FilterController,
    search::{HttpSearchFetcher, SearchEvent, SearchSession},
    types::{ActivityItem, FilterType, Identified, OfferItem},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (safe to ignore if not found)
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = load().context("Failed to load configuration")?;
    if log::log_enabled!(log::Level::Debug) {
        cfg.print_summary();
    }

    let mode = cfg
        .mode
        .clone()
        .ok_or_else(|| anyhow!("nothing to do: pass --feed/--subject or --search"))?;

    tokio::select! {
        res = run(&cfg, mode) => res,
        _ = tokio::signal::ctrl_c() => {
            log::info!("🛑 interrupted");
            Ok(())
        }
    }
}

async fn run(cfg: &Config, mode: Mode) -> Result<()> {
    match mode {
        Mode::Feed {
            kind,
            subject,
            filter,
            pages,
        } => match kind {
            FeedKind::ProfileOffers => run_feed::<OfferItem>(cfg, subject, filter, pages).await,
            FeedKind::ProfileActivity | FeedKind::CollectionActivity => {
                run_feed::<ActivityItem>(cfg, subject, filter, pages).await
            }
        },
        Mode::Search { term } => run_search(cfg, &term).await,
    }
}

fn page_fetcher<T>(cfg: &Config) -> Arc<dyn PageFetcher<T>>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let http = HttpPageFetcher::new(cfg.api_url.clone())
        .with_auth_token(cfg.api_auth_token.clone())
        .with_timeout(cfg.fetch_timeout());
    Arc::new(DedupFetcher::new(Arc::new(http)))
}

async fn run_feed<T>(cfg: &Config, subject: String, filter: FilterType, pages: usize) -> Result<()>
where
    T: DeserializeOwned + Serialize + Identified + Clone + Send + Sync + 'static,
{
    let mut feed = FilterController::new(
        subject,
        filter,
        page_fetcher::<T>(cfg),
        cfg.page_size(),
        cfg.fetch_policy(),
    );
    let mut events = feed.scroll().subscribe();

    log::info!("📥 loading {} ({} page(s) max)", feed.context(), pages);
    feed.activate();
    let mut loaded = 0usize;

    loop {
        feed.scroll_mut().settle().await;
        for event in events.drain() {
            match event {
                FeedEvent::LoadMoreFailed { page_index, error, .. } => {
                    log::warn!("⚠️  page {page_index} failed: {error}");
                }
                FeedEvent::PageBlocked { page_index, error } => {
                    log::error!("❌ page {page_index} blocked: {error}");
                }
                FeedEvent::Changed { item_count, has_more } => {
                    log::info!("✅ {item_count} items (more: {has_more})");
                }
                FeedEvent::Reset { .. } => {}
            }
        }

        loaded += 1;
        let snapshot = feed.scroll().snapshot();
        if snapshot.retry_available || !snapshot.has_more || loaded >= pages {
            println!("{}", serde_json::to_string(&snapshot)?);
            break;
        }
        if feed.scroll_mut().load_more().is_none() {
            println!("{}", serde_json::to_string(&snapshot)?);
            break;
        }
    }
    Ok(())
}

async fn run_search(cfg: &Config, term: &str) -> Result<()> {
    let fetcher = Arc::new(HttpSearchFetcher::new(
        cfg.graphql_url.clone(),
        cfg.fetch_timeout(),
    ));
    let mut session = SearchSession::new(
        fetcher,
        cfg.search_min_len,
        cfg.search_debounce(),
        cfg.fetch_policy(),
    );
    let mut events = session.subscribe();

    log::info!("🔎 searching '{term}'");
    session.on_input(term);
    session.settle().await;

    for event in events.drain() {
        match event {
            SearchEvent::Cleared => {
                log::warn!("term shorter than {} characters; nothing sent", cfg.search_min_len)
            }
            SearchEvent::Failed { error, .. } => return Err(anyhow!("search failed: {error}")),
            SearchEvent::Updated { has_results, .. } => {
                log::info!("✅ search done (results: {has_results})");
            }
        }
    }

    if let Some(results) = session.results() {
        println!("{}", serde_json::to_string(results)?);
    }
    Ok(())
}
