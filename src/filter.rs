//! Filter selection for a feed view.
//!
//! The active [`FilterContext`] is derived from the subject (profile address or
//! collection id), the selected [`FilterType`] and any extra parameters. Any
//! change that yields a different context resets pagination and requests page 0
//! in the same call. Changes queued with [`FilterController::request_filter_change`]
//! are coalesced: only the last one is applied.

use crate::feed::Feed;
use crate::fetcher::PageFetcher;
use crate::net::RetryPolicy;
use crate::scroll::InfiniteScrollController;
use crate::types::{FilterContext, FilterType, Identified};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub fn derive_context(
    subject_id: &str,
    filter: FilterType,
    extra_params: &BTreeMap<String, String>,
) -> FilterContext {
    extra_params
        .iter()
        .fold(FilterContext::new(subject_id, filter), |ctx, (k, v)| {
            ctx.with_param(k.clone(), v.clone())
        })
}

pub struct FilterController<T: Send + 'static> {
    subject_id: String,
    filter: FilterType,
    extra_params: BTreeMap<String, String>,
    pending: Option<FilterType>,
    scroll: InfiniteScrollController<T>,
}

impl<T: Send + 'static> FilterController<T> {
    /// Nothing is fetched until [`FilterController::activate`]
    pub fn new(
        subject_id: impl Into<String>,
        filter: FilterType,
        fetcher: Arc<dyn PageFetcher<T>>,
        page_size: NonZeroUsize,
        policy: RetryPolicy,
    ) -> Self {
        let subject_id = subject_id.into();
        let extra_params = BTreeMap::new();
        let context = derive_context(&subject_id, filter, &extra_params);
        Self {
            subject_id,
            filter,
            extra_params,
            pending: None,
            scroll: InfiniteScrollController::new(context, fetcher, page_size, policy),
        }
    }

    /// First activation of the view: reset under the current context and load page 0
    pub fn activate(&mut self) -> Option<usize> {
        let context = self.current_context();
        log::info!("[filter] activating {context}");
        self.scroll.reset(context);
        self.scroll.load_more()
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn filter(&self) -> FilterType {
        self.filter
    }

    pub fn context(&self) -> &FilterContext {
        self.scroll.context()
    }

    pub fn scroll(&self) -> &InfiniteScrollController<T> {
        &self.scroll
    }

    pub fn scroll_mut(&mut self) -> &mut InfiniteScrollController<T> {
        &mut self.scroll
    }

    /// Queue a filter change; a later request replaces an unapplied earlier one
    pub fn request_filter_change(&mut self, filter: FilterType) {
        if let Some(prev) = self.pending.replace(filter) {
            log::debug!("[filter] coalescing {prev} -> {filter}");
        }
    }

    pub fn has_pending_change(&self) -> bool {
        self.pending.is_some()
    }

    /// Apply the latest queued change. Returns true if pagination restarted.
    pub fn apply_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(filter) => {
                self.filter = filter;
                self.apply_context()
            }
            None => false,
        }
    }

    /// Change the filter now: reset and request page 0 unless the context is unchanged
    pub fn change_filter(&mut self, filter: FilterType) -> bool {
        self.request_filter_change(filter);
        self.apply_pending()
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        self.extra_params.insert(key.into(), value.into());
        self.apply_context()
    }

    pub fn clear_param(&mut self, key: &str) -> bool {
        if self.extra_params.remove(key).is_none() {
            return false;
        }
        self.apply_context()
    }

    fn current_context(&self) -> FilterContext {
        derive_context(&self.subject_id, self.filter, &self.extra_params)
    }

    fn apply_context(&mut self) -> bool {
        let context = self.current_context();
        if &context == self.scroll.context() {
            log::debug!("[filter] context unchanged ({context}); keeping pages");
            return false;
        }
        log::info!("[filter] switching to {context}");
        self.scroll.reset(context);
        self.scroll.load_more();
        true
    }
}

impl<T: Identified + Clone + Send + 'static> Feed for FilterController<T> {
    type Item = T;
    type Filter = FilterType;

    fn items(&self) -> Vec<T> {
        self.scroll.items()
    }

    fn is_loading(&self) -> bool {
        self.scroll.is_loading()
    }

    fn has_more(&self) -> bool {
        self.scroll.has_more()
    }

    fn load_more(&mut self) {
        self.scroll.load_more();
    }

    fn on_filter_change(&mut self, filter: FilterType) {
        self.change_filter(filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::mock::ScriptedFetcher;
    use crate::scroll::Applied;
    use crate::types::{ActivityFilter, OffersFilter, Page};

    #[derive(Clone, Debug, PartialEq)]
    struct Row(&'static str);

    impl Identified for Row {
        type Id = &'static str;
        fn id(&self) -> &'static str {
            self.0
        }
    }

    fn activity(f: ActivityFilter) -> FilterType {
        FilterType::ProfileActivity(f)
    }

    fn controller(fetcher: Arc<ScriptedFetcher<Row>>) -> FilterController<Row> {
        FilterController::new(
            "wallet",
            activity(ActivityFilter::Listings),
            fetcher,
            NonZeroUsize::new(24).unwrap(),
            RetryPolicy::immediate(3),
        )
    }

    fn ctx(f: ActivityFilter) -> FilterContext {
        FilterContext::new("wallet", activity(f))
    }

    #[tokio::test]
    async fn test_activate_loads_first_page() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.push(0, Ok(Page::new(vec![Row("a")], false)));
        let mut ctl = controller(fetcher);

        assert_eq!(ctl.activate(), Some(0));
        assert!(ctl.is_loading());
        ctl.scroll_mut().settle().await;
        assert_eq!(ctl.items(), vec![Row("a")]);
        assert!(!ctl.has_more());
    }

    #[tokio::test]
    async fn test_rapid_changes_leave_only_last_context() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.push_for(&ctx(ActivityFilter::Listings), 0, Ok(Page::new(vec![Row("l")], false)));
        fetcher.push_for(&ctx(ActivityFilter::Offers), 0, Ok(Page::new(vec![Row("o")], false)));
        fetcher.push_for(&ctx(ActivityFilter::Sales), 0, Ok(Page::new(vec![Row("s")], false)));
        let mut ctl = controller(fetcher);

        ctl.activate();
        ctl.on_filter_change(activity(ActivityFilter::Offers));
        ctl.on_filter_change(activity(ActivityFilter::Sales));

        let applied = ctl.scroll_mut().settle().await;
        assert_eq!(applied.iter().filter(|a| **a == Applied::Stale).count(), 2);
        assert_eq!(ctl.context(), &ctx(ActivityFilter::Sales));
        assert_eq!(ctl.items(), vec![Row("s")]);
    }

    #[tokio::test]
    async fn test_queued_changes_coalesce_to_latest() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let mut ctl = controller(fetcher.clone());

        ctl.request_filter_change(activity(ActivityFilter::Offers));
        ctl.request_filter_change(activity(ActivityFilter::Sales));
        ctl.request_filter_change(activity(ActivityFilter::Listings));
        ctl.request_filter_change(activity(ActivityFilter::Sales));
        assert!(ctl.apply_pending());
        assert!(!ctl.has_pending_change());
        assert!(!ctl.apply_pending());

        ctl.scroll_mut().settle().await;
        assert_eq!(ctl.context(), &ctx(ActivityFilter::Sales));
        let fetched: Vec<FilterContext> = fetcher.calls().into_iter().map(|k| k.context).collect();
        assert_eq!(fetched, vec![ctx(ActivityFilter::Sales)]);
    }

    #[tokio::test]
    async fn test_equal_context_keeps_accumulated_pages() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.push(0, Ok(Page::new(vec![Row("a")], true)));
        let mut ctl = controller(fetcher.clone());
        ctl.activate();
        ctl.scroll_mut().settle().await;

        assert!(!ctl.change_filter(activity(ActivityFilter::Listings)));
        assert_eq!(ctl.items(), vec![Row("a")]);
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_extra_params_change_context() {
        let fetcher = Arc::new(ScriptedFetcher::<Row>::new());
        let mut ctl = controller(fetcher.clone());
        ctl.activate();

        assert!(ctl.set_param("sort", "price"));
        assert!(!ctl.set_param("sort", "price"));
        assert_eq!(ctl.context().extra_params().get("sort").map(String::as_str), Some("price"));
        assert!(ctl.clear_param("sort"));
        assert!(!ctl.clear_param("sort"));
        ctl.scroll_mut().settle().await;

        let last = fetcher.calls().pop().unwrap();
        assert!(last.context.extra_params().is_empty());
    }

    #[test]
    fn test_derive_context_is_structural() {
        let mut params = BTreeMap::new();
        params.insert("sort".to_string(), "desc".to_string());
        let a = derive_context("w", FilterType::ProfileOffers(OffersFilter::Placed), &params);
        let b = FilterContext::new("w", FilterType::ProfileOffers(OffersFilter::Placed))
            .with_param("sort", "desc");
        assert_eq!(a, b);
    }
}
