//! Page keys and their wire encoding.
//!
//! A [`PageKey`] is the identity of one page of one [`FilterContext`]. The
//! fetcher de-duplicates in-flight requests by key and the store matches
//! commits against it, so the key and the request it encodes must carry every
//! field that changes what the server returns.

use crate::types::{FilterContext, FilterType};
use serde_json::json;
use std::num::NonZeroUsize;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub context: FilterContext,
    pub page_index: usize,
    pub page_size: NonZeroUsize,
}

/// Derive the key for `page_index` of `context`. Pure; equal inputs give equal keys.
pub fn build_key(context: &FilterContext, page_index: usize, page_size: NonZeroUsize) -> PageKey {
    PageKey {
        context: context.clone(),
        page_index,
        page_size,
    }
}

/// Path + ordered query pairs for one page request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub path: &'static str,
    pub query: Vec<(String, String)>,
}

impl PageKey {
    pub fn offset(&self) -> usize {
        self.page_index.saturating_mul(self.page_size.get())
    }

    pub fn limit(&self) -> usize {
        self.page_size.get()
    }

    /// Offset/limit request for the upstream REST service
    pub fn request(&self) -> PageRequest {
        let ctx = &self.context;
        let mut query: Vec<(String, String)> = Vec::new();

        let path = match ctx.filter_type() {
            FilterType::ProfileActivity(filter) => {
                query.push(("address".into(), ctx.subject_id().to_string()));
                query.push((
                    "activity_types".into(),
                    json!(filter.activity_types()).to_string(),
                ));
                "/users/activities"
            }
            FilterType::ProfileOffers(filter) => {
                query.push(("address".into(), ctx.subject_id().to_string()));
                if let Some(offer_type) = filter.offer_type() {
                    query.push(("offer_type".into(), offer_type.to_string()));
                }
                "/users/offers"
            }
            FilterType::CollectionActivity(filter) => {
                query.push(("id".into(), ctx.subject_id().to_string()));
                query.push((
                    "activity_types".into(),
                    json!(filter.activity_types()).to_string(),
                ));
                "/collections/activities"
            }
        };

        for (k, v) in ctx.extra_params() {
            query.push((k.clone(), v.clone()));
        }

        query.push(("limit".into(), self.limit().to_string()));
        query.push(("offset".into(), self.offset().to_string()));

        PageRequest { path, query }
    }
}

impl PageRequest {
    /// Join onto `base_url`, percent-encoding every value
    pub fn to_url(&self, base_url: &str) -> String {
        let qs = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}{}?{}", base_url.trim_end_matches('/'), self.path, qs)
    }
}
