use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Activity feed selector (profile activity and collection activity)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityFilter {
    Listings,
    Offers,
    Sales,
}

impl ActivityFilter {
    /// Server-side `activity_types` values this selection expands to
    pub fn activity_types(self) -> &'static [&'static str] {
        match self {
            ActivityFilter::Listings => &["listing", "cancel_listing"],
            ActivityFilter::Offers => &["bid", "cancel_bid"],
            ActivityFilter::Sales => &["purchase"],
        }
    }
}

impl std::str::FromStr for ActivityFilter {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "listings" | "listing" => Ok(ActivityFilter::Listings),
            "offers" | "bid" | "bids" => Ok(ActivityFilter::Offers),
            "sales" | "transaction" | "purchase" => Ok(ActivityFilter::Sales),
            _ => Err(anyhow!(
                "Invalid activity filter '{s}'. Valid options: listings, offers, sales"
            )),
        }
    }
}

impl std::fmt::Display for ActivityFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityFilter::Listings => write!(f, "listings"),
            ActivityFilter::Offers => write!(f, "offers"),
            ActivityFilter::Sales => write!(f, "sales"),
        }
    }
}

/// Offers feed selector (profile offers)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffersFilter {
    All,
    Received,
    Placed,
}

impl OffersFilter {
    /// `offer_type` wire value; `All` sends no offer type at all
    pub fn offer_type(self) -> Option<&'static str> {
        match self {
            OffersFilter::All => None,
            OffersFilter::Received => Some("OFFER_RECEIVED"),
            OffersFilter::Placed => Some("OFFER_PLACED"),
        }
    }
}

impl std::str::FromStr for OffersFilter {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "all" => Ok(OffersFilter::All),
            "received" | "offer_received" => Ok(OffersFilter::Received),
            "placed" | "offer_placed" => Ok(OffersFilter::Placed),
            _ => Err(anyhow!(
                "Invalid offers filter '{s}'. Valid options: all, received, placed"
            )),
        }
    }
}

impl std::fmt::Display for OffersFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OffersFilter::All => write!(f, "all"),
            OffersFilter::Received => write!(f, "received"),
            OffersFilter::Placed => write!(f, "placed"),
        }
    }
}

/// Which paginated series is being viewed, together with its discrete filter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "feed", content = "filter", rename_all = "snake_case")]
pub enum FilterType {
    ProfileActivity(ActivityFilter),
    ProfileOffers(OffersFilter),
    CollectionActivity(ActivityFilter),
}

impl std::fmt::Display for FilterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterType::ProfileActivity(a) => write!(f, "profile-activity:{a}"),
            FilterType::ProfileOffers(o) => write!(f, "profile-offers:{o}"),
            FilterType::CollectionActivity(a) => write!(f, "collection-activity:{a}"),
        }
    }
}

/// Immutable description of one paginated series: subject + filter selection.
///
/// Equality is structural. Two contexts built from the same inputs are equal,
/// and pages accumulated under one are reusable under the other.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterContext {
    subject_id: String,
    filter_type: FilterType,
    extra_params: BTreeMap<String, String>,
}

impl FilterContext {
    pub fn new(subject_id: impl Into<String>, filter_type: FilterType) -> Self {
        Self {
            subject_id: subject_id.into(),
            filter_type,
            extra_params: BTreeMap::new(),
        }
    }

    /// Returns a copy with one extra server parameter set
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.insert(key.into(), value.into());
        self
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    pub fn extra_params(&self) -> &BTreeMap<String, String> {
        &self.extra_params
    }
}

impl std::fmt::Display for FilterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.filter_type, self.subject_id)?;
        for (k, v) in &self.extra_params {
            write!(f, " {k}={v}")?;
        }
        Ok(())
    }
}

/// One fetched page. Never mutated after construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_next_page: bool,
    pub fetched_at: DateTime<Utc>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, has_next_page: bool) -> Self {
        Self {
            items,
            has_next_page,
            fetched_at: Utc::now(),
        }
    }

    /// Empty terminal page (used when a page key is not found upstream)
    pub fn empty_terminal() -> Self {
        Self::new(Vec::new(), false)
    }
}

/// Stable identity of a feed item, used to drop overlapping items across pages
pub trait Identified {
    type Id: Eq + Hash + Clone + Debug;
    fn id(&self) -> Self::Id;
}

/// Row of the profile/collection activity feed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub signature: String,
    pub mint: String,
    pub activity_type: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub seller: Option<String>,
    #[serde(default)]
    pub buyer: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub block_timestamp: Option<String>,
    // upstream field name is misspelled
    #[serde(
        default,
        rename = "martketplaceProgramAddress",
        alias = "marketplaceProgramAddress"
    )]
    pub marketplace_program_address: Option<String>,
    #[serde(default)]
    pub auction_house_address: Option<String>,
}

impl Identified for ActivityItem {
    type Id = String;
    fn id(&self) -> String {
        self.signature.clone()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferNft {
    pub mint_address: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

/// Row of the profile offers feed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferItem {
    pub id: String,
    pub buyer: String,
    #[serde(default)]
    pub sol_price: f64,
    #[serde(default)]
    pub nft: Option<OfferNft>,
    #[serde(default)]
    pub nft_marketplace: Option<String>,
    #[serde(default)]
    pub time_since: Option<String>,
}

impl Identified for OfferItem {
    type Id = String;
    fn id(&self) -> String {
        self.id.clone()
    }
}
