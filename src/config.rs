use crate::net::RetryPolicy;
use crate::types::FilterType;
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedKind {
    ProfileActivity,
    ProfileOffers,
    CollectionActivity,
}

impl FeedKind {
    /// Combine with a filter name (`listings`, `received`, ...) into a [`FilterType`]
    pub fn with_filter(self, filter: &str) -> Result<FilterType> {
        Ok(match self {
            FeedKind::ProfileActivity => FilterType::ProfileActivity(filter.parse()?),
            FeedKind::ProfileOffers => FilterType::ProfileOffers(filter.parse()?),
            FeedKind::CollectionActivity => FilterType::CollectionActivity(filter.parse()?),
        })
    }

    pub fn default_filter(self) -> &'static str {
        match self {
            FeedKind::ProfileOffers => "all",
            _ => "listings",
        }
    }
}

impl std::str::FromStr for FeedKind {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "profile-activity" | "activity" => Ok(FeedKind::ProfileActivity),
            "profile-offers" | "offers" => Ok(FeedKind::ProfileOffers),
            "collection-activity" | "collection" => Ok(FeedKind::CollectionActivity),
            _ => Err(anyhow!(
                "Invalid feed '{s}'. Valid options: profile-activity, profile-offers, collection-activity"
            )),
        }
    }
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedKind::ProfileActivity => write!(f, "profile-activity"),
            FeedKind::ProfileOffers => write!(f, "profile-offers"),
            FeedKind::CollectionActivity => write!(f, "collection-activity"),
        }
    }
}

/// marketfeed - paginated marketplace activity, offers and search
///
/// Configuration priority: CLI args > Environment variables > Config file > Defaults
#[derive(Parser, Debug, Default)]
#[command(name = "marketfeed")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Page through marketplace feeds from the terminal", long_about = None)]
pub struct CliArgs {
    /// Optional TOML file with any of the settings below
    #[arg(long, env = "MARKETFEED_CONFIG")]
    pub config_file: Option<String>,

    /// REST endpoint serving activity and offers pages
    #[arg(long, env = "API_URL")]
    pub api_url: Option<String>,

    /// GraphQL endpoint used by search
    #[arg(long, env = "GRAPHQL_URL")]
    pub graphql_url: Option<String>,

    /// Bearer token sent with page requests
    #[arg(long, env = "API_AUTH_TOKEN")]
    pub api_auth_token: Option<String>,

    /// Items per page (1-100)
    #[arg(long, env = "PAGE_SIZE")]
    pub page_size: Option<usize>,

    /// Per-attempt request timeout in milliseconds (500-60000)
    #[arg(long, env = "FETCH_TIMEOUT_MS")]
    pub fetch_timeout_ms: Option<u64>,

    /// Attempts per page, including the first (1-10)
    #[arg(long, env = "FETCH_RETRIES")]
    pub fetch_retries: Option<u32>,

    /// First retry delay in milliseconds, doubled per retry (0-10000)
    #[arg(long, env = "BACKOFF_BASE_MS")]
    pub backoff_base_ms: Option<u64>,

    /// Upper bound of random delay added to each retry (0-5000)
    #[arg(long, env = "BACKOFF_JITTER_MS")]
    pub backoff_jitter_ms: Option<u64>,

    /// Minimum search term length in characters (1-16)
    #[arg(long, env = "SEARCH_MIN_LEN")]
    pub search_min_len: Option<usize>,

    /// Quiet period before a search is sent (0-5000)
    #[arg(long, env = "SEARCH_DEBOUNCE_MS")]
    pub search_debounce_ms: Option<u64>,

    /// Feed to page through: profile-activity, profile-offers, collection-activity
    #[arg(long, value_parser = clap::value_parser!(FeedKind))]
    pub feed: Option<FeedKind>,

    /// Wallet address or collection id the feed is about
    #[arg(long)]
    pub subject: Option<String>,

    /// Feed filter: listings/offers/sales, or all/received/placed for offers
    #[arg(long)]
    pub filter: Option<String>,

    /// Number of pages to load (1-1000)
    #[arg(long, default_value_t = 1)]
    pub pages: usize,

    /// Run a global search instead of paging a feed
    #[arg(long, conflicts_with_all = ["feed", "subject", "filter"])]
    pub search: Option<String>,
}

/// Settings accepted in `--config-file`
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub api_url: Option<String>,
    pub graphql_url: Option<String>,
    pub api_auth_token: Option<String>,
    pub page_size: Option<usize>,
    pub fetch_timeout_ms: Option<u64>,
    pub fetch_retries: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_jitter_ms: Option<u64>,
    pub search_min_len: Option<usize>,
    pub search_debounce_ms: Option<u64>,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Mode {
    Feed {
        kind: FeedKind,
        subject: String,
        filter: FilterType,
        pages: usize,
    },
    Search {
        term: String,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub api_url: String,
    pub graphql_url: String,
    pub api_auth_token: Option<String>,
    pub page_size: usize,
    pub fetch_timeout_ms: u64,
    pub fetch_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_jitter_ms: u64,
    pub search_min_len: usize,
    pub search_debounce_ms: u64,
    pub mode: Option<Mode>,
}

/// Validate that a value is within a given range (inclusive)
fn validate_in_range<T>(val: T, min: T, max: T, name: &str) -> Result<T>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if val < min || val > max {
        Err(anyhow!("{name} must be in range [{min}, {max}], got {val}"))
    } else {
        Ok(val)
    }
}

/// Validate URL format (basic check)
fn validate_url(url: &str, name: &str) -> Result<()> {
    if url.is_empty() {
        return Err(anyhow!("{name} cannot be empty"));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(anyhow!("{name} must start with http:// or https://"))
    }
}

/// Load configuration from CLI args, environment variables and the optional config file
pub fn load() -> Result<Config> {
    let args = CliArgs::parse();
    let file = match args.config_file.as_deref() {
        Some(path) => FileConfig::from_path(Path::new(path))?,
        None => FileConfig::default(),
    };
    resolve(args, file)
}

/// Merge already-parsed layers. Clap has folded env vars into `args`.
pub fn resolve(args: CliArgs, file: FileConfig) -> Result<Config> {
    let api_url = args
        .api_url
        .or(file.api_url)
        .unwrap_or_else(|| "https://api.holaplex.market".to_string());
    let api_url = api_url.trim_end_matches('/').to_string();
    validate_url(&api_url, "API_URL")?;

    let graphql_url = args
        .graphql_url
        .or(file.graphql_url)
        .unwrap_or_else(|| format!("{api_url}/graphql"));
    validate_url(&graphql_url, "GRAPHQL_URL")?;

    let page_size = args.page_size.or(file.page_size).unwrap_or(24);
    let page_size = validate_in_range(page_size, 1, 100, "PAGE_SIZE")?;

    let fetch_timeout_ms = args
        .fetch_timeout_ms
        .or(file.fetch_timeout_ms)
        .unwrap_or(10_000);
    let fetch_timeout_ms = validate_in_range(fetch_timeout_ms, 500, 60_000, "FETCH_TIMEOUT_MS")?;

    let fetch_retries = args.fetch_retries.or(file.fetch_retries).unwrap_or(3);
    let fetch_retries = validate_in_range(fetch_retries, 1, 10, "FETCH_RETRIES")?;

    let backoff_base_ms = args
        .backoff_base_ms
        .or(file.backoff_base_ms)
        .unwrap_or(300);
    let backoff_base_ms = validate_in_range(backoff_base_ms, 0, 10_000, "BACKOFF_BASE_MS")?;

    let backoff_jitter_ms = args
        .backoff_jitter_ms
        .or(file.backoff_jitter_ms)
        .unwrap_or(250);
    let backoff_jitter_ms = validate_in_range(backoff_jitter_ms, 0, 5_000, "BACKOFF_JITTER_MS")?;

    let search_min_len = args.search_min_len.or(file.search_min_len).unwrap_or(3);
    let search_min_len = validate_in_range(search_min_len, 1, 16, "SEARCH_MIN_LEN")?;

    let search_debounce_ms = args
        .search_debounce_ms
        .or(file.search_debounce_ms)
        .unwrap_or(250);
    let search_debounce_ms = validate_in_range(search_debounce_ms, 0, 5_000, "SEARCH_DEBOUNCE_MS")?;

    let mode = if let Some(term) = args.search {
        Some(Mode::Search { term })
    } else if let Some(kind) = args.feed {
        let subject = args
            .subject
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow!("--subject is required with --feed {kind}"))?;
        let filter_name = args
            .filter
            .unwrap_or_else(|| kind.default_filter().to_string());
        let filter = kind.with_filter(&filter_name)?;
        let pages = validate_in_range(args.pages, 1, 1000, "--pages")?;
        Some(Mode::Feed {
            kind,
            subject,
            filter,
            pages,
        })
    } else {
        None
    };

    Ok(Config {
        api_url,
        graphql_url,
        api_auth_token: args.api_auth_token.or(file.api_auth_token),
        page_size,
        fetch_timeout_ms,
        fetch_retries,
        backoff_base_ms,
        backoff_jitter_ms,
        search_min_len,
        search_debounce_ms,
        mode,
    })
}

impl Config {
    pub fn page_size(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.page_size).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn fetch_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch_retries,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_jitter: Duration::from_millis(self.backoff_jitter_ms),
            attempt_timeout: self.fetch_timeout(),
        }
    }

    /// Print current configuration (useful for debugging)
    pub fn print_summary(&self) {
        eprintln!("marketfeed configuration:");
        eprintln!("  API URL: {}", self.api_url);
        eprintln!("  GraphQL URL: {}", self.graphql_url);
        eprintln!("  Page Size: {}", self.page_size);
        eprintln!(
            "  Fetch: timeout {}ms, {} attempts, backoff {}ms +{}ms jitter",
            self.fetch_timeout_ms, self.fetch_retries, self.backoff_base_ms, self.backoff_jitter_ms
        );
        eprintln!(
            "  Search: min {} chars, debounce {}ms",
            self.search_min_len, self.search_debounce_ms
        );
        if self.api_auth_token.is_some() {
            eprintln!("  API Auth: Configured");
        }
    }
}
