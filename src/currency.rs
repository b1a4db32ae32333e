//! SOL to USD conversion for price display.
//!
//! The rate comes from an external [`RateSource`]; this module only caches it
//! and formats amounts.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CurrencyError {
    #[error("exchange rate unavailable")]
    RateUnavailable,
}

#[async_trait]
pub trait RateSource: Send + Sync {
    /// Units of `quote` per one `base`, or `None` if the service cannot answer
    async fn get_rate(&self, base: &str, quote: &str) -> Option<f64>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum RateState {
    Uninitialized,
    Ready(f64),
    Unavailable,
}

#[derive(Clone)]
pub struct CurrencyConverter {
    source: Arc<dyn RateSource>,
    state: Arc<Mutex<RateState>>,
}

impl CurrencyConverter {
    pub fn new(source: Arc<dyn RateSource>) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(RateState::Uninitialized)),
        }
    }

    /// Fetch the SOL/USD rate. Calling it again refreshes the cached rate.
    pub async fn init(&self) -> Result<f64, CurrencyError> {
        let next = match self.source.get_rate("SOL", "USD").await {
            Some(rate) if rate.is_finite() && rate >= 0.0 => RateState::Ready(rate),
            other => {
                log::warn!("[currency] SOL/USD rate unavailable ({other:?})");
                RateState::Unavailable
            }
        };
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
        match next {
            RateState::Ready(rate) => Ok(rate),
            _ => Err(CurrencyError::RateUnavailable),
        }
    }

    pub fn rate(&self) -> Option<f64> {
        match *self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            RateState::Ready(rate) => Some(rate),
            _ => None,
        }
    }

    /// 0 until the rate has been fetched
    pub fn sol_to_usd(&self, sol: f64) -> Result<f64, CurrencyError> {
        match *self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            RateState::Uninitialized => Ok(0.0),
            RateState::Ready(rate) => Ok(sol * rate),
            RateState::Unavailable => Err(CurrencyError::RateUnavailable),
        }
    }

    pub fn sol_to_usd_string(&self, sol: f64) -> Result<String, CurrencyError> {
        self.sol_to_usd(sol).map(format_usd)
    }
}

/// `1234.5` -> `$1,234.50`
pub fn format_usd(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}
