//! Price resolver.
//!
//! Turns the symbols of a batch of open picks into a (class, symbol) → price
//! map. A ticker listed on both sides (LINK, SOL) gets two separate entries.
//! Symbols are deduplicated, partitioned by asset class, and priced:
//! equities one at a time with a fixed sleep between calls (quota),
//! crypto in a single batched request. The two partitions run
//! concurrently. A failed lookup never aborts the batch; it is omitted
//! from the map and reported as one error string per symbol.

use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::market::MarketDataProvider;
use crate::types::{AssetClass, PickboardError};

/// Prices obtained this cycle plus the symbols that could not be priced.
#[derive(Debug, Clone, Default)]
pub struct PriceResolution {
    pub prices: HashMap<(AssetClass, String), Decimal>,
    pub errors: Vec<String>,
}

impl PriceResolution {
    pub fn price(&self, symbol: &str, class: AssetClass) -> Option<Decimal> {
        self.prices.get(&(class, normalize(symbol))).copied()
    }

    fn insert(&mut self, class: AssetClass, symbol: &str, price: Decimal) {
        self.prices.insert((class, symbol.to_string()), price);
    }

    fn merge(&mut self, other: PriceResolution) {
        self.prices.extend(other.prices);
        self.errors.extend(other.errors);
    }

    fn unavailable(&mut self, symbol: &str, reason: impl Into<String>) {
        let err = PickboardError::PriceUnavailable {
            symbol: symbol.to_string(),
            reason: reason.into(),
        };
        warn!(symbol, error = %err, "Skipping symbol this cycle");
        self.errors.push(err.to_string());
    }
}

fn normalize(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct PriceResolver {
    equity: Arc<dyn MarketDataProvider>,
    crypto: Arc<dyn MarketDataProvider>,
    equity_delay: Duration,
}

impl PriceResolver {
    pub fn new(
        equity: Arc<dyn MarketDataProvider>,
        crypto: Arc<dyn MarketDataProvider>,
        equity_delay: Duration,
    ) -> Self {
        let wiring = [(&equity, AssetClass::Equity), (&crypto, AssetClass::Crypto)];
        for (provider, expected) in wiring {
            if provider.asset_class() != expected {
                warn!(
                    provider = provider.name(),
                    serves = %provider.asset_class(),
                    wired_as = %expected,
                    "Market data provider wired to the wrong asset class"
                );
            }
        }
        Self {
            equity,
            crypto,
            equity_delay,
        }
    }

    /// Deduplicate and split requests into (equity, crypto) symbol lists.
    /// Output order is sorted so lookups are deterministic run to run.
    pub fn partition<'a, I>(requests: I) -> (Vec<String>, Vec<String>)
    where
        I: IntoIterator<Item = (&'a str, AssetClass)>,
    {
        let mut equities = BTreeSet::new();
        let mut cryptos = BTreeSet::new();
        for (symbol, class) in requests {
            let symbol = normalize(symbol);
            if symbol.is_empty() {
                continue;
            }
            match class {
                AssetClass::Equity => equities.insert(symbol),
                AssetClass::Crypto => cryptos.insert(symbol),
            };
        }
        (equities.into_iter().collect(), cryptos.into_iter().collect())
    }

    /// Price every requested symbol, tolerating partial failure.
    pub async fn resolve<'a, I>(&self, requests: I) -> PriceResolution
    where
        I: IntoIterator<Item = (&'a str, AssetClass)>,
    {
        let (equities, cryptos) = Self::partition(requests);
        info!(
            equities = equities.len(),
            crypto = cryptos.len(),
            "Resolving prices"
        );

        let (equity_res, crypto_res) = tokio::join!(
            self.resolve_equities(&equities),
            self.resolve_crypto(&cryptos),
        );

        let mut resolution = equity_res;
        resolution.merge(crypto_res);

        info!(
            priced = resolution.prices.len(),
            failed = resolution.errors.len(),
            "Price resolution complete"
        );
        resolution
    }

    /// Sequential, throttled equity lookups.
    async fn resolve_equities(&self, symbols: &[String]) -> PriceResolution {
        let mut resolution = PriceResolution::default();

        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 && !self.equity_delay.is_zero() {
                tokio::time::sleep(self.equity_delay).await;
            }

            match self.equity.get_price(symbol).await {
                Ok(Some(price)) if price > Decimal::ZERO => {
                    debug!(symbol = %symbol, %price, provider = self.equity.name(), "Priced");
                    resolution.insert(AssetClass::Equity, symbol, price);
                }
                Ok(_) => resolution.unavailable(symbol, "no price returned"),
                Err(e) => resolution.unavailable(symbol, format!("{e:#}")),
            }
        }

        resolution
    }

    /// One batched crypto lookup covering every symbol.
    async fn resolve_crypto(&self, symbols: &[String]) -> PriceResolution {
        let mut resolution = PriceResolution::default();
        if symbols.is_empty() {
            return resolution;
        }

        match self.crypto.get_prices(symbols).await {
            Ok(prices) => {
                for symbol in symbols {
                    match prices.get(symbol) {
                        Some(price) if *price > Decimal::ZERO => {
                            resolution.insert(AssetClass::Crypto, symbol, *price);
                        }
                        _ => resolution.unavailable(symbol, "no price returned"),
                    }
                }
            }
            Err(e) => {
                let reason = format!("batch request failed: {e:#}");
                for symbol in symbols {
                    resolution.unavailable(symbol, reason.clone());
                }
            }
        }

        resolution
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
