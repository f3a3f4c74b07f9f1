//! Market data integrations.
//!
//! Defines the `MarketDataProvider` trait and provides implementations for:
//! - Equities: one quote request per symbol (Finnhub-style `/quote`)
//! - Crypto: a single batched request for all symbols (CoinGecko `simple/price`)

pub mod crypto;
pub mod equity;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use crate::types::AssetClass;

/// Abstraction over a source of current instrument prices.
///
/// `Ok(None)` means the provider answered but has no price for the symbol.
/// Implementations never fabricate a price.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// The asset class this provider prices.
    fn asset_class(&self) -> AssetClass;

    /// Latest price for one symbol.
    async fn get_price(&self, symbol: &str) -> Result<Option<Decimal>>;

    /// Latest prices for many symbols. Symbols without a price are omitted.
    ///
    /// The default issues one `get_price` per symbol; providers with a
    /// batch endpoint override it.
    async fn get_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        let mut prices = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            match self.get_price(symbol).await {
                Ok(Some(price)) => {
                    prices.insert(symbol.clone(), price);
                }
                Ok(None) => debug!(symbol = %symbol, "No price returned"),
                Err(e) => debug!(symbol = %symbol, error = %e, "Price lookup failed"),
            }
        }
        Ok(prices)
    }

    /// Provider name for logging.
    fn name(&self) -> &str;
}
