//! Crypto price provider.
//!
//! Prices every requested coin in one request via CoinGecko's
//! `simple/price` endpoint. Tickers are mapped to CoinGecko coin ids;
//! unknown tickers fall back to the lower-cased ticker, which matches the
//! id for many smaller coins.
//!
//! API: `GET {base}/simple/price?ids=bitcoin,ethereum&vs_currencies=usd`
//! Response: `{"bitcoin": {"usd": 67012.5}, "ethereum": {"usd": 3120.4}}`
//! Rate limit: ~30 req/min on the public tier, hence the single batch.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::*;
use std::collections::HashMap;
use tracing::debug;

use super::MarketDataProvider;
use crate::types::AssetClass;

const PROVIDER_NAME: &str = "coingecko";
const VS_CURRENCY: &str = "usd";

/// Ticker → CoinGecko id for the coins providers actually pick.
const COIN_IDS: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("SOL", "solana"),
    ("XRP", "ripple"),
    ("DOGE", "dogecoin"),
    ("ADA", "cardano"),
    ("BNB", "binancecoin"),
    ("AVAX", "avalanche-2"),
    ("DOT", "polkadot"),
    ("LINK", "chainlink"),
    ("MATIC", "matic-network"),
    ("LTC", "litecoin"),
    ("SHIB", "shiba-inu"),
    ("TRX", "tron"),
];

pub struct CryptoPriceClient {
    http: Client,
    base_url: String,
}

impl CryptoPriceClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("PICKBOARD/0.1.0")
            .build()
            .context("Failed to build crypto HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Map a ticker such as `BTC`, `btc-usd` or `ETHUSDT` to a coin id.
    fn coin_id(symbol: &str) -> String {
        let upper = symbol.to_uppercase();
        let base = upper
            .strip_suffix("-USD")
            .or_else(|| upper.strip_suffix("USDT"))
            .or_else(|| upper.strip_suffix("USD"))
            .filter(|b| !b.is_empty())
            .unwrap_or(upper.as_str());

        COIN_IDS
            .iter()
            .find(|(ticker, _)| *ticker == base)
            .map(|(_, id)| id.to_string())
            .unwrap_or_else(|| base.to_lowercase())
    }

    fn price_url(&self, ids: &[String]) -> String {
        format!(
            "{}/simple/price?ids={}&vs_currencies={VS_CURRENCY}",
            self.base_url,
            urlencoding::encode(&ids.join(","))
        )
    }

    /// Map a `simple/price` body back onto the requested symbols.
    fn parse_prices(
        body: &str,
        symbol_ids: &[(String, String)],
    ) -> Result<HashMap<String, Decimal>> {
        let data: HashMap<String, HashMap<String, f64>> =
            serde_json::from_str(body).context("Failed to parse crypto price response")?;

        let prices = symbol_ids
            .iter()
            .filter_map(|(symbol, id)| {
                data.get(id)
                    .and_then(|quotes| quotes.get(VS_CURRENCY))
                    .filter(|p| **p > 0.0)
                    .and_then(|p| Decimal::from_f64(*p))
                    .map(|price| (symbol.clone(), price))
            })
            .collect();

        Ok(prices)
    }
}

#[async_trait]
impl MarketDataProvider for CryptoPriceClient {
    fn asset_class(&self) -> AssetClass {
        AssetClass::Crypto
    }

    async fn get_price(&self, symbol: &str) -> Result<Option<Decimal>> {
        let prices = self.get_prices(&[symbol.to_string()]).await?;
        Ok(prices.get(symbol).copied())
    }

    async fn get_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let symbol_ids: Vec<(String, String)> = symbols
            .iter()
            .map(|s| (s.clone(), Self::coin_id(s)))
            .collect();

        let mut ids: Vec<String> = symbol_ids.iter().map(|(_, id)| id.clone()).collect();
        ids.sort();
        ids.dedup();

        let resp = self
            .http
            .get(self.price_url(&ids))
            .send()
            .await
            .context("Crypto price request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("Crypto price API error: {status}");
        }

        let body = resp.text().await.context("Failed to read crypto price response")?;
        let prices = Self::parse_prices(&body, &symbol_ids)?;

        debug!(requested = symbols.len(), priced = prices.len(), "Crypto prices fetched");
        Ok(prices)
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
