//! Equity quote provider.
//!
//! Fetches the latest trade price for one ticker per request from a
//! Finnhub-compatible `/quote` endpoint. Free-tier quota is tight, so the
//! price resolver throttles calls to this provider; this client itself
//! issues exactly one HTTP request per `get_price`.
//!
//! API: `GET {base}/quote?symbol=AAPL&token=KEY`
//! Response: `{"c": 187.3, "d": 1.2, "dp": 0.65, "pc": 186.1, "t": 1760000000}`
//! Unknown tickers come back as HTTP 200 with `c = 0`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::*;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::MarketDataProvider;
use crate::types::AssetClass;

const PROVIDER_NAME: &str = "finnhub";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    /// Current price
    #[serde(default)]
    c: Option<f64>,
    /// Previous close, used when the market hasn't traded yet today
    #[serde(default)]
    pc: Option<f64>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct EquityQuoteClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl EquityQuoteClient {
    pub fn new(base_url: &str, api_key: Option<SecretString>, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("PICKBOARD/0.1.0")
            .build()
            .context("Failed to build equity HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn quote_url(&self, symbol: &str) -> String {
        let mut url = format!(
            "{}/quote?symbol={}",
            self.base_url,
            urlencoding::encode(symbol)
        );
        if let Some(key) = &self.api_key {
            url.push_str("&token=");
            url.push_str(&urlencoding::encode(key.expose_secret()));
        }
        url
    }

    /// Extract a usable price from a quote body. Zero or negative means
    /// "no price" (how the API reports unknown tickers).
    fn parse_quote(body: &str) -> Result<Option<Decimal>> {
        let quote: QuoteResponse =
            serde_json::from_str(body).context("Failed to parse equity quote")?;

        let raw = quote
            .c
            .filter(|p| *p > 0.0)
            .or_else(|| quote.pc.filter(|p| *p > 0.0));

        Ok(raw.and_then(Decimal::from_f64))
    }
}

#[async_trait]
impl MarketDataProvider for EquityQuoteClient {
    fn asset_class(&self) -> AssetClass {
        AssetClass::Equity
    }

    async fn get_price(&self, symbol: &str) -> Result<Option<Decimal>> {
        let resp = self
            .http
            .get(self.quote_url(symbol))
            .send()
            .await
            .with_context(|| format!("Equity quote request failed for {symbol}"))?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("Equity quote API error for {symbol}: {status}");
        }

        let body = resp
            .text()
            .await
            .with_context(|| format!("Failed to read equity quote for {symbol}"))?;

        let price = Self::parse_quote(&body)?;
        debug!(symbol, price = ?price, "Equity quote");
        Ok(price)
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
