use crate::error::RecorderError;
use crate::models::{ChainListing, InstrumentRecord, OptionSide};
use crate::source::SnapshotSource;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_BROKER_URL: &str = "https://api.robinhood.com";
const MARKETDATA_CHUNK_SIZE: usize = 40;
const MAX_PAGES: usize = 100;

/// REST client for a Robinhood-style options API.
///
/// A symbol resolves through its equity quote to an equity instrument id, and from
/// there to the tradable option chain. A fetch lists the chain's active instruments
/// for one expiration and merges each with its market data quote.
pub struct BrokerClient {
    http: Client,
    base_url: String,
    headers: HeaderMap,
}

impl BrokerClient {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        if let Some(token) = token.map(str::trim).filter(|token| !token.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .context("invalid broker API token")?,
            );
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to construct HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
        })
    }

    pub async fn option_chain(&self, symbol: &str) -> Result<ChainListing> {
        let quote: EquityQuote = self.get(&format!("/quotes/{}/", symbol), &[]).await?;
        let equity_id = instrument_id_from_url(&quote.instrument).ok_or_else(|| {
            anyhow!(
                "quote for {} has malformed instrument url {}",
                symbol,
                quote.instrument
            )
        })?;

        let chains: Vec<ChainEntry> = self
            .get_paginated("/options/chains/", &[("equity_instrument_ids", equity_id.as_str())])
            .await?;
        let chain = chains
            .into_iter()
            .filter(|chain| chain.can_open_position.unwrap_or(true))
            .find(|chain| chain.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| anyhow!("no tradable option chain listed for {}", symbol))?;

        let mut expirations = chain.expiration_dates;
        expirations.sort();
        expirations.dedup();
        Ok(ChainListing {
            chain_id: chain.id,
            expirations,
        })
    }

    pub async fn option_quotes(
        &self,
        chain_id: &str,
        expiration: &str,
    ) -> Result<Vec<InstrumentRecord>> {
        let instruments: Vec<Map<String, Value>> = self
            .get_paginated(
                "/options/instruments/",
                &[
                    ("chain_id", chain_id),
                    ("expiration_dates", expiration),
                    ("state", "active"),
                    ("tradability", "tradable"),
                ],
            )
            .await?;

        let urls: Vec<String> = instruments
            .iter()
            .filter_map(|instrument| instrument.get("url").and_then(Value::as_str))
            .map(str::to_string)
            .collect();

        let mut quotes: HashMap<String, Map<String, Value>> = HashMap::new();
        for chunk in urls.chunks(MARKETDATA_CHUNK_SIZE) {
            let joined = chunk.join(",");
            let page: Page<Option<Map<String, Value>>> = self
                .get("/marketdata/options/", &[("instruments", joined.as_str())])
                .await?;
            for quote in page.results.into_iter().flatten() {
                let url = quote
                    .get("instrument")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let Some(url) = url {
                    quotes.insert(url, quote);
                }
            }
        }

        let records: Vec<InstrumentRecord> = instruments
            .into_iter()
            .filter_map(|instrument| {
                let quote = instrument
                    .get("url")
                    .and_then(Value::as_str)
                    .and_then(|url| quotes.remove(url));
                merge_instrument(instrument, quote)
            })
            .collect();
        debug!(
            "Fetched {} instrument quote(s) for chain {} {}",
            records.len(),
            chain_id,
            expiration
        );
        Ok(records)
    }

    async fn get_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let mut page: Page<T> = self.get(path, query).await?;
        let mut items = std::mem::take(&mut page.results);
        let mut pages = 1usize;

        while let Some(next) = page.next.take() {
            if pages >= MAX_PAGES {
                warn!("Stopped following pagination for {} after {} pages", path, pages);
                break;
            }
            pages += 1;
            page = self.get_url(&next, &[]).await?;
            items.append(&mut page.results);
        }

        Ok(items)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        self.get_url(&url, query).await
    }

    async fn get_url<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self
            .http
            .get(url)
            .headers(self.headers.clone())
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} returned error", url))?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to parse response from {}", url))
    }
}

#[async_trait]
impl SnapshotSource for BrokerClient {
    async fn resolve_chain(&self, symbol: &str) -> Result<ChainListing, RecorderError> {
        self.option_chain(symbol)
            .await
            .map_err(|err| RecorderError::ChainResolution {
                symbol: symbol.to_string(),
                message: format!("{:#}", err),
                retryable: is_retryable_failure(&err),
            })
    }

    async fn fetch(
        &self,
        chain_id: &str,
        sub_key: &str,
    ) -> Result<Vec<InstrumentRecord>, RecorderError> {
        self.option_quotes(chain_id, sub_key)
            .await
            .map_err(|err| RecorderError::TransientFetch {
                chain_id: chain_id.to_string(),
                sub_key: sub_key.to_string(),
                message: format!("{:#}", err),
            })
    }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EquityQuote {
    instrument: String,
}

#[derive(Debug, Deserialize)]
struct ChainEntry {
    id: String,
    symbol: String,
    #[serde(default)]
    expiration_dates: Vec<String>,
    #[serde(default)]
    can_open_position: Option<bool>,
}

/// Last path segment of an instrument url such as `.../instruments/<id>/`.
fn instrument_id_from_url(url: &str) -> Option<String> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .map(str::to_string)
}

/// Transport failures and server errors may clear up; 4xx answers and a chain list
/// without the symbol will not.
fn is_retryable_failure(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
        .any(|http| !http.status().is_some_and(|status| status.is_client_error()))
}

fn value_as_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Instrument metadata overlaid with its market data quote. Instruments missing an
/// id, side or strike are dropped.
fn merge_instrument(
    mut fields: Map<String, Value>,
    quote: Option<Map<String, Value>>,
) -> Option<InstrumentRecord> {
    let id = fields.get("id").and_then(Value::as_str)?.to_string();
    let side = fields
        .get("type")
        .and_then(Value::as_str)
        .and_then(OptionSide::parse)?;
    let strike_price = value_as_f64(fields.get("strike_price"))?;

    if let Some(quote) = quote {
        fields.extend(quote);
    }

    Some(InstrumentRecord {
        id,
        strike_price,
        side,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn instrument_id_is_last_path_segment() {
        assert_eq!(
            instrument_id_from_url("https://api.example.com/instruments/450dfc6d-5510/"),
            Some("450dfc6d-5510".to_string())
        );
        assert_eq!(
            instrument_id_from_url("https://api.example.com/instruments/abc"),
            Some("abc".to_string())
        );
        assert_eq!(instrument_id_from_url("https://"), None);
    }

    #[test]
    fn merge_overlays_quote_fields() {
        let instrument = as_map(json!({
            "id": "opt-1",
            "url": "https://api.example.com/options/instruments/opt-1/",
            "type": "put",
            "strike_price": "152.5000",
            "state": "active",
            "mark_price": null,
        }));
        let quote = as_map(json!({
            "instrument": "https://api.example.com/options/instruments/opt-1/",
            "mark_price": "1.2500",
            "delta": "-0.41",
        }));

        let record = merge_instrument(instrument, Some(quote)).unwrap();
        assert_eq!(record.id, "opt-1");
        assert_eq!(record.side, OptionSide::Put);
        assert_eq!(record.strike_price, 152.5);
        assert_eq!(record.fields.get("mark_price"), Some(&json!("1.2500")));
        assert_eq!(record.fields.get("state"), Some(&json!("active")));
        assert_eq!(record.fields.get("delta"), Some(&json!("-0.41")));
    }

    #[test]
    fn merge_drops_instruments_without_side_or_strike() {
        let missing_side = as_map(json!({ "id": "a", "strike_price": "10" }));
        assert!(merge_instrument(missing_side, None).is_none());

        let bad_strike = as_map(json!({ "id": "b", "type": "call", "strike_price": "n/a" }));
        assert!(merge_instrument(bad_strike, None).is_none());

        let numeric = as_map(json!({ "id": "c", "type": "call", "strike_price": 15 }));
        assert_eq!(merge_instrument(numeric, None).unwrap().strike_price, 15.0);
    }
}
