use crate::config::Config;
use crate::engine::{AddressClassifier, AddressKind, TransferSource};
use crate::model::ObservedTransfer;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

const API_KEY_HEADER: &str = "TRON-PRO-API-KEY";
const TRC20_PAGE_LIMIT: usize = 20;

/// REST client for TronGrid (keyed, throttled) and Tronscan (unkeyed).
/// Requests rotate through the configured API keys with an atomic cursor and
/// sleep a fixed delay before each chain-data call.
#[derive(Clone)]
pub struct TronClient {
    http: reqwest::Client,
    trongrid_url: String,
    tronscan_url: String,
    api_keys: Vec<String>,
    key_cursor: Arc<AtomicUsize>,
    request_delay: Duration,
    token_contracts: Vec<String>,
    max_retries: usize,
}

impl TronClient {
    pub fn new(config: &Config) -> Result<Self> {
        if config.api_keys.is_empty() {
            return Err(anyhow!("at least one TRON API key must be provided"));
        }

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(TronClient {
            http,
            trongrid_url: config.trongrid_url.trim_end_matches('/').to_string(),
            tronscan_url: config.tronscan_url.trim_end_matches('/').to_string(),
            api_keys: config.api_keys.clone(),
            key_cursor: Arc::new(AtomicUsize::new(0)),
            request_delay: config.request_delay,
            token_contracts: config.token_contracts.clone(),
            max_retries: 3,
        })
    }

    fn next_api_key(&self) -> &str {
        let index = self.key_cursor.fetch_add(1, Ordering::Relaxed);
        &self.api_keys[index % self.api_keys.len()]
    }

    fn retry_strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(200)
            .factor(2)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.max_retries)
    }

    async fn throttle(&self) {
        if !self.request_delay.is_zero() {
            sleep(self.request_delay).await;
        }
    }

    /// Keyed GET against TronGrid with backoff on transient failures. A 429
    /// is surfaced immediately so the caller skips to the next cycle instead
    /// of hammering the provider.
    async fn trongrid_get(&self, path_and_query: &str) -> Result<Value> {
        self.throttle().await;

        let url = format!("{}{}", self.trongrid_url, path_and_query);
        let client = self.clone();
        Retry::spawn(self.retry_strategy(), move || {
            let client = client.clone();
            let url = url.clone();
            async move {
                match client.get_once(&url, true).await {
                    Ok(value) => Ok(Ok(value)),
                    Err(e) if is_rate_limit(&e) => {
                        warn!("TronGrid rate limit on {}", url);
                        // hack since we don't want to retry on this specific error
                        Ok(Err(e))
                    }
                    Err(e) => {
                        debug!("request to {} failed: {}", url, e);
                        Err(e)
                    }
                }
            }
        })
        .await
        .and_then(|r| r)
    }

    /// Keyed POST against the TronGrid wallet API, retried like a read.
    pub(crate) async fn wallet_post(&self, path: &str, body: Value) -> Result<Value> {
        self.throttle().await;

        let url = format!("{}{}", self.trongrid_url, path);
        let client = self.clone();
        Retry::spawn(self.retry_strategy(), move || {
            let client = client.clone();
            let url = url.clone();
            let body = body.clone();
            async move {
                match client.post_once(&url, body).await {
                    Ok(value) => Ok(Ok(value)),
                    Err(e) if is_rate_limit(&e) => {
                        warn!("TronGrid rate limit on {}", url);
                        Ok(Err(e))
                    }
                    Err(e) => Err(e),
                }
            }
        })
        .await
        .and_then(|r| r)
    }

    /// Single-attempt keyed POST. Used for transaction create/broadcast where
    /// a blind retry could double-spend; failures wait for the next cycle.
    pub(crate) async fn wallet_post_once(&self, path: &str, body: Value) -> Result<Value> {
        self.throttle().await;
        let url = format!("{}{}", self.trongrid_url, path);
        self.post_once(&url, body).await
    }

    /// Unkeyed GET against Tronscan, single attempt.
    async fn tronscan_get(&self, path_and_query: &str) -> Result<Value> {
        self.throttle().await;
        let url = format!("{}{}", self.tronscan_url, path_and_query);
        self.get_once(&url, false).await
    }

    async fn get_once(&self, url: &str, keyed: bool) -> Result<Value> {
        let mut request = self.http.get(url);
        if keyed {
            request = request.header(API_KEY_HEADER, self.next_api_key());
        }
        let response = request.send().await.context("request failed")?;
        Self::decode_json(response).await
    }

    async fn post_once(&self, url: &str, body: Value) -> Result<Value> {
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, self.next_api_key())
            .json(&body)
            .send()
            .await
            .context("request failed")?;
        Self::decode_json(response).await
    }

    async fn decode_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(anyhow!("rate limited (HTTP 429)"));
        }
        if !status.is_success() {
            return Err(anyhow!("HTTP {}", status));
        }
        response.json().await.context("invalid JSON in response")
    }

    pub async fn native_balance(&self, address: &str) -> Result<u64> {
        let account = self
            .wallet_post(
                "/wallet/getaccount",
                json!({ "address": address, "visible": true }),
            )
            .await?;
        // A never-funded account comes back as an empty object.
        Ok(account.get("balance").and_then(Value::as_u64).unwrap_or(0))
    }
}

fn is_rate_limit(error: &anyhow::Error) -> bool {
    error.to_string().contains("429")
}

#[derive(Debug, Deserialize)]
struct Trc20Page {
    #[serde(default)]
    data: Vec<Trc20Entry>,
}

#[derive(Debug, Deserialize)]
struct Trc20Entry {
    transaction_id: String,
    from: String,
    to: String,
    value: String,
    block_timestamp: i64,
    token_info: TokenInfo,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TokenInfo {
    address: String,
    symbol: String,
}

impl Trc20Entry {
    fn into_observed(self) -> Option<ObservedTransfer> {
        let raw_amount = match self.value.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(
                    txid = %self.transaction_id,
                    value = %self.value,
                    "unparseable TRC20 amount, skipping entry"
                );
                return None;
            }
        };
        Some(ObservedTransfer {
            transaction_id: self.transaction_id,
            from_address: self.from,
            to_address: self.to,
            token_contract: self.token_info.address,
            token_symbol: self.token_info.symbol,
            raw_amount,
            block_timestamp_ms: self.block_timestamp,
            observed_at: Utc::now(),
        })
    }
}

#[async_trait]
impl TransferSource for TronClient {
    /// Newest allow-listed TRC20 transfer touching `address`, if any. An
    /// address with no qualifying activity yields `None`, not an error.
    async fn latest_transfer(&self, address: &str) -> Result<Option<ObservedTransfer>> {
        let path = format!(
            "/v1/accounts/{address}/transactions/trc20?limit={TRC20_PAGE_LIMIT}&order_by=block_timestamp,desc"
        );
        let value = self.trongrid_get(&path).await?;
        let page: Trc20Page = serde_json::from_value(value).context("unexpected TRC20 payload")?;

        Ok(page
            .data
            .into_iter()
            .filter(|entry| entry.kind.is_empty() || entry.kind == "Transfer")
            .find(|entry| {
                self.token_contracts
                    .iter()
                    .any(|contract| *contract == entry.token_info.address)
            })
            .and_then(Trc20Entry::into_observed))
    }
}

#[async_trait]
impl AddressClassifier for TronClient {
    async fn classify(&self, address: &str) -> Result<AddressKind> {
        let account = self
            .wallet_post(
                "/wallet/getaccount",
                json!({ "address": address, "visible": true }),
            )
            .await?;
        let is_contract = account.get("type").and_then(Value::as_str) == Some("Contract");

        // The explorer tag is advisory; an outage there must not block the
        // contract check we already have.
        let public_tag = match self
            .tronscan_get(&format!("/api/accountv2?address={address}"))
            .await
        {
            Ok(info) => info
                .get("publicTag")
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|tag| !tag.is_empty()),
            Err(e) => {
                warn!(%address, "public tag lookup failed: {}", e);
                None
            }
        };

        Ok(AddressKind {
            is_contract,
            public_tag,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trongrid_trc20_page() {
        let payload = json!({
            "data": [
                {
                    "transaction_id": "a94f3b7995b24d08c3e2f295e3f00b8ab9a00d1da5b7a55d3f6ae29e2a6f0a10",
                    "token_info": {
                        "symbol": "USDT",
                        "address": "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t",
                        "decimals": 6,
                        "name": "Tether USD"
                    },
                    "block_timestamp": 1700000000000i64,
                    "from": "TSenderSenderSenderSenderSenderSen",
                    "to": "TReceiverReceiverReceiverReceiverR",
                    "type": "Transfer",
                    "value": "2500000"
                }
            ],
            "success": true,
            "meta": { "at": 1700000001000i64, "page_size": 1 }
        });

        let page: Trc20Page = serde_json::from_value(payload).unwrap();
        assert_eq!(page.data.len(), 1);
        let observed = page.data.into_iter().next().unwrap().into_observed().unwrap();
        assert_eq!(observed.raw_amount, 2_500_000);
        assert_eq!(observed.token_symbol, "USDT");
        assert_eq!(observed.block_timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn tolerates_missing_optional_fields() {
        let payload = json!({
            "data": [
                {
                    "transaction_id": "deadbeef",
                    "token_info": { "address": "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t" },
                    "block_timestamp": 1i64,
                    "from": "Ta",
                    "to": "Tb",
                    "value": "not-a-number"
                }
            ]
        });
        let page: Trc20Page = serde_json::from_value(payload).unwrap();
        // bad amount is dropped, not an error
        assert!(page.data.into_iter().next().unwrap().into_observed().is_none());
    }

    #[test]
    fn empty_page_deserializes() {
        let page: Trc20Page = serde_json::from_value(json!({ "data": [], "success": true })).unwrap();
        assert!(page.data.is_empty());
    }

    #[test]
    fn api_keys_rotate_round_robin() {
        let client = TronClient {
            http: reqwest::Client::new(),
            trongrid_url: "http://localhost".to_string(),
            tronscan_url: "http://localhost".to_string(),
            api_keys: vec!["k0".to_string(), "k1".to_string(), "k2".to_string()],
            key_cursor: Arc::new(AtomicUsize::new(0)),
            request_delay: Duration::ZERO,
            token_contracts: vec![],
            max_retries: 0,
        };
        let picked: Vec<&str> = (0..5).map(|_| client.next_api_key()).collect();
        assert_eq!(picked, vec!["k0", "k1", "k2", "k0", "k1"]);
    }
}
