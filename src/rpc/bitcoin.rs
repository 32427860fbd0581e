//! Bitcoin RPC client implementation
//!
//! This module provides the HTTP JSON-RPC client for a Bitcoin Core style
//! node. It handles authentication, retries on transport errors, and maps
//! the node's JSON replies onto the typed `NodeRpc` interface.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bitcoin::{Amount, BlockHash, OutPoint, Txid};
use log::debug;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use url::Url;

use super::{NodeRpc, Payment, RpcDialect};
use crate::blockstats::{BlockStat, BlockStatsReport};
use crate::ledger::SpendableOutput;
use crate::{HarnessError, Result};

/// Bitcoin RPC configuration
#[derive(Clone, Debug)]
pub struct BitcoinRpcConfig {
    /// Label for log lines
    pub name: String,
    /// RPC URL (e.g., http://localhost:18443)
    pub url: String,
    /// RPC username
    pub username: Option<String>,
    /// RPC password
    pub password: Option<String>,
    /// Method names to use
    pub dialect: RpcDialect,
    /// Request timeout in seconds
    pub timeout: u64,
    /// Maximum number of retries
    pub max_retries: u32,
    /// Retry delay in milliseconds
    pub retry_delay: u64,
}

impl Default for BitcoinRpcConfig {
    fn default() -> Self {
        Self {
            name: "node".to_string(),
            url: "http://localhost:18443".to_string(),
            username: None,
            password: None,
            dialect: RpcDialect::Legacy,
            timeout: 30,
            max_retries: 3,
            retry_delay: 1000,
        }
    }
}

impl BitcoinRpcConfig {
    /// Build a config from a URL that may embed `user:password@`
    pub fn from_url(name: &str, url_str: &str) -> Result<Self> {
        let url = Url::parse(url_str)
            .map_err(|e| HarnessError::Config(format!("invalid RPC URL {}: {}", url_str, e)))?;

        let username = url.username();
        let password = url.password();

        // Keep the path so `/wallet/<name>` endpoints still reach their wallet
        Ok(Self {
            name: name.to_string(),
            url: format!(
                "{}://{}:{}{}",
                url.scheme(),
                url.host_str().unwrap_or("localhost"),
                url.port_or_known_default().unwrap_or(18443),
                url.path().trim_end_matches('/')
            ),
            username: if username.is_empty() { None } else { Some(username.to_string()) },
            password: password.map(|p| p.to_string()),
            ..Default::default()
        })
    }
}

/// Bitcoin RPC request
#[derive(Serialize, Debug)]
struct BitcoinRpcRequest<'a> {
    /// JSON-RPC version
    jsonrpc: &'a str,
    /// Method name
    method: &'a str,
    /// Method parameters
    params: Value,
    /// Request ID
    id: u64,
}

/// Bitcoin RPC response
#[derive(Deserialize, Debug)]
struct BitcoinRpcResponse {
    result: Option<Value>,
    error: Option<BitcoinRpcError>,
}

/// Bitcoin RPC error
#[derive(Deserialize, Debug)]
struct BitcoinRpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize, Debug)]
struct UnspentEntry {
    txid: String,
    vout: u32,
    amount: f64,
}

#[derive(Deserialize, Debug)]
struct SignResult {
    hex: String,
    complete: bool,
}

/// Bitcoin RPC client
pub struct BitcoinRpcClient {
    /// HTTP client
    client: Client,
    /// RPC configuration
    config: BitcoinRpcConfig,
    /// Request ID counter
    request_id: AtomicU64,
}

impl BitcoinRpcClient {
    /// Create a new Bitcoin RPC client
    pub fn new(config: BitcoinRpcConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| HarnessError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            request_id: AtomicU64::new(0),
        })
    }

    /// Call a Bitcoin RPC method with retry logic
    pub async fn call(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let mut retries = 0;

        loop {
            match self.execute_call(method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(err)
                    if retries < self.config.max_retries
                        && is_idempotent(method)
                        && is_retryable_error(&err) =>
                {
                    retries += 1;
                    debug!(
                        "Retrying RPC call to {} on {} (attempt {}/{}): {}",
                        method, self.config.name, retries, self.config.max_retries, err
                    );
                    sleep(Duration::from_millis(self.config.retry_delay)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Execute a single RPC call without retry logic
    async fn execute_call(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        debug!("Calling {} RPC method: {}", self.config.name, method);

        let request = BitcoinRpcRequest {
            jsonrpc: "1.0",
            method,
            params,
            id: self.next_request_id(),
        };

        let mut req_builder = self
            .client
            .post(&self.config.url)
            .header(header::CONTENT_TYPE, "application/json");

        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            let auth = format!("{}:{}", username, password);
            let auth_header = format!("Basic {}", BASE64.encode(auth));
            req_builder = req_builder.header(header::AUTHORIZATION, auth_header);
        }

        let response = req_builder
            .json(&request)
            .send()
            .await
            .context("Failed to send Bitcoin RPC request")?;

        // Bitcoin Core answers RPC errors with HTTP 500 and a JSON body, so
        // parse the body before looking at the status.
        let status = response.status();
        let body = response.text().await.context("Failed to read Bitcoin RPC response")?;
        let parsed: BitcoinRpcResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(anyhow!("Bitcoin RPC request failed with status: {}", status));
            }
            Err(e) => return Err(anyhow!("Failed to parse Bitcoin RPC response: {}", e)),
        };

        if let Some(error) = parsed.error {
            return Err(anyhow!("Bitcoin RPC error: {} (code: {})", error.message, error.code));
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }

    /// Get the next request ID
    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn call_str(&self, method: &str, params: Value) -> Result<String> {
        let result = self.call(method, params).await?;
        let text = result
            .as_str()
            .ok_or_else(|| HarnessError::Rpc(format!("{} returned {} instead of a string", method, result)))?;
        Ok(text.to_string())
    }

    async fn new_address(&self) -> Result<String> {
        self.call_str("getnewaddress", json!([])).await
    }
}

fn parse_txid(text: &str) -> Result<Txid> {
    Txid::from_str(text).map_err(|e| HarnessError::Rpc(format!("invalid txid {}: {}", text, e)))
}

fn parse_block_hash(text: &str) -> Result<BlockHash> {
    BlockHash::from_str(text).map_err(|e| HarnessError::Rpc(format!("invalid block hash {}: {}", text, e)))
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    hex::decode(text).map_err(|e| HarnessError::Rpc(format!("invalid transaction hex: {}", e)))
}

fn txid_array(method: &str, value: &Value) -> Result<Vec<Txid>> {
    value
        .as_array()
        .ok_or_else(|| HarnessError::Rpc(format!("{} did not return an array", method)))?
        .iter()
        .map(|v| {
            v.as_str()
                .ok_or_else(|| HarnessError::Rpc(format!("{} returned a non-string txid", method)))
                .and_then(parse_txid)
        })
        .collect()
}

/// Outputs as an ordered array of single-entry objects; a plain object
/// would not preserve output order.
fn outputs_param(outputs: &[Payment], dialect: RpcDialect) -> Value {
    let entry = |payment: &Payment| (payment.address.to_string(), json!(payment.amount.to_btc()));
    match dialect {
        RpcDialect::Modern => Value::Array(
            outputs
                .iter()
                .map(|payment| {
                    let mut single = Map::new();
                    let (address, amount) = entry(payment);
                    single.insert(address, amount);
                    Value::Object(single)
                })
                .collect(),
        ),
        RpcDialect::Legacy => Value::Object(outputs.iter().map(entry).collect()),
    }
}

#[async_trait]
impl NodeRpc for BitcoinRpcClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn create_raw_transaction(&self, inputs: &[OutPoint], outputs: &[Payment]) -> Result<Vec<u8>> {
        let inputs: Vec<Value> = inputs
            .iter()
            .map(|op| json!({ "txid": op.txid.to_string(), "vout": op.vout }))
            .collect();
        let hex = self
            .call_str(
                "createrawtransaction",
                json!([inputs, outputs_param(outputs, self.config.dialect)]),
            )
            .await?;
        parse_hex(&hex)
    }

    async fn sign_raw_transaction(&self, raw_tx: &[u8]) -> Result<Vec<u8>> {
        let method = match self.config.dialect {
            RpcDialect::Legacy => "signrawtransaction",
            RpcDialect::Modern => "signrawtransactionwithwallet",
        };
        let result = self.call(method, json!([hex::encode(raw_tx)])).await?;
        let signed: SignResult = serde_json::from_value(result)
            .map_err(|e| HarnessError::Rpc(format!("{} result: {}", method, e)))?;
        if !signed.complete {
            return Err(HarnessError::Rpc(format!("{} left the transaction incomplete", method)));
        }
        parse_hex(&signed.hex)
    }

    async fn send_raw_transaction(&self, raw_tx: &[u8], allow_high_fees: bool) -> Result<Txid> {
        // Modern nodes take a max fee rate instead of a flag; zero disables it.
        let fee_guard = match (self.config.dialect, allow_high_fees) {
            (RpcDialect::Legacy, flag) => json!(flag),
            (RpcDialect::Modern, true) => json!(0),
            (RpcDialect::Modern, false) => json!(0.10),
        };
        let txid = self
            .call_str("sendrawtransaction", json!([hex::encode(raw_tx), fee_guard]))
            .await?;
        debug!("Transaction sent with ID: {}", txid);
        parse_txid(&txid)
    }

    async fn list_unspent(&self, min_conf: u32) -> Result<Vec<SpendableOutput>> {
        let result = self.call("listunspent", json!([min_conf])).await?;
        let entries: Vec<UnspentEntry> = serde_json::from_value(result)
            .map_err(|e| HarnessError::Rpc(format!("listunspent result: {}", e)))?;
        entries
            .into_iter()
            .map(|entry| {
                let amount = Amount::from_btc(entry.amount)
                    .map_err(|e| HarnessError::Rpc(format!("listunspent amount: {}", e)))?;
                Ok(SpendableOutput::new(parse_txid(&entry.txid)?, entry.vout, amount))
            })
            .collect()
    }

    async fn generate(&self, count: u32) -> Result<Vec<BlockHash>> {
        let result = match self.config.dialect {
            RpcDialect::Legacy => self.call("generate", json!([count])).await?,
            RpcDialect::Modern => {
                let address = self.new_address().await?;
                self.call("generatetoaddress", json!([count, address])).await?
            }
        };
        result
            .as_array()
            .ok_or_else(|| HarnessError::Rpc("generate did not return an array".to_string()))?
            .iter()
            .map(|v| {
                v.as_str()
                    .ok_or_else(|| HarnessError::Rpc("generate returned a non-string hash".to_string()))
                    .and_then(parse_block_hash)
            })
            .collect()
    }

    async fn get_block_txids(&self, hash: &BlockHash) -> Result<Vec<Txid>> {
        let block = self.call("getblock", json!([hash.to_string(), true])).await?;
        txid_array("getblock", &block["tx"])
    }

    async fn get_raw_mempool(&self) -> Result<Vec<Txid>> {
        let result = self.call("getrawmempool", json!([])).await?;
        txid_array("getrawmempool", &result)
    }

    async fn get_best_block_hash(&self) -> Result<BlockHash> {
        let hash = self.call_str("getbestblockhash", json!([])).await?;
        parse_block_hash(&hash)
    }

    async fn estimate_fee(&self, target: u16) -> Result<Option<f64>> {
        let rate = match self.config.dialect {
            RpcDialect::Legacy => {
                let result = self.call("estimatefee", json!([target])).await?;
                result
                    .as_f64()
                    .ok_or_else(|| HarnessError::Rpc(format!("estimatefee returned {}", result)))?
            }
            RpcDialect::Modern => {
                let result = self.call("estimatesmartfee", json!([target])).await?;
                result.get("feerate").and_then(Value::as_f64).unwrap_or(-1.0)
            }
        };
        debug!("Estimated fee rate for {} confirmations: {} BTC/kB", target, rate);
        Ok(if rate < 0.0 { None } else { Some(rate) })
    }

    async fn get_block_stats(
        &self,
        start: i64,
        end: i64,
        stats: Option<&[BlockStat]>,
    ) -> Result<BlockStatsReport> {
        let params = match stats {
            Some(selected) => json!([start, end, crate::blockstats::format_selection(selected)]),
            None => json!([start, end]),
        };
        let result = self.call("getblockstats", params).await?;
        serde_json::from_value(result).map_err(|e| HarnessError::Rpc(format!("getblockstats result: {}", e)))
    }
}

/// Methods that change node state when repeated. A timed-out submission may
/// still have been accepted, so these are never resent.
fn is_idempotent(method: &str) -> bool {
    !matches!(method, "sendrawtransaction" | "generate" | "generatetoaddress")
}

/// Check if an error is retryable
fn is_retryable_error(err: &anyhow::Error) -> bool {
    let err_string = format!("{:#}", err).to_lowercase();

    // Connection errors
    if err_string.contains("connection")
        || err_string.contains("timeout")
        || err_string.contains("timed out")
        || err_string.contains("error sending request")
    {
        return true;
    }

    // Server errors (5xx) without a JSON-RPC body
    err_string.contains("status: 5")
}
