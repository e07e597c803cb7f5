//! JSON-RPC client for the upstream node
//!
//! Bitcoin-style JSON-RPC 1.0 over HTTP POST with optional basic auth.
//! Every call has a timeout; retryable failures are retried a bounded
//! number of times with a fixed delay.

use super::{NodeRpc, RawBlock, RawChainTotals, RawMempoolEntry, RawTransaction};
use crate::config::NodeConfig;
use crate::error::RpcError;
use crate::types::TxId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct MiningInfo {
    blocks: u64,
    #[serde(default)]
    difficulty: f64,
    #[serde(default)]
    networkhashps: f64,
}

#[derive(Deserialize)]
struct TxOutSetInfo {
    total_amount: f64,
}

pub struct JsonRpcClient {
    url: String,
    auth: Option<(String, Option<String>)>,
    client: reqwest::Client,
    retries: u32,
    retry_delay: Duration,
    next_id: AtomicU64,
    /// Outbound HTTP requests, including retries
    requests_sent: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(config: &NodeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build node HTTP client")?;

        Ok(Self {
            url: config.rpc_url.clone(),
            auth: config
                .rpc_user
                .clone()
                .map(|user| (user, config.rpc_password.clone())),
            client,
            retries: config.retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            next_id: AtomicU64::new(1),
            requests_sent: AtomicU64::new(0),
        })
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    /// Call `method`, retrying transport-level failures
    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Vec<Value>,
    ) -> Result<T, RpcError> {
        let mut attempt = 0u32;
        loop {
            match self.call_once(method, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "RPC {} failed (retry {}/{}): {}",
                        method, attempt, self.retries, e
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_once<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Vec<Value>,
    ) -> Result<T, RpcError> {
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some((user, password)) = &self.auth {
            builder = builder.basic_auth(user, password.as_ref());
        }

        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        debug!("RPC -> {}", method);

        let response = builder.send().await.map_err(|e| transport(method, e))?;
        // bitcoind answers RPC errors with HTTP 500 and a JSON body, so the
        // status is not checked here
        let body: RpcResponse = response.json().await.map_err(|e| transport(method, e))?;

        if let Some(err) = body.error {
            return Err(RpcError::Node {
                method,
                code: err.code,
                message: err.message,
            });
        }

        let result = body
            .result
            .filter(|v| !v.is_null())
            .ok_or(RpcError::EmptyResult { method })?;

        serde_json::from_value(result).map_err(|source| RpcError::Decode { method, source })
    }
}

fn transport(method: &'static str, source: reqwest::Error) -> RpcError {
    if source.is_timeout() {
        RpcError::Timeout { method }
    } else {
        RpcError::Transport { method, source }
    }
}

#[async_trait]
impl NodeRpc for JsonRpcClient {
    async fn best_height(&self) -> Result<u64, RpcError> {
        self.call("getblockcount", vec![]).await
    }

    async fn block(&self, height: u64) -> Result<RawBlock, RpcError> {
        let hash: String = self.call("getblockhash", vec![json!(height)]).await?;
        self.call("getblock", vec![json!(hash), json!(2)]).await
    }

    async fn raw_mempool(&self) -> Result<HashMap<TxId, RawMempoolEntry>, RpcError> {
        self.call("getrawmempool", vec![json!(true)]).await
    }

    async fn chain_totals(&self) -> Result<RawChainTotals, RpcError> {
        let mining: MiningInfo = self.call("getmininginfo", vec![]).await?;

        // gettxoutsetinfo walks the whole UTXO set and is often disabled or
        // slow; a failure only drops the supply figure
        let supply = match self.call::<TxOutSetInfo>("gettxoutsetinfo", vec![]).await {
            Ok(info) => Some(info.total_amount),
            Err(e) => {
                debug!("gettxoutsetinfo unavailable: {}", e);
                None
            }
        };

        Ok(RawChainTotals {
            blocks: mining.blocks,
            difficulty: mining.difficulty,
            network_hashps: mining.networkhashps,
            supply,
        })
    }

    async fn transaction(&self, txid: &str) -> Result<RawTransaction, RpcError> {
        self.call("getrawtransaction", vec![json!(txid), json!(1)]).await
    }
}
