// JSON-RPC 2.0 node client over plain HTTP.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::core::blockfetcher::{ChainInfo, NodeAdapter};
use crate::core::errors::NodeError;

/// `getblock` error code for a height past the node's tip.
pub const RPC_INVALID_PARAMETER: i64 = -8;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u32,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Deserialize, Debug)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcErrorDetail>,
}

#[derive(Deserialize, Debug)]
struct JsonRpcErrorDetail {
    code: i64,
    message: String,
}

#[derive(Deserialize, Debug)]
struct BlockchainInfo {
    chain: String,
    headers: u32,
    #[serde(default)]
    upgrades: HashMap<String, UpgradeInfo>,
    consensus: ConsensusInfo,
}

#[derive(Deserialize, Debug)]
struct UpgradeInfo {
    activationheight: u32,
}

#[derive(Deserialize, Debug)]
struct ConsensusInfo {
    nextblock: String,
}

pub struct JsonRpcNode {
    url: String,
    auth: Option<String>,
    client: reqwest::Client,
    request_id: AtomicU32,
    activation_upgrade_id: String,
}

impl JsonRpcNode {
    /// `auth` is sent as HTTP Basic credentials when present.
    pub fn new(
        url: &str,
        auth: Option<(String, String)>,
        activation_upgrade_id: &str,
    ) -> Result<Self, NodeError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NodeError::Transport(format!("failed to create HTTP client: {e}")))?;

        let auth_header = auth.map(|(user, pass)| {
            format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
        });

        Ok(Self {
            url: url.to_string(),
            auth: auth_header,
            client,
            request_id: AtomicU32::new(1),
            activation_upgrade_id: activation_upgrade_id.to_string(),
        })
    }

    async fn rpc_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, NodeError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest { jsonrpc: "2.0", id, method, params };

        let mut req = self.client.post(&self.url).json(&request);
        if let Some(auth) = &self.auth {
            req = req.header(reqwest::header::AUTHORIZATION, auth);
        }

        let response = req
            .send()
            .await
            .map_err(|e| NodeError::Transport(format!("HTTP request failed: {e}")))?;

        // Nodes answer RPC errors with a non-2xx status and a JSON body, so
        // try the body before giving up on the status.
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| NodeError::Transport(format!("failed to read response: {e}")))?;

        let parsed: JsonRpcResponse<T> = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(NodeError::Transport(format!("HTTP {status}: {body}")));
            }
            Err(e) => {
                return Err(NodeError::InvalidResponse(format!(
                    "failed to parse JSON-RPC response to {method}: {e}"
                )));
            }
        };

        if let Some(error) = parsed.error {
            return Err(NodeError::Rpc { code: error.code, message: error.message });
        }
        if !status.is_success() {
            return Err(NodeError::Transport(format!("HTTP {status}: {body}")));
        }
        parsed
            .result
            .ok_or_else(|| NodeError::InvalidResponse(format!("missing result in {method} response")))
    }

    fn chain_info_from(&self, info: BlockchainInfo) -> Result<ChainInfo, NodeError> {
        let upgrade = info.upgrades.get(&self.activation_upgrade_id).ok_or_else(|| {
            NodeError::InvalidResponse(format!(
                "getblockchaininfo lists no upgrade {}",
                self.activation_upgrade_id
            ))
        })?;
        Ok(ChainInfo {
            chain: info.chain,
            activation_height: upgrade.activationheight,
            headers: info.headers,
            branch_id: info.consensus.nextblock,
        })
    }
}

/// Splits a `getblock` outcome into block bytes, "not there yet", or failure.
fn classify_getblock(res: Result<String, NodeError>) -> Result<Option<Vec<u8>>, NodeError> {
    match res {
        Ok(block_hex) => hex::decode(block_hex.trim())
            .map(Some)
            .map_err(|e| NodeError::InvalidResponse(format!("invalid hex in block response: {e}"))),
        Err(NodeError::Rpc { code: RPC_INVALID_PARAMETER, .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl NodeAdapter for JsonRpcNode {
    async fn fetch_block(&self, height: u32) -> Result<Option<Vec<u8>>, NodeError> {
        // Height goes as a string: the node takes either a hash or a height there.
        let res = self.rpc_call::<String>("getblock", vec![json!(height.to_string()), json!(0)]).await;
        classify_getblock(res)
    }

    async fn chain_info(&self) -> Result<ChainInfo, NodeError> {
        let info: BlockchainInfo = self.rpc_call("getblockchaininfo", vec![]).await?;
        self.chain_info_from(info)
    }
}
