use core::time::Duration;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bitcoin::Amount;
use chrono::DateTime;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use url::Url;

use crate::{
    ChainInput, ChainNetworkInfo, ChainOutput, ChainRpc, ChainTransaction, Result, RpcError,
};

/// Fee estimate target, in blocks.
const FEE_ESTIMATE_TARGET: u16 = 1;

/// Connection settings of a bitcoind node.
#[derive(Debug, Clone)]
pub struct BitcoindConfig {
    /// The JSON-RPC endpoint.
    pub url: Url,
    /// The RPC user.
    pub user: String,
    /// The RPC password.
    pub password: String,
    /// Timeout of a single RPC call.
    pub timeout: Duration,
}

/// A [`ChainRpc`] over the bitcoind JSON-RPC interface.
///
/// Requires a node with `txindex=1`, since deposits are looked up by transaction hash alone.
pub struct BitcoindClient {
    http: reqwest::Client,
    url: Url,
    user: String,
    password: String,
    next_id: AtomicU64,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RawTransaction {
    txid: String,
    vin: Vec<RawInput>,
    vout: Vec<RawOutput>,
    blockhash: Option<String>,
}

#[derive(Deserialize)]
struct RawInput {
    txid: Option<String>,
    vout: Option<u32>,
    coinbase: Option<String>,
}

#[derive(Deserialize)]
struct RawOutput {
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    value: Amount,
    n: u32,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: RawScriptPubKey,
}

#[derive(Deserialize)]
struct RawScriptPubKey {
    address: Option<String>,
}

#[derive(Deserialize)]
struct BlockHeader {
    height: u64,
    time: i64,
}

#[derive(Deserialize)]
struct BlockchainInfo {
    blocks: u64,
    bestblockhash: String,
}

#[derive(Deserialize)]
struct SmartFee {
    /// BTC per kvB.
    feerate: Option<f64>,
}

impl BitcoindClient {
    /// Creates a client for the node described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: BitcoindConfig) -> Result<Self> {
        let BitcoindConfig { url, user, password, timeout } = config;
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { http, url, user, password, next_id: AtomicU64::new(1) })
    }

    #[tracing::instrument(skip(self, params), err(level = "debug"))]
    async fn call<T>(&self, method: &str, params: Value) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest { jsonrpc: "1.0", id, method, params };

        let response = self
            .http
            .post(self.url.clone())
            .basic_auth(&self.user, Some(&self.password))
            .json(&request)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(RpcError::other("unauthorized"));
        }

        let RpcResponse { result, error } = response.json::<RpcResponse<T>>().await?;
        if let Some(RpcErrorObject { code, message }) = error {
            return Err(RpcError::Rpc { code, message });
        }

        result.ok_or_else(|| RpcError::Decode(format!("{method}: missing result").into()))
    }

    async fn get_raw_transaction(&self, hash: &str) -> Result<RawTransaction> {
        self.call("getrawtransaction", json!([hash, true])).await.map_err(|err| {
            if err.is_not_found() {
                RpcError::NotFound(format!("transaction {hash}").into())
            } else {
                err
            }
        })
    }

    async fn get_block_header(&self, hash: &str) -> Result<BlockHeader> {
        self.call("getblockheader", json!([hash, true])).await
    }

    async fn make_transaction(&self, raw: &RawTransaction) -> Result<ChainTransaction> {
        let coinbase = raw.vin.first().is_some_and(|input| input.coinbase.is_some());

        let inputs = raw
            .vin
            .iter()
            .filter(|input| input.coinbase.is_none())
            .map(|input| match (&input.txid, input.vout) {
                (Some(txid), Some(vout)) => {
                    Ok(ChainInput { transaction_hash: txid.clone(), index: vout })
                },
                _ => Err(RpcError::Decode(format!("{}: input without outpoint", raw.txid).into())),
            })
            .collect::<Result<Vec<_>>>()?;

        let height = match &raw.blockhash {
            Some(blockhash) => Some(self.get_block_header(blockhash).await?.height),
            None => None,
        };

        Ok(ChainTransaction { hash: raw.txid.clone(), inputs, coinbase, height })
    }
}

#[async_trait]
impl ChainRpc for BitcoindClient {
    async fn get_transaction(&self, hash: &str) -> Result<ChainTransaction> {
        let raw = self.get_raw_transaction(hash).await?;
        self.make_transaction(&raw).await
    }

    async fn get_transaction_output(
        &self,
        hash: &str,
        index: u32,
    ) -> Result<(ChainTransaction, ChainOutput)> {
        let raw = self.get_raw_transaction(hash).await?;
        let transaction = self.make_transaction(&raw).await?;

        let output = raw
            .vout
            .iter()
            .find(|output| output.n == index)
            .ok_or_else(|| RpcError::NotFound(format!("output {hash}:{index}").into()))?;

        let output = ChainOutput {
            address: output.script_pub_key.address.clone().unwrap_or_default(),
            satoshi: output.value.to_sat(),
            height: transaction.height,
            coinbase: transaction.coinbase,
        };

        Ok((transaction, output))
    }

    async fn get_transaction_sender(&self, transaction: &ChainTransaction) -> Result<String> {
        let Some(input) = transaction.inputs.first() else {
            return Ok(String::new());
        };

        let previous = self.get_raw_transaction(&input.transaction_hash).await?;
        previous
            .vout
            .iter()
            .find(|output| output.n == input.index)
            .map(|output| output.script_pub_key.address.clone().unwrap_or_default())
            .ok_or_else(|| {
                RpcError::NotFound(
                    format!("output {}:{}", input.transaction_hash, input.index).into(),
                )
            })
    }

    async fn get_latest_network_info(&self) -> Result<ChainNetworkInfo> {
        let BlockchainInfo { blocks, bestblockhash } =
            self.call("getblockchaininfo", json!([])).await?;
        let BlockHeader { time, .. } = self.get_block_header(&bestblockhash).await?;
        let SmartFee { feerate } =
            self.call("estimatesmartfee", json!([FEE_ESTIMATE_TARGET])).await?;

        let timestamp = DateTime::from_timestamp(time, 0)
            .ok_or_else(|| RpcError::Decode(format!("block time {time}").into()))?;

        Ok(ChainNetworkInfo {
            height: blocks,
            fee_rate: feerate.map(fee_rate_from_btc_per_kvb).unwrap_or_default(),
            hash: bestblockhash,
            timestamp,
        })
    }
}

/// Converts a BTC/kvB fee rate to whole sat/vB, rounding up.
fn fee_rate_from_btc_per_kvb(feerate: f64) -> u64 {
    Amount::from_btc(feerate).map(|amount| amount.to_sat().div_ceil(1000)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_rates_round_up_to_whole_sats_per_vbyte() {
        assert_eq!(fee_rate_from_btc_per_kvb(0.0001), 10);
        assert_eq!(fee_rate_from_btc_per_kvb(0.00010001), 11);
        assert_eq!(fee_rate_from_btc_per_kvb(0.00001), 1);
        assert_eq!(fee_rate_from_btc_per_kvb(-1.0), 0);
    }

    #[test]
    fn verbose_transactions_decode() {
        let raw: RawTransaction = serde_json::from_value(json!({
            "txid": "27c2c4276045678fa1f35d5506d4573d99cf1dcfe8552dae05bcb829006757c9",
            "vin": [
                {
                    "txid": "5e2f7a3b0a1c6b6a5e8c5d2f0e4a9c2b7d6e1f0a3b4c5d6e7f8091a2b3c4d5e6",
                    "vout": 1,
                    "scriptSig": { "asm": "", "hex": "" },
                    "sequence": 4294967295u32
                }
            ],
            "vout": [
                {
                    "value": 0.000123,
                    "n": 0,
                    "scriptPubKey": {
                        "address": "bc1ql0up0wwazxt6xlj84u9fnvhnagjjetcn7h4z5xxvd0kf5xuczjgqq2aehc",
                        "type": "witness_v0_scripthash"
                    }
                },
                {
                    "value": 0.0,
                    "n": 1,
                    "scriptPubKey": { "type": "nulldata" }
                }
            ]
        }))
        .unwrap();

        assert_eq!(raw.vin[0].vout, Some(1));
        assert!(raw.vin[0].coinbase.is_none());
        assert_eq!(raw.vout[0].value.to_sat(), 12300);
        assert!(raw.vout[1].script_pub_key.address.is_none());
        assert!(raw.blockhash.is_none());
    }

    #[test]
    fn rpc_errors_decode() {
        let response: RpcResponse<RawTransaction> = serde_json::from_value(json!({
            "result": null,
            "error": { "code": -5, "message": "No such mempool or blockchain transaction" },
            "id": 1
        }))
        .unwrap();

        assert!(response.result.is_none());
        assert_eq!(response.error.map(|e| e.code), Some(-5));
    }
}
