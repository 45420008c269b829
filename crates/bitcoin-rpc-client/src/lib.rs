//! Chain RPC collaborator of the safe keeper.
//!
//! The keeper consults a chain node for three things only: the outputs a deposit claims to
//! create, the inputs of a transaction (to recognise the change of its own withdrawals), and the
//! address that funded a transaction. [`ChainRpc`] captures exactly that surface;
//! [`BitcoindClient`] implements it over the bitcoind JSON-RPC interface.

mod bitcoind;
mod error;

pub use self::{
    bitcoind::{BitcoindClient, BitcoindConfig},
    error::{Result, RpcError},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A reference to an output spent by a transaction input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInput {
    /// Hash of the transaction that created the spent output.
    pub transaction_hash: String,
    /// Index of the spent output.
    pub index: u32,
}

/// A transaction as seen by the chain node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    /// The transaction id.
    pub hash: String,
    /// The spent outputs, in input order. Empty for coinbase transactions.
    pub inputs: Vec<ChainInput>,
    /// Whether this is a coinbase transaction.
    pub coinbase: bool,
    /// The height of the block including the transaction, if it is confirmed.
    pub height: Option<u64>,
}

/// A transaction output as seen by the chain node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOutput {
    /// The address the output pays to, empty for non-standard scripts.
    pub address: String,
    /// The output value.
    pub satoshi: u64,
    /// The height of the block including the output, if it is confirmed.
    pub height: Option<u64>,
    /// Whether the output was created by a coinbase transaction.
    pub coinbase: bool,
}

/// The chain head and fee market reported by the chain node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainNetworkInfo {
    /// Height of the best block.
    pub height: u64,
    /// Estimated fee rate for next-block inclusion, in sat/vB.
    pub fee_rate: u64,
    /// Hash of the best block.
    pub hash: String,
    /// Timestamp of the best block.
    pub timestamp: DateTime<Utc>,
}

/// Read access to a chain node.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Fetches a transaction by hash.
    async fn get_transaction(&self, hash: &str) -> Result<ChainTransaction>;

    /// Fetches a transaction and one of its outputs.
    async fn get_transaction_output(
        &self,
        hash: &str,
        index: u32,
    ) -> Result<(ChainTransaction, ChainOutput)>;

    /// Returns the address of the output spent by the first input of `transaction`, or an empty
    /// string for coinbase transactions.
    async fn get_transaction_sender(&self, transaction: &ChainTransaction) -> Result<String>;

    /// Fetches the chain head and the current fee estimate.
    async fn get_latest_network_info(&self) -> Result<ChainNetworkInfo>;
}
