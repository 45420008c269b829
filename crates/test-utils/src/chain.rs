use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use safe_keeper_rpc_client::{
    ChainInput, ChainNetworkInfo, ChainOutput, ChainRpc, ChainTransaction, Result, RpcError,
};

/// An in-memory chain node.
///
/// Transactions, outputs and senders are registered up front. [`MockChainRpc::fail_next`] makes
/// the following calls fail with a transient error, to exercise retries.
#[derive(Debug, Default)]
pub struct MockChainRpc {
    state: Mutex<MockChainState>,
}

#[derive(Debug, Default)]
struct MockChainState {
    transactions: HashMap<String, ChainTransaction>,
    outputs: HashMap<(String, u32), ChainOutput>,
    senders: HashMap<String, String>,
    network_info: Option<ChainNetworkInfo>,
    failures: u32,
    calls: u32,
}

impl MockChainRpc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a confirmed transaction at `height` spending `inputs`, funded by `sender`.
    pub fn add_transaction(&self, hash: &str, inputs: &[(&str, u32)], height: u64, sender: &str) {
        let inputs = inputs
            .iter()
            .map(|(transaction_hash, index)| ChainInput {
                transaction_hash: transaction_hash.to_string(),
                index: *index,
            })
            .collect();

        self.insert_transaction(hash, inputs, false, height, sender);
    }

    /// Registers a coinbase transaction mined at `height`.
    pub fn add_coinbase_transaction(&self, hash: &str, height: u64) {
        self.insert_transaction(hash, Vec::new(), true, height, "");
    }

    fn insert_transaction(
        &self,
        hash: &str,
        inputs: Vec<ChainInput>,
        coinbase: bool,
        height: u64,
        sender: &str,
    ) {
        let transaction =
            ChainTransaction { hash: hash.to_string(), inputs, coinbase, height: Some(height) };

        let mut state = self.state.lock().expect("mock chain lock poisoned");
        state.transactions.insert(hash.to_string(), transaction);
        state.senders.insert(hash.to_string(), sender.to_string());
    }

    /// Registers output `index` of a transaction added before.
    pub fn add_output(&self, hash: &str, index: u32, address: &str, satoshi: u64) {
        let mut state = self.state.lock().expect("mock chain lock poisoned");
        let transaction = state.transactions.get(hash).expect("transaction must be added first");

        let output = ChainOutput {
            address: address.to_string(),
            satoshi,
            height: transaction.height,
            coinbase: transaction.coinbase,
        };
        state.outputs.insert((hash.to_string(), index), output);
    }

    pub fn set_network_info(&self, info: ChainNetworkInfo) {
        self.state.lock().expect("mock chain lock poisoned").network_info = Some(info);
    }

    /// Makes the next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().expect("mock chain lock poisoned").failures = n;
    }

    /// Number of calls served, failed ones included.
    pub fn calls(&self) -> u32 {
        self.state.lock().expect("mock chain lock poisoned").calls
    }

    fn enter(&self) -> Result<std::sync::MutexGuard<'_, MockChainState>> {
        let mut state = self.state.lock().expect("mock chain lock poisoned");
        state.calls += 1;

        if state.failures > 0 {
            state.failures -= 1;
            return Err(RpcError::Rpc { code: -28, message: "Loading block index...".into() });
        }

        Ok(state)
    }
}

#[async_trait]
impl ChainRpc for MockChainRpc {
    async fn get_transaction(&self, hash: &str) -> Result<ChainTransaction> {
        self.enter()?
            .transactions
            .get(hash)
            .cloned()
            .ok_or_else(|| RpcError::NotFound(format!("transaction {hash}").into()))
    }

    async fn get_transaction_output(
        &self,
        hash: &str,
        index: u32,
    ) -> Result<(ChainTransaction, ChainOutput)> {
        let state = self.enter()?;
        let transaction = state
            .transactions
            .get(hash)
            .cloned()
            .ok_or_else(|| RpcError::NotFound(format!("transaction {hash}").into()))?;
        let output = state
            .outputs
            .get(&(hash.to_string(), index))
            .cloned()
            .ok_or_else(|| RpcError::NotFound(format!("output {hash}:{index}").into()))?;

        Ok((transaction, output))
    }

    async fn get_transaction_sender(&self, transaction: &ChainTransaction) -> Result<String> {
        Ok(self.enter()?.senders.get(&transaction.hash).cloned().unwrap_or_default())
    }

    async fn get_latest_network_info(&self) -> Result<ChainNetworkInfo> {
        self.enter()?
            .network_info
            .clone()
            .ok_or_else(|| RpcError::other("network info not set"))
    }
}
