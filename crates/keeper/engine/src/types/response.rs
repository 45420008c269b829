//! Response types for keeper engine operations.

use dissolve_derive::Dissolve;
use rust_decimal::Decimal;
use safe_keeper_domain::{
    network::NetworkInfo, outbound::OutboundMessage, safe::Safe, signature::SignatureRequest,
    tx::Transaction,
};
use safe_keeper_rpc_client::ChainNetworkInfo;

/// Response from submitting a request envelope.
#[derive(Debug, Dissolve)]
pub struct SubmitResponse {
    /// `false` when a request with the same id was already in the feed
    created: bool,
}

/// Response from looking up a safe.
#[derive(Debug, Dissolve)]
pub struct GetSafeResponse {
    /// The safe if found, `None` otherwise
    safe: Option<Safe>,
}

/// Response from looking up a withdrawal.
#[derive(Debug, Dissolve)]
pub struct GetTransactionResponse {
    /// The transaction if found, `None` otherwise
    transaction: Option<Transaction>,

    /// Its signature requests, in input order
    signature_requests: Vec<SignatureRequest>,
}

/// Response from reading an accountant balance.
#[derive(Debug, Dissolve)]
pub struct GetAccountantBalanceResponse {
    balance: Decimal,
}

/// Response from paging through the outbound queue.
#[derive(Debug, Dissolve)]
pub struct ListOutboundResponse {
    /// Messages in sequence order
    messages: Vec<OutboundMessage>,
}

/// Response from comparing the stored network status with the chain node.
#[derive(Debug, Dissolve)]
pub struct GetNetworkStatusResponse {
    /// The latest network status replayed from the feed
    info: Option<NetworkInfo>,

    /// The chain head as the chain node sees it now
    head: ChainNetworkInfo,
}

#[bon::bon]
impl SubmitResponse {
    #[builder]
    pub(crate) fn new(created: bool) -> Self {
        Self { created }
    }
}

#[bon::bon]
impl GetSafeResponse {
    #[builder]
    pub(crate) fn new(safe: Option<Safe>) -> Self {
        Self { safe }
    }
}

#[bon::bon]
impl GetTransactionResponse {
    #[builder]
    pub(crate) fn new(
        transaction: Option<Transaction>,
        signature_requests: Vec<SignatureRequest>,
    ) -> Self {
        Self { transaction, signature_requests }
    }
}

#[bon::bon]
impl GetAccountantBalanceResponse {
    #[builder]
    pub(crate) fn new(balance: Decimal) -> Self {
        Self { balance }
    }
}

#[bon::bon]
impl ListOutboundResponse {
    #[builder]
    pub(crate) fn new(messages: Vec<OutboundMessage>) -> Self {
        Self { messages }
    }
}

#[bon::bon]
impl GetNetworkStatusResponse {
    #[builder]
    pub(crate) fn new(info: Option<NetworkInfo>, head: ChainNetworkInfo) -> Self {
        Self { info, head }
    }
}
