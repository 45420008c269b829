use bon::Builder;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_with::DisplayFromStr;

use crate::payload::{
    ChainHeadPayload, NetworkInfoPayload, OutboundMessagePayload, SafePayload,
    SignatureRequestPayload, TransactionPayload,
};

#[derive(Debug, Builder, Serialize)]
pub struct SubmitRequestResponsePayload {
    created: bool,
}

#[derive(Debug, Builder, Serialize)]
pub struct GetSafeDetailsResponsePayload {
    safe: SafePayload,
}

#[derive(Debug, Builder, Serialize)]
pub struct GetTransactionDetailsResponsePayload {
    transaction: TransactionPayload,
    signature_requests: Vec<SignatureRequestPayload>,
}

#[serde_with::serde_as]
#[derive(Debug, Builder, Serialize)]
pub struct GetAccountantBalanceResponsePayload {
    #[serde_as(as = "DisplayFromStr")]
    balance: Decimal,
}

#[derive(Debug, Builder, Serialize)]
pub struct ListOutboundResponsePayload {
    messages: Vec<OutboundMessagePayload>,

    /// The cursor to continue from, absent when no message was returned
    #[serde(skip_serializing_if = "Option::is_none")]
    next_seq: Option<i64>,
}

#[derive(Debug, Builder, Serialize)]
pub struct GetNetworkStatusResponsePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<NetworkInfoPayload>,

    head: ChainHeadPayload,

    /// Blocks the stored status is behind the chain node
    #[serde(skip_serializing_if = "Option::is_none")]
    lag: Option<u64>,
}
