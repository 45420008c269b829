pub mod request;
pub mod response;

use bon::Builder;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use safe_keeper_domain::{
    network::NetworkInfo,
    outbound::{OutboundKind, OutboundMessage, OutboundMessageDissolved},
    request::Role,
    safe::{Safe, SafeState},
    signature::{SignatureRequest, SignatureState},
    tx::{Recipient, Transaction, TransactionState},
};
use safe_keeper_rpc_client::ChainNetworkInfo;
use serde::Serialize;
use serde_with::{DisplayFromStr, base64::Base64};
use uuid::Uuid;

#[serde_with::serde_as]
#[derive(Debug, Builder, Serialize)]
pub struct SafePayload {
    holder: String,
    signer: String,
    observer: String,
    accountant: String,
    timelock_secs: u64,
    address: String,

    #[serde_as(as = "Base64")]
    script: Vec<u8>,

    accountant_address: String,
    threshold: u8,
    receivers: Vec<Uuid>,

    #[serde_as(as = "DisplayFromStr")]
    state: SafeState,

    request_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[serde_with::serde_as]
#[derive(Debug, Builder, Serialize)]
pub struct TransactionPayload {
    transaction_hash: String,

    /// The PSBT, fully signed once `state` is done
    #[serde_as(as = "Base64")]
    raw_transaction: Vec<u8>,

    holder: String,

    #[serde_as(as = "DisplayFromStr")]
    state: TransactionState,

    recipients: Vec<RecipientPayload>,

    #[serde_as(as = "DisplayFromStr")]
    fee: Decimal,

    request_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[serde_with::serde_as]
#[derive(Debug, Builder, Serialize)]
pub struct RecipientPayload {
    #[serde_as(as = "DisplayFromStr")]
    amount: Decimal,

    receiver: String,
}

#[serde_with::serde_as]
#[derive(Debug, Builder, Serialize)]
pub struct SignatureRequestPayload {
    id: Uuid,
    input_index: u32,
    signer: String,

    #[serde_as(as = "Base64")]
    message: Vec<u8>,

    #[serde_as(as = "Option<Base64>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<Vec<u8>>,

    #[serde_as(as = "DisplayFromStr")]
    state: SignatureState,

    created_at: DateTime<Utc>,
}

#[serde_with::serde_as]
#[derive(Debug, Builder, Serialize)]
pub struct OutboundMessagePayload {
    id: Uuid,
    request_id: Uuid,

    #[serde_as(as = "DisplayFromStr")]
    receiver: Role,

    #[serde_as(as = "DisplayFromStr")]
    kind: OutboundKind,

    #[serde_as(as = "Base64")]
    payload: Vec<u8>,

    seq: i64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Builder, Serialize)]
pub struct NetworkInfoPayload {
    request_id: Uuid,
    fee_rate: u64,
    height: u64,
    hash: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Builder, Serialize)]
pub struct ChainHeadPayload {
    fee_rate: u64,
    height: u64,
    hash: String,
    timestamp: DateTime<Utc>,
}

impl From<Safe> for SafePayload {
    fn from(safe: Safe) -> Self {
        Self::builder()
            .holder(safe.holder().to_string())
            .signer(safe.signer().to_string())
            .observer(safe.observer().to_string())
            .accountant(safe.accountant().to_string())
            .timelock_secs(safe.timelock().as_secs())
            .address(safe.address().to_string())
            .script(safe.script().to_vec())
            .accountant_address(safe.accountant_address().to_string())
            .threshold(safe.threshold())
            .receivers(safe.receivers().to_vec())
            .state(safe.state())
            .request_id(safe.request_id())
            .created_at(safe.aux().created_at())
            .updated_at(safe.aux().updated_at())
            .build()
    }
}

impl From<Transaction> for TransactionPayload {
    fn from(transaction: Transaction) -> Self {
        Self::builder()
            .transaction_hash(transaction.transaction_hash().to_string())
            .raw_transaction(transaction.raw_transaction().to_vec())
            .holder(transaction.holder().to_string())
            .state(transaction.state())
            .recipients(transaction.data().iter().cloned().map(From::from).collect())
            .fee(transaction.fee())
            .request_id(transaction.request_id())
            .created_at(transaction.aux().created_at())
            .updated_at(transaction.aux().updated_at())
            .build()
    }
}

impl From<Recipient> for RecipientPayload {
    fn from(recipient: Recipient) -> Self {
        Self::builder().amount(recipient.amount).receiver(recipient.receiver).build()
    }
}

impl From<SignatureRequest> for SignatureRequestPayload {
    fn from(request: SignatureRequest) -> Self {
        Self::builder()
            .id(request.id())
            .input_index(request.input_index())
            .signer(request.signer().to_string())
            .message(request.message().to_vec())
            .maybe_signature(request.signature().map(<[u8]>::to_vec))
            .state(request.state())
            .created_at(request.created_at())
            .build()
    }
}

impl From<OutboundMessage> for OutboundMessagePayload {
    fn from(message: OutboundMessage) -> Self {
        let OutboundMessageDissolved { id, request_id, receiver, kind, payload, seq, created_at } =
            message.dissolve();

        Self::builder()
            .id(id)
            .request_id(request_id)
            .receiver(receiver)
            .kind(kind)
            .payload(payload)
            .seq(seq)
            .created_at(created_at)
            .build()
    }
}

impl From<NetworkInfo> for NetworkInfoPayload {
    fn from(info: NetworkInfo) -> Self {
        Self::builder()
            .request_id(info.request_id())
            .fee_rate(info.fee_rate())
            .height(info.height())
            .hash(info.hash().to_string())
            .created_at(info.created_at())
            .build()
    }
}

impl From<ChainNetworkInfo> for ChainHeadPayload {
    fn from(head: ChainNetworkInfo) -> Self {
        let ChainNetworkInfo { height, fee_rate, hash, timestamp } = head;

        Self::builder().fee_rate(fee_rate).height(height).hash(hash).timestamp(timestamp).build()
    }
}
