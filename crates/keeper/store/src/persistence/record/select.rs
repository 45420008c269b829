use chrono::{DateTime, Utc};
use diesel::prelude::Queryable;
use dissolve_derive::Dissolve;
use uuid::Uuid;

use crate::persistence::record::{
    OutboundKind, RequestState, SafeState, SignatureState, TransactionState, UtxoKind, UtxoState,
};

#[derive(Debug, Dissolve, Queryable)]
pub struct AccountPlanRecord {
    request_id: Uuid,
    chain: i16,
    price_asset: Uuid,
    price_amount: String,
    transaction_minimum: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Dissolve, Queryable)]
pub struct BitcoinOutputRecord {
    transaction_hash: String,
    output_index: i32,
    seq: i64,
    address: String,
    satoshi: i64,
    script: Vec<u8>,
    sequence: i64,
    kind: UtxoKind,
    state: UtxoState,
    holder: String,
    chain: i16,
    spent_by: Option<String>,
    request_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Dissolve, Queryable)]
pub struct KeyRecord {
    public_key: String,
    curve: i16,
    role: i16,
    request_id: Uuid,
    holder: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Dissolve, Queryable)]
pub struct NetworkInfoRecord {
    request_id: Uuid,
    chain: i16,
    fee_rate: i64,
    height: i64,
    hash: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Dissolve, Queryable)]
pub struct OutboundMessageRecord {
    id: Uuid,
    seq: i64,
    request_id: Uuid,
    receiver: i16,
    kind: OutboundKind,
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Dissolve, Queryable)]
pub struct RequestRecord {
    id: Uuid,
    seq: i64,
    action: i16,
    role: i16,
    curve: i16,
    holder: String,
    asset_id: Uuid,
    amount: String,
    extra: Vec<u8>,
    state: RequestState,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Dissolve, Queryable)]
pub struct SafeRecord {
    holder: String,
    chain: i16,
    signer: String,
    observer: String,
    accountant: String,
    timelock: i64,
    address: String,
    script: Vec<u8>,
    accountant_address: String,
    threshold: i16,
    receivers: Vec<Uuid>,
    state: SafeState,
    request_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Dissolve, Queryable)]
pub struct SignatureRequestRecord {
    id: Uuid,
    transaction_hash: String,
    input_index: i32,
    signer: String,
    message: Vec<u8>,
    signature: Option<Vec<u8>>,
    state: SignatureState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Dissolve, Queryable)]
pub struct TransactionRecord {
    transaction_hash: String,
    raw_transaction: Vec<u8>,
    holder: String,
    chain: i16,
    state: TransactionState,
    data: String,
    fee: String,
    request_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
