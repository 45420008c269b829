use bon::Builder;
use chrono::{DateTime, Utc};
use diesel::prelude::Insertable;
use uuid::Uuid;

use crate::persistence::{
    record::{
        OutboundKind, RequestState, SafeState, SignatureState, TransactionState, UtxoKind,
        UtxoState,
    },
    schema,
};

#[derive(Debug, Builder, Insertable)]
#[diesel(table_name = schema::account_plans)]
pub struct NewAccountPlanRecord<'a> {
    request_id: Uuid,
    chain: i16,
    price_asset: Uuid,
    price_amount: &'a str,
    transaction_minimum: &'a str,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Builder, Insertable)]
#[diesel(table_name = schema::bitcoin_outputs)]
pub struct NewBitcoinOutputRecord<'a> {
    transaction_hash: &'a str,
    output_index: i32,
    address: &'a str,
    satoshi: i64,
    script: &'a [u8],
    sequence: i64,
    kind: UtxoKind,
    state: UtxoState,
    holder: &'a str,
    chain: i16,
    request_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Builder, Insertable)]
#[diesel(table_name = schema::keys)]
pub struct NewKeyRecord<'a> {
    public_key: &'a str,
    curve: i16,
    role: i16,
    request_id: Uuid,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Builder, Insertable)]
#[diesel(table_name = schema::network_infos)]
pub struct NewNetworkInfoRecord<'a> {
    request_id: Uuid,
    chain: i16,
    fee_rate: i64,
    height: i64,
    hash: &'a str,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Builder, Insertable)]
#[diesel(table_name = schema::outbound_messages)]
pub struct NewOutboundMessageRecord<'a> {
    id: Uuid,
    request_id: Uuid,
    receiver: i16,
    kind: OutboundKind,
    payload: &'a [u8],
    created_at: DateTime<Utc>,
}

#[derive(Debug, Builder, Insertable)]
#[diesel(table_name = schema::requests)]
pub struct NewRequestRecord<'a> {
    id: Uuid,
    action: i16,
    role: i16,
    curve: i16,
    holder: &'a str,
    asset_id: Uuid,
    amount: &'a str,
    extra: &'a [u8],
    state: RequestState,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Builder, Insertable)]
#[diesel(table_name = schema::safes)]
pub struct NewSafeRecord<'a> {
    holder: &'a str,
    chain: i16,
    signer: &'a str,
    observer: &'a str,
    accountant: &'a str,
    timelock: i64,
    address: &'a str,
    script: &'a [u8],
    accountant_address: &'a str,
    threshold: i16,
    receivers: &'a [Uuid],
    state: SafeState,
    request_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Builder, Insertable)]
#[diesel(table_name = schema::signature_requests)]
pub struct NewSignatureRequestRecord<'a> {
    id: Uuid,
    transaction_hash: &'a str,
    input_index: i32,
    signer: &'a str,
    message: &'a [u8],
    state: SignatureState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Builder, Insertable)]
#[diesel(table_name = schema::transactions)]
pub struct NewTransactionRecord<'a> {
    transaction_hash: &'a str,
    raw_transaction: &'a [u8],
    holder: &'a str,
    chain: i16,
    state: TransactionState,
    data: &'a str,
    fee: &'a str,
    request_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
