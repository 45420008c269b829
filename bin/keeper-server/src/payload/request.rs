use chrono::{DateTime, Utc};
use dissolve_derive::Dissolve;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_with::{DisplayFromStr, base64::Base64};
use uuid::Uuid;

/// A request envelope as delivered by the ordering layer, with raw wire tags.
#[serde_with::serde_as]
#[derive(Debug, Dissolve, Deserialize)]
pub struct SubmitRequestPayload {
    id: Uuid,
    action: u8,
    role: u8,
    curve: u8,
    holder: String,
    asset_id: Uuid,

    #[serde_as(as = "DisplayFromStr")]
    amount: Decimal,

    #[serde_as(as = "Base64")]
    extra: Vec<u8>,

    created_at: DateTime<Utc>,
}

#[derive(Debug, Dissolve, Deserialize)]
pub struct GetSafeDetailsRequestPayload {
    holder: String,
}

#[derive(Debug, Dissolve, Deserialize)]
pub struct GetTransactionDetailsRequestPayload {
    transaction_hash: String,
}

#[derive(Debug, Dissolve, Deserialize)]
pub struct GetAccountantBalanceRequestPayload {
    holder: String,
}

#[derive(Debug, Dissolve, Deserialize)]
pub struct ListOutboundRequestPayload {
    after_seq: Option<i64>,
    limit: Option<u32>,
}

#[derive(Debug, Dissolve, Deserialize)]
pub struct GetNetworkStatusRequestPayload {
    chain: Option<u8>,
}
